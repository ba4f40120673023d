//! Transport infrastructure: enumerating attached devices and talking to them.
//!
//! The application layer sees three traits:
//!
//! - [`DeviceEnumerator`] – lists the identifiers of currently attached
//!   devices (called once per discovery tick).
//! - [`TransportOpener`] – opens a device by identifier.
//! - [`Transport`] – the opened, exclusively owned byte stream: read one line,
//!   write bytes, close.
//!
//! Every operation returns an explicit result.  A read distinguishes "a line
//! arrived" from "nothing arrived within the read timeout" ([`ReadOutcome`])
//! and from "the device is gone" ([`TransportError`]), so the session never
//! has to guess from an exception what happened.
//!
//! # Testability
//!
//! [`mock`] provides scripted in-memory implementations of all three traits
//! that record every write and close call.

use std::time::Duration;

use hosttime_core::DeviceId;
use thiserror::Error;

pub mod mock;
pub mod serial;

/// Default serial line speed.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default upper bound on a single blocking read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The device could not be opened (busy, permission denied, vanished).
    #[error("failed to open {device}: {reason}")]
    OpenFailed { device: DeviceId, reason: String },

    /// Reading from or writing to the open device failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device reported end-of-stream or the handle was already closed.
    #[error("transport closed")]
    Closed,
}

/// Error type for device enumeration.
#[derive(Debug, Error)]
#[error("device enumeration failed: {0}")]
pub struct EnumerationError(pub String);

/// Line settings used when opening a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
    /// How long one `read_line` may block before reporting [`ReadOutcome::Idle`].
    pub read_timeout: Duration,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Successful result of a single [`Transport::read_line`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Raw bytes of one line, terminator included if it arrived.
    Line(Vec<u8>),
    /// No bytes arrived within the read timeout.
    Idle,
}

/// An open, exclusively owned byte stream to one device.
pub trait Transport: Send {
    /// Reads bytes up to and including the next `\n`, blocking for at most the
    /// read timeout the transport was opened with.
    fn read_line(&mut self) -> Result<ReadOutcome, TransportError>;

    /// Writes all of `bytes` and flushes them to the device.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Releases the underlying handle.  Calling it again is a no-op.
    fn close(&mut self);
}

/// Opens transports by device identifier.
pub trait TransportOpener: Send + Sync {
    /// Opens `device` with `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::OpenFailed`] when the device cannot be
    /// acquired.
    fn open(
        &self,
        device: &DeviceId,
        settings: &PortSettings,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Lists the devices attached right now.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceEnumerator: Send + Sync {
    /// Returns the identifiers of all currently attached devices.
    fn enumerate(&self) -> Result<Vec<DeviceId>, EnumerationError>;
}

/// Returns `true` for OS timeout / would-block errors that mean "no data yet".
pub fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
