//! DeviceSession: the per-device line protocol.
//!
//! A session owns one open transport for its whole life and walks this state
//! machine:
//!
//! ```text
//! Opening ──► Active { synced: false } ──► Active { synced: true }
//!    │                 │                             │
//!    └─────────────────┴──────────► Closed ◄─────────┘
//! ```
//!
//! - `Opening`: the port is acquired.  Failure goes straight to `Closed`
//!   without any I/O.
//! - `Active`: lines are read and decoded one at a time, in arrival order.
//!   While unsynced, the first `GETTIME` or `RTC:` line is answered with
//!   `HOSTTIME <local time>\n`; once that write succeeds the session is synced
//!   and never answers again.
//! - `Closed`: the transport is released exactly once, whatever caused it.
//!
//! A session only ends through its own read/write failures, or when the
//! process-wide stop flag is raised at shutdown.

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use hosttime_core::{decode_line, is_sync_trigger, Clock, DeviceId, HostTimeReply, SessionId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::infrastructure::transport::{
    PortSettings, ReadOutcome, Transport, TransportError, TransportOpener,
};

/// Default pause after a read that produced no line.
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Settings applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub port: PortSettings,
    pub idle_backoff: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            port: PortSettings::default(),
            idle_backoff: DEFAULT_IDLE_BACKOFF,
        }
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Active { synced: bool },
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The port could not be acquired.
    OpenFailed(String),
    /// A read failed (device unplugged, I/O error).
    ReadFailed(String),
    /// The `HOSTTIME` reply could not be written.
    WriteFailed(String),
    /// The process is shutting down.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenFailed(e) => write!(f, "open failed: {e}"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Summary handed back when a session reaches `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub device_id: DeviceId,
    pub session_id: SessionId,
    /// Whether a `HOSTTIME` reply was written during the session.
    pub synced: bool,
    /// Number of non-empty lines observed.
    pub lines_received: u64,
    pub reason: CloseReason,
}

/// Observation events emitted while sessions run.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Opened {
        device_id: DeviceId,
        session_id: SessionId,
    },
    LineReceived {
        device_id: DeviceId,
        session_id: SessionId,
        line: String,
    },
    Synced {
        device_id: DeviceId,
        session_id: SessionId,
        reply: HostTimeReply,
    },
    Closed(SessionReport),
}

/// Owns the transport for its lifetime and releases it exactly once, also
/// when the session thread unwinds.
struct OwnedTransport {
    inner: Box<dyn Transport>,
    released: bool,
}

impl OwnedTransport {
    fn new(inner: Box<dyn Transport>) -> Self {
        Self {
            inner,
            released: false,
        }
    }

    fn as_transport(&mut self) -> &mut dyn Transport {
        self.inner.as_mut()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.close();
        }
    }
}

impl Drop for OwnedTransport {
    fn drop(&mut self) {
        self.release();
    }
}

/// One session of the line protocol on one device.
pub struct DeviceSession {
    device_id: DeviceId,
    session_id: SessionId,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    state: SessionState,
    lines_received: u64,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl DeviceSession {
    /// Creates a session in `Opening`.
    ///
    /// An idle backoff below [`DEFAULT_IDLE_BACKOFF`] is raised to it.
    pub fn new(device_id: DeviceId, clock: Arc<dyn Clock>, mut settings: SessionSettings) -> Self {
        settings.idle_backoff = settings.idle_backoff.max(DEFAULT_IDLE_BACKOFF);
        Self {
            device_id,
            session_id: SessionId::new(),
            clock,
            settings,
            state: SessionState::Opening,
            lines_received: 0,
            events: None,
        }
    }

    /// Sends observation events to `events`.  Send failures are ignored.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_synced(&self) -> bool {
        matches!(self.state, SessionState::Active { synced: true })
    }

    /// Runs the session to completion on the calling thread.
    ///
    /// Blocks until the transport fails, a reply cannot be written, or `stop`
    /// is raised.  The transport is released before this returns.
    pub fn run(mut self, opener: &dyn TransportOpener, stop: &AtomicBool) -> SessionReport {
        if stop.load(Ordering::SeqCst) {
            return self.finish(CloseReason::Shutdown, None);
        }

        let transport = match opener.open(&self.device_id, &self.settings.port) {
            Ok(t) => t,
            Err(e) => {
                debug!("not opening {}: {e}", self.device_id);
                return self.finish(CloseReason::OpenFailed(e.to_string()), None);
            }
        };

        info!("opened {} (session {})", self.device_id, self.session_id);
        self.state = SessionState::Active { synced: false };
        self.emit(SessionEvent::Opened {
            device_id: self.device_id.clone(),
            session_id: self.session_id,
        });

        let mut transport = OwnedTransport::new(transport);
        let reason = self.drive(&mut transport, stop);
        self.finish(reason, Some(transport))
    }

    /// The `Active` read loop.  Returns once the session must close.
    fn drive(&mut self, transport: &mut OwnedTransport, stop: &AtomicBool) -> CloseReason {
        loop {
            if stop.load(Ordering::SeqCst) {
                return CloseReason::Shutdown;
            }

            let raw = match transport.as_transport().read_line() {
                Ok(ReadOutcome::Line(raw)) => raw,
                Ok(ReadOutcome::Idle) => {
                    std::thread::sleep(self.settings.idle_backoff);
                    continue;
                }
                Err(e) => {
                    debug!("[{}] read failed: {e}", self.device_id);
                    return CloseReason::ReadFailed(e.to_string());
                }
            };

            let line = decode_line(&raw);
            if line.is_empty() {
                std::thread::sleep(self.settings.idle_backoff);
                continue;
            }

            if let Err(e) = self.handle_line(&line, transport.as_transport()) {
                warn!("[{}] write failed: {e}", self.device_id);
                return CloseReason::WriteFailed(e.to_string());
            }
        }
    }

    /// Observes one decoded, non-empty line and answers it if it is the
    /// session's first sync trigger.
    ///
    /// Returns `Ok(true)` when a reply was written.
    ///
    /// # Errors
    ///
    /// Returns the transport error when the reply could not be written; the
    /// session is left unsynced.
    fn handle_line(
        &mut self,
        line: &str,
        transport: &mut dyn Transport,
    ) -> Result<bool, TransportError> {
        self.lines_received += 1;
        info!("[{}] RX: {line}", self.device_id);
        self.emit(SessionEvent::LineReceived {
            device_id: self.device_id.clone(),
            session_id: self.session_id,
            line: line.to_string(),
        });

        if self.is_synced() || !is_sync_trigger(line) {
            return Ok(false);
        }

        let reply = HostTimeReply::new(self.clock.now());
        transport.write_all(&reply.encode())?;
        info!("[{}] TX: {reply}", self.device_id);

        self.state = SessionState::Active { synced: true };
        self.emit(SessionEvent::Synced {
            device_id: self.device_id.clone(),
            session_id: self.session_id,
            reply,
        });
        Ok(true)
    }

    /// The `Closed` transition: release the transport and build the report.
    fn finish(mut self, reason: CloseReason, transport: Option<OwnedTransport>) -> SessionReport {
        let synced = self.is_synced();
        if let Some(mut transport) = transport {
            transport.release();
            info!("closed {} ({reason})", self.device_id);
        }
        self.state = SessionState::Closed;

        SessionReport {
            device_id: self.device_id.clone(),
            session_id: self.session_id,
            synced,
            lines_received: self.lines_received,
            reason,
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is observing.
            let _ = tx.send(event);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
