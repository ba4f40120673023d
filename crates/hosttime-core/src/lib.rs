//! # hosttime-core
//!
//! Shared library for the HostTime serial responder containing the line
//! protocol, device/session identifiers, and the clock abstraction.
//!
//! This crate has zero dependencies on OS serial APIs or threads; the
//! responder application wires it to real ports.
//!
//! # Architecture overview
//!
//! A microcontroller with a battery-backed RTC prints its status over USB
//! serial.  When it needs the wall-clock time it prints `GETTIME` (or an
//! `RTC: ...` status line), and the host answers once with
//! `HOSTTIME YYYY-MM-DD HH:MM:SS`.
//!
//! - **`protocol`** – How bytes on the serial line become text lines, which
//!   lines ask for the time, and how the `HOSTTIME` reply is built and read.
//!
//! - **`domain`** – Identifiers for attached devices and for the sessions
//!   opened on them, plus the [`Clock`] trait the reply timestamp comes from.

pub mod domain;
pub mod protocol;

pub use domain::clock::{Clock, FixedClock, SystemClock};
pub use domain::device::{DeviceId, SessionId};
pub use protocol::line::decode_line;
pub use protocol::message::{
    format_timestamp, is_sync_trigger, HostTimeReply, ProtocolError, GETTIME_TOKEN,
    HOSTTIME_PREFIX, RTC_PREFIX, TIMESTAMP_FORMAT,
};
