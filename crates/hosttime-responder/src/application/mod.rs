//! Application layer use cases for the responder.
//!
//! Use cases in this layer depend only on the transport traits and on
//! `hosttime_core`; no serial-port API is named here.
//!
//! # Sub-modules
//!
//! - **`device_session`** – The per-device protocol state machine: open the
//!   port, read lines, answer the first time request, release the port.
//!
//! - **`session_manager`** – The Tracked Set: at most one running session per
//!   device identifier, each on its own thread, reaped when it signals that
//!   it has ended.
//!
//! - **`discovery_loop`** – Polls the device list on a fixed interval, starts
//!   sessions for new devices and reaps finished ones.

pub mod device_session;
pub mod discovery_loop;
pub mod session_manager;
