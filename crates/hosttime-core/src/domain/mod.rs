//! Domain types shared by every layer of the responder.
//!
//! - **`device`** – [`device::DeviceId`] names an attachment point (a port
//!   path); [`device::SessionId`] names one session opened on it.
//! - **`clock`** – Source of the local wall-clock time written into replies.

pub mod clock;
pub mod device;
