//! Serial line protocol.
//!
//! The device and the host exchange newline-terminated ASCII text:
//!
//! ```text
//! device ──► host   GETTIME                         (explicit request)
//! device ──► host   RTC: 2000-01-01 00:00:00         (status line, also a request)
//! host   ──► device HOSTTIME 2024-05-17 14:03:59\n   (sent at most once per session)
//! ```
//!
//! - **`line`** – Permissive decoding of raw line bytes into trimmed text.
//! - **`message`** – Trigger classification and the `HOSTTIME` reply.

pub mod line;
pub mod message;

pub use line::decode_line;
pub use message::{format_timestamp, is_sync_trigger, HostTimeReply, ProtocolError};
