//! Infrastructure layer for the responder.
//!
//! Contains OS-facing adapters: serial port enumeration and I/O, the scripted
//! in-memory transport used by tests, and TOML configuration storage.
//!
//! **Dependency rule**: the `application` layer only uses the traits declared
//! in `transport`; it never names a concrete adapter.

pub mod storage;
pub mod transport;
