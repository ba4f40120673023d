//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration from the
//! platform-appropriate directory, supplies defaults on first run, and
//! validates values before they reach the serial layer.

pub mod config;
