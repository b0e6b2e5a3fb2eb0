//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration from the
//! platform-appropriate directory, writes it back when asked, and falls back
//! to defaults on first run.

pub mod config;
