//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the daemon's TOML file, fills in defaults
//! for anything missing, and writes it back when asked.

pub mod config;
