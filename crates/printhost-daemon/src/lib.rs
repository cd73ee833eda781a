//! printhost-daemon library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # Layers
//!
//! - **`domain`** – Process specs, the runtime environment contract, and the
//!   commands accepted from the print server.  No I/O.
//! - **`application`** – The serial bridge state machine, the host status
//!   board, and print-server orchestration.  Talks to the OS only through
//!   traits.
//! - **`infrastructure`** – Serial ports, named pipes, child processes, the
//!   bootstrap download, and TOML config on disk.

pub mod application;
pub mod domain;
pub mod infrastructure;
