//! Application layer: the daemon's use cases.
//!
//! - [`serial_bridge`] – the virtual serial bridge state machine.
//! - [`print_server`] – start, stop, and restart of the print server.
//! - [`host_status`] – the polled status snapshot fed by host events.

pub mod host_status;
pub mod print_server;
pub mod serial_bridge;
