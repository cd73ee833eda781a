//! Infrastructure layer: everything that touches the OS.
//!
//! - **`serial`** – USB serial ports behind the `SerialTransport` trait.
//! - **`channel`** – the print server's end of the virtual serial line and
//!   the threads that pump bytes through the bridge.
//! - **`process`** – supervision of child processes.
//! - **`bootstrap`** – download and extraction of the Linux user space.
//! - **`storage`** – TOML configuration persistence.
//! - **`event_pipe`** – restart/stop requests from the print server.
//! - **`extensions`** – discovery of add-on scripts.
//! - **`event_bus`** – fan-out of host events to the status board.

pub mod bootstrap;
pub mod channel;
pub mod event_bus;
pub mod event_pipe;
pub mod extensions;
pub mod process;
pub mod serial;
pub mod storage;
