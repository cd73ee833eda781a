//! The print server's end of the virtual serial line.
//!
//! A [`ChannelEndpoint`] is something the bridge can (re)open to get a
//! reader for traffic coming from the print server and a writer for bytes
//! going back to it.  Production uses [`fifo::FifoChannel`], a pair of named
//! pipes; tests use [`memory::MemoryChannel`].
//!
//! [`runner::BridgeRunner`] owns the endpoint and the threads that move
//! bytes between it and the [`BridgeController`](crate::application::serial_bridge::BridgeController).

use std::io::{self, Write};
use std::time::Duration;

pub mod fifo;
pub mod memory;
pub mod runner;

/// Read half of a channel with a bounded wait.
pub trait ChannelReader: Send {
    /// Waits up to `timeout` for data.
    ///
    /// Returns `Ok(None)` on timeout, `Ok(Some(0))` at end-of-stream, and
    /// `Ok(Some(n))` after reading `n` bytes into `buf`.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;
}

/// Both halves of one opened channel.
pub struct ChannelPair {
    pub reader: Box<dyn ChannelReader>,
    pub writer: Box<dyn Write + Send>,
}

/// A channel that can be torn down and opened again.
pub trait ChannelEndpoint: Send + 'static {
    fn open(&mut self) -> io::Result<ChannelPair>;

    /// Human-readable location for log lines.
    fn describe(&self) -> String;
}
