//! In-process channel endpoint for tests.
//!
//! [`MemoryChannel::new`] returns the endpoint handed to the bridge and a
//! [`MemoryPeer`] that plays the print server: it sends lines, ends the
//! current connection, and collects what the bridge wrote back.

use std::io::{self, Write};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, Sender},
    Arc, Mutex,
};
use std::time::{Duration, Instant};

use super::{ChannelEndpoint, ChannelPair, ChannelReader};

/// Bridge side of the in-memory channel.
pub struct MemoryChannel {
    // `None` marks end-of-stream for the current connection.
    inbound: Arc<Mutex<Receiver<Option<Vec<u8>>>>>,
    outbound: Sender<Vec<u8>>,
    opens: Arc<AtomicUsize>,
}

/// Print-server side of the in-memory channel.
pub struct MemoryPeer {
    inbound: Sender<Option<Vec<u8>>>,
    outbound: Receiver<Vec<u8>>,
    opens: Arc<AtomicUsize>,
}

impl MemoryChannel {
    pub fn new() -> (Self, MemoryPeer) {
        let (in_tx, in_rx) = mpsc::channel();
        let (out_tx, out_rx) = mpsc::channel();
        let opens = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inbound: Arc::new(Mutex::new(in_rx)),
                outbound: out_tx,
                opens: Arc::clone(&opens),
            },
            MemoryPeer {
                inbound: in_tx,
                outbound: out_rx,
                opens,
            },
        )
    }
}

impl ChannelEndpoint for MemoryChannel {
    fn open(&mut self) -> io::Result<ChannelPair> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(ChannelPair {
            reader: Box::new(MemoryReader {
                inbound: Arc::clone(&self.inbound),
                pending: Vec::new(),
            }),
            writer: Box::new(MemoryWriter {
                outbound: self.outbound.clone(),
            }),
        })
    }

    fn describe(&self) -> String {
        "in-memory channel".to_string()
    }
}

impl MemoryPeer {
    /// Sends raw bytes as if the print server wrote them.
    pub fn send(&self, bytes: &[u8]) {
        let _ = self.inbound.send(Some(bytes.to_vec()));
    }

    /// Ends the current connection; the bridge sees end-of-stream.
    pub fn hang_up(&self) {
        let _ = self.inbound.send(None);
    }

    /// How many times the bridge has opened the endpoint.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Collects bridge output until `expected` bytes arrived or `timeout`
    /// passed.
    pub fn receive(&self, expected: usize, timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        while out.len() < expected {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.outbound.recv_timeout(left) {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(_) => break,
            }
        }
        out
    }
}

struct MemoryReader {
    inbound: Arc<Mutex<Receiver<Option<Vec<u8>>>>>,
    pending: Vec<u8>,
}

impl ChannelReader for MemoryReader {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        if self.pending.is_empty() {
            let inbound = self
                .inbound
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "channel lock poisoned"))?;
            match inbound.recv_timeout(timeout) {
                Ok(Some(bytes)) => self.pending = bytes,
                Ok(None) | Err(RecvTimeoutError::Disconnected) => return Ok(Some(0)),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(Some(n))
    }
}

struct MemoryWriter {
    outbound: Sender<Vec<u8>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
