//! Recording serial transport for tests.
//!
//! Every call is appended to an operation log, and the mock tracks how many
//! devices are open at the same time so tests can assert the bridge never
//! holds two sessions at once.  Bytes "from the printer" are injected with
//! [`MockSerialTransport::inject`] and reach whichever device is currently
//! open.

use std::io::{self, Read};
use std::sync::{
    mpsc::{self, Receiver, RecvTimeoutError, Sender},
    Arc, Mutex,
};
use std::time::Duration;

use printhost_core::{DeviceInfo, LineSettings};

use super::{SerialDevice, SerialTransport, TransportError};

/// One recorded call on the transport or a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialOp {
    Discover,
    Open(String),
    Configure(LineSettings),
    SetSignals { dtr: bool, rts: bool },
    Write(Vec<u8>),
    Close(String),
}

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceInfo>,
    ops: Vec<SerialOp>,
    open_now: usize,
    max_open: usize,
    fail_opens: bool,
    fail_writes: bool,
    // Feeds the reader of the most recently opened device.
    injector: Option<Sender<Option<Vec<u8>>>>,
}

/// A mock implementation of [`SerialTransport`] sharing its state with every
/// clone, so a test can keep one clone and hand another to the bridge.
#[derive(Clone, Default)]
pub struct MockSerialTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockSerialTransport {
    /// Creates a transport that will discover `devices`.
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        let transport = Self::default();
        transport.lock().devices = devices;
        transport
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Replaces the device list returned by the next discovery.
    pub fn set_devices(&self, devices: Vec<DeviceInfo>) {
        self.lock().devices = devices;
    }

    /// Makes every following `open` fail with [`TransportError::Busy`].
    pub fn fail_opens(&self, fail: bool) {
        self.lock().fail_opens = fail;
    }

    /// Makes every following device `write` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Recorded operations, oldest first.
    pub fn ops(&self) -> Vec<SerialOp> {
        self.lock().ops.clone()
    }

    /// Number of operations matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&SerialOp) -> bool) -> usize {
        self.lock().ops.iter().filter(|op| predicate(op)).count()
    }

    /// All bytes written to any device, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                SerialOp::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn open_now(&self) -> usize {
        self.lock().open_now
    }

    /// Highest number of simultaneously open devices ever observed.
    pub fn max_concurrent_open(&self) -> usize {
        self.lock().max_open
    }

    /// Delivers `bytes` to the reader of the current device.  Returns
    /// `false` if no reader is listening.
    pub fn inject(&self, bytes: &[u8]) -> bool {
        match &self.lock().injector {
            Some(tx) => tx.send(Some(bytes.to_vec())).is_ok(),
            None => false,
        }
    }

    /// Simulates the printer being unplugged: the current reader sees EOF.
    pub fn disconnect(&self) {
        if let Some(tx) = self.lock().injector.take() {
            let _ = tx.send(None);
        }
    }
}

impl SerialTransport for MockSerialTransport {
    fn discover(&mut self) -> Vec<DeviceInfo> {
        let mut state = self.lock();
        state.ops.push(SerialOp::Discover);
        state.devices.clone()
    }

    fn open(&mut self, device: &DeviceInfo) -> Result<Box<dyn SerialDevice>, TransportError> {
        let mut state = self.lock();
        state.ops.push(SerialOp::Open(device.path.clone()));
        if state.fail_opens {
            return Err(TransportError::Busy {
                path: device.path.clone(),
            });
        }

        state.open_now += 1;
        state.max_open = state.max_open.max(state.open_now);

        let (tx, rx) = mpsc::channel();
        state.injector = Some(tx);

        Ok(Box::new(MockDevice {
            path: device.path.clone(),
            state: Arc::clone(&self.state),
            rx: Some(rx),
            open: true,
        }))
    }
}

struct MockDevice {
    path: String,
    state: Arc<Mutex<MockState>>,
    rx: Option<Receiver<Option<Vec<u8>>>>,
    open: bool,
}

impl MockDevice {
    fn record(&self, op: SerialOp) -> std::sync::MutexGuard<'_, MockState> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.ops.push(op);
        state
    }
}

impl SerialDevice for MockDevice {
    fn configure(&mut self, settings: &LineSettings) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.record(SerialOp::Configure(*settings));
        Ok(())
    }

    fn set_signals(&mut self, dtr: bool, rts: bool) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.record(SerialOp::SetSignals { dtr, rts });
        Ok(())
    }

    fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let state = self.record(SerialOp::Write(data.to_vec()));
        if state.fail_writes {
            return Err(TransportError::Write(io::Error::new(
                io::ErrorKind::TimedOut,
                "mock write timeout",
            )));
        }
        Ok(())
    }

    fn reader(&mut self, poll: Duration) -> Result<Box<dyn Read + Send>, TransportError> {
        let rx = self.rx.take().ok_or(TransportError::Closed)?;
        Ok(Box::new(MockReader {
            rx,
            poll,
            pending: Vec::new(),
        }))
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let mut state = self.record(SerialOp::Close(self.path.clone()));
        state.open_now = state.open_now.saturating_sub(1);
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.close();
    }
}

struct MockReader {
    rx: Receiver<Option<Vec<u8>>>,
    poll: Duration,
    pending: Vec<u8>,
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(self.poll) {
                Ok(Some(bytes)) => self.pending = bytes,
                Ok(None) | Err(RecvTimeoutError::Disconnected) => return Ok(0),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}
