//! Serial transport used by the bridge to reach the printer.
//!
//! The bridge never touches a serial driver directly.  It talks to a
//! [`SerialTransport`] (discovery + open) and the [`SerialDevice`] that
//! `open` returns (configure, signals, write, read, close).
//!
//! # Testability
//!
//! [`system::SystemSerialTransport`] is the production implementation
//! backed by the `serialport` crate.  Tests use [`mock::MockSerialTransport`],
//! which records every call and counts how many devices are open at once.
//!
//! # Read side
//!
//! [`SerialDevice::reader`] hands out an independent reader whose `read`
//! returns `ErrorKind::TimedOut` when nothing arrived within the poll
//! interval, `Ok(0)` when the device went away, and data otherwise.  The
//! bridge runs that reader on its own pump thread so reads never hold the
//! session lock.

use std::io::{self, Read};
use std::time::Duration;

use printhost_core::{DeviceInfo, LineSettings};

pub mod mock;
pub mod system;

/// Error type for serial transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("serial device not found: {path}")]
    NotFound { path: String },

    #[error("serial device is busy: {path}")]
    Busy { path: String },

    #[error("permission denied opening serial device {path}")]
    PermissionDenied { path: String },

    #[error("failed to open serial device {path}: {message}")]
    Open { path: String, message: String },

    #[error("failed to configure serial device {path}: {message}")]
    Configure { path: String, message: String },

    #[error("serial write failed: {0}")]
    Write(#[source] io::Error),

    #[error("serial device is closed")]
    Closed,
}

/// Discovers and opens serial devices.
pub trait SerialTransport: Send + 'static {
    /// Enumerates the ports currently present.  Never fails; an enumeration
    /// error is logged and yields an empty list.
    fn discover(&mut self) -> Vec<DeviceInfo>;

    /// Opens `device` for exclusive use.
    fn open(&mut self, device: &DeviceInfo) -> Result<Box<dyn SerialDevice>, TransportError>;
}

/// One opened serial device.
pub trait SerialDevice: Send {
    fn configure(&mut self, settings: &LineSettings) -> Result<(), TransportError>;

    fn set_signals(&mut self, dtr: bool, rts: bool) -> Result<(), TransportError>;

    /// Writes all of `data`, giving up after `timeout`.
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError>;

    /// Returns an independent read handle polling every `poll` interval.
    fn reader(&mut self, poll: Duration) -> Result<Box<dyn Read + Send>, TransportError>;

    /// Releases the device.  Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}
