//! [`SerialTransport`] backed by the `serialport` crate.
//!
//! On Linux and Android the crate opens TTYs in exclusive mode, so a second
//! open of the same device fails with a busy error instead of silently
//! sharing the line.

use std::io::{self, Read, Write};
use std::time::Duration;

use printhost_core::{DeviceInfo, LineSettings, Parity, StopBits};
use serialport::{available_ports, DataBits, SerialPort, SerialPortType};
use tracing::{debug, warn};

use super::{SerialDevice, SerialTransport, TransportError};

/// Baud rate used for the initial open; [`SerialDevice::configure`] sets
/// the real value right after.
const OPEN_BAUD_RATE: u32 = 115_200;

const OPEN_TIMEOUT: Duration = Duration::from_millis(100);

/// A pump thread of the previous session may still hold its read handle for
/// one poll interval, which keeps an exclusive TTY busy.
const OPEN_ATTEMPTS: usize = 3;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(150);

/// Production transport over the system's serial ports.
#[derive(Debug, Default)]
pub struct SystemSerialTransport;

impl SystemSerialTransport {
    pub fn new() -> Self {
        Self
    }
}

impl SerialTransport for SystemSerialTransport {
    fn discover(&mut self) -> Vec<DeviceInfo> {
        let ports = match available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("serial port enumeration failed: {e}");
                return Vec::new();
            }
        };

        let devices: Vec<DeviceInfo> = ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(info) => DeviceInfo {
                    path: p.port_name,
                    usb: true,
                    vid: Some(info.vid),
                    pid: Some(info.pid),
                    product: info.product,
                },
                _ => DeviceInfo {
                    path: p.port_name,
                    usb: false,
                    vid: None,
                    pid: None,
                    product: None,
                },
            })
            .collect();

        debug!("discovered {} serial ports", devices.len());
        devices
    }

    fn open(&mut self, device: &DeviceInfo) -> Result<Box<dyn SerialDevice>, TransportError> {
        let mut attempt = 1;
        let port = loop {
            let result = serialport::new(&device.path, OPEN_BAUD_RATE)
                .timeout(OPEN_TIMEOUT)
                .open()
                .map_err(|e| map_open_error(&device.path, e));
            match result {
                Err(TransportError::Busy { .. }) if attempt < OPEN_ATTEMPTS => {
                    debug!("{} busy, retrying open ({attempt}/{OPEN_ATTEMPTS})", device.path);
                    attempt += 1;
                    std::thread::sleep(OPEN_RETRY_DELAY);
                }
                other => break other?,
            }
        };

        Ok(Box::new(SystemSerialDevice {
            path: device.path.clone(),
            port: Some(port),
        }))
    }
}

fn map_open_error(path: &str, e: serialport::Error) -> TransportError {
    let path = path.to_string();
    match e.kind() {
        serialport::ErrorKind::NoDevice => TransportError::NotFound { path },
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => TransportError::NotFound { path },
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            TransportError::PermissionDenied { path }
        }
        _ if e.description.to_ascii_lowercase().contains("busy") => {
            TransportError::Busy { path }
        }
        _ => TransportError::Open {
            path,
            message: e.description,
        },
    }
}

/// An open system serial port.
pub struct SystemSerialDevice {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SystemSerialDevice {
    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }

    fn configure_error(&self, e: serialport::Error) -> TransportError {
        TransportError::Configure {
            path: self.path.clone(),
            message: e.description,
        }
    }
}

impl SerialDevice for SystemSerialDevice {
    fn configure(&mut self, settings: &LineSettings) -> Result<(), TransportError> {
        let data_bits = match settings.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = match settings.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        };
        let parity = match settings.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };

        let port = self.port_mut()?;
        let result = apply_line_settings(
            port.as_mut(),
            settings.baud_rate,
            data_bits,
            stop_bits,
            parity,
        );
        result.map_err(|e| self.configure_error(e))?;

        debug!("{} configured at {} baud", self.path, settings.baud_rate);
        Ok(())
    }

    fn set_signals(&mut self, dtr: bool, rts: bool) -> Result<(), TransportError> {
        let port = self.port_mut()?;
        let result = port
            .write_data_terminal_ready(dtr)
            .and_then(|()| port.write_request_to_send(rts));
        result.map_err(|e| self.configure_error(e))
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
        let port = self.port_mut()?;
        port.set_timeout(timeout)
            .map_err(|e| TransportError::Write(io::Error::from(e)))?;
        port.write_all(data).map_err(TransportError::Write)?;
        port.flush().map_err(TransportError::Write)
    }

    fn reader(&mut self, poll: Duration) -> Result<Box<dyn Read + Send>, TransportError> {
        let path = self.path.clone();
        let port = self.port_mut()?;
        let mut clone = port.try_clone().map_err(|e| TransportError::Open {
            path: path.clone(),
            message: e.description,
        })?;
        clone.set_timeout(poll).map_err(|e| TransportError::Configure {
            path,
            message: e.description,
        })?;
        Ok(Box::new(PortReader(clone)))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("closed serial device {}", self.path);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

fn apply_line_settings(
    port: &mut dyn SerialPort,
    baud_rate: u32,
    data_bits: DataBits,
    stop_bits: serialport::StopBits,
    parity: serialport::Parity,
) -> serialport::Result<()> {
    port.set_baud_rate(baud_rate)?;
    port.set_data_bits(data_bits)?;
    port.set_stop_bits(stop_bits)?;
    port.set_parity(parity)
}

/// Read half handed to the pump thread.
struct PortReader(Box<dyn SerialPort>);

impl Read for PortReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_open_error_no_device_is_not_found() {
        let err = map_open_error(
            "/dev/ttyUSB9",
            serialport::Error::new(serialport::ErrorKind::NoDevice, "gone"),
        );
        assert!(matches!(err, TransportError::NotFound { .. }));
    }

    #[test]
    fn test_map_open_error_permission_denied() {
        let err = map_open_error(
            "/dev/ttyUSB0",
            serialport::Error::new(
                serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied),
                "denied",
            ),
        );
        assert!(matches!(err, TransportError::PermissionDenied { .. }));
    }

    #[test]
    fn test_map_open_error_busy_by_description() {
        let err = map_open_error(
            "/dev/ttyACM0",
            serialport::Error::new(serialport::ErrorKind::Unknown, "Device or resource busy"),
        );
        assert!(matches!(err, TransportError::Busy { .. }));
    }

    #[test]
    fn test_open_missing_path_fails() {
        let mut transport = SystemSerialTransport::new();
        let device = DeviceInfo::usb("/dev/printhost-does-not-exist", 1, 2);

        assert!(transport.open(&device).is_err());
    }
}
