//! Serial line parameters and printer device selection.
//!
//! These types describe *what* the bridge wants from a serial port without
//! depending on any serial driver crate.  The daemon translates them into
//! driver calls.

use serde::{Deserialize, Serialize};

/// Number of stop bits on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Full line configuration applied when a session is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl LineSettings {
    /// 8N1 at the given baud rate, which is what every printer firmware speaks.
    pub fn eight_n_one(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: 8,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

/// One serial port found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// OS path, e.g. `/dev/ttyUSB0` or `/dev/ttyACM0`.
    pub path: String,
    /// `true` for USB-attached ports.
    pub usb: bool,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

impl DeviceInfo {
    /// Builds a USB device entry.
    pub fn usb(path: impl Into<String>, vid: u16, pid: u16) -> Self {
        Self {
            path: path.into(),
            usb: true,
            vid: Some(vid),
            pid: Some(pid),
            product: None,
        }
    }
}

/// Rules for picking the printer among the discovered ports.
///
/// Order of preference:
/// 1. the explicitly configured `path`;
/// 2. a USB port matching the remembered `vid`/`pid`;
/// 3. the first USB port;
/// 4. the first non-USB port, only if `allow_non_usb` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelector {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub vid: Option<u16>,
    #[serde(default)]
    pub pid: Option<u16>,
    #[serde(default)]
    pub allow_non_usb: bool,
}

impl DeviceSelector {
    /// Picks the best candidate, or `None` if nothing qualifies.
    pub fn select<'a>(&self, devices: &'a [DeviceInfo]) -> Option<&'a DeviceInfo> {
        if let Some(path) = &self.path {
            return devices.iter().find(|d| &d.path == path);
        }

        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            if let Some(found) = devices
                .iter()
                .find(|d| d.usb && d.vid == Some(vid) && d.pid == Some(pid))
            {
                return Some(found);
            }
        }

        devices
            .iter()
            .find(|d| d.usb)
            .or_else(|| devices.iter().find(|_| self.allow_non_usb))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tty(path: &str) -> DeviceInfo {
        DeviceInfo {
            path: path.to_string(),
            usb: false,
            vid: None,
            pid: None,
            product: None,
        }
    }

    #[test]
    fn test_eight_n_one_defaults() {
        let settings = LineSettings::eight_n_one(115200);
        assert_eq!(settings.baud_rate, 115200);
        assert_eq!(settings.data_bits, 8);
        assert_eq!(settings.stop_bits, StopBits::One);
        assert_eq!(settings.parity, Parity::None);
    }

    #[test]
    fn test_select_prefers_configured_path() {
        // Arrange
        let devices = vec![
            DeviceInfo::usb("/dev/ttyUSB0", 0x1a86, 0x7523),
            DeviceInfo::usb("/dev/ttyACM0", 0x2341, 0x0042),
        ];
        let selector = DeviceSelector {
            path: Some("/dev/ttyACM0".to_string()),
            ..Default::default()
        };

        // Act
        let picked = selector.select(&devices);

        // Assert
        assert_eq!(picked.map(|d| d.path.as_str()), Some("/dev/ttyACM0"));
    }

    #[test]
    fn test_select_configured_path_missing_returns_none() {
        let devices = vec![DeviceInfo::usb("/dev/ttyUSB0", 1, 2)];
        let selector = DeviceSelector {
            path: Some("/dev/ttyACM9".to_string()),
            ..Default::default()
        };
        assert!(selector.select(&devices).is_none());
    }

    #[test]
    fn test_select_prefers_remembered_vid_pid() {
        let devices = vec![
            DeviceInfo::usb("/dev/ttyUSB0", 0x1a86, 0x7523),
            DeviceInfo::usb("/dev/ttyACM0", 0x2341, 0x0042),
        ];
        let selector = DeviceSelector {
            vid: Some(0x2341),
            pid: Some(0x0042),
            ..Default::default()
        };
        assert_eq!(selector.select(&devices).unwrap().path, "/dev/ttyACM0");
    }

    #[test]
    fn test_select_falls_back_to_first_usb() {
        let devices = vec![tty("/dev/ttyS0"), DeviceInfo::usb("/dev/ttyUSB0", 1, 2)];
        let selector = DeviceSelector {
            vid: Some(9),
            pid: Some(9),
            ..Default::default()
        };
        assert_eq!(selector.select(&devices).unwrap().path, "/dev/ttyUSB0");
    }

    #[test]
    fn test_select_ignores_non_usb_by_default() {
        let devices = vec![tty("/dev/ttyS0")];
        assert!(DeviceSelector::default().select(&devices).is_none());

        let selector = DeviceSelector {
            allow_non_usb: true,
            ..Default::default()
        };
        assert_eq!(selector.select(&devices).unwrap().path, "/dev/ttyS0");
    }

    #[test]
    fn test_select_empty_list_is_none() {
        assert!(DeviceSelector::default().select(&[]).is_none());
    }
}
