//! Camera server configuration types.
//!
//! [`StreamConfig`] holds everything the HTTP side needs; [`CaptureConfig`]
//! describes the external command that produces MJPEG bytes.  Both are plain
//! structs so the daemon can fill them from its TOML file and CLI flags, and
//! tests can build them directly.

use std::net::SocketAddr;
use std::time::Duration;

/// Runtime configuration for the MJPEG HTTP server.
///
/// # Example
///
/// ```rust
/// use printhost_camera::StreamConfig;
///
/// let cfg = StreamConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 5001);
/// ```
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Address the HTTP server listens on.
    ///
    /// The print server reaches the stream through `localhost`, LAN viewers
    /// through the phone's Wi-Fi address, hence `0.0.0.0` by default.
    pub bind_addr: SocketAddr,

    /// Sleep between polls while the frame buffer is still empty.
    ///
    /// Only applies before the first frame exists.  Once a frame is present
    /// `/mjpeg` streams without any delay.
    pub empty_frame_backoff: Duration,

    /// Longest time `/snapshot` waits for a frame newer than the one in the
    /// buffer.  The capture loop only publishes while somebody listens.
    pub snapshot_wait: Duration,

    /// Optional capture command.  `None` leaves frame production to the
    /// embedding application.
    pub capture: Option<CaptureConfig>,
}

impl Default for StreamConfig {
    /// | Field               | Default         |
    /// |---------------------|-----------------|
    /// | bind_addr           | `0.0.0.0:5001`  |
    /// | empty_frame_backoff | 10 ms           |
    /// | snapshot_wait       | 500 ms          |
    /// | capture             | none            |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5001)),
            empty_frame_backoff: Duration::from_millis(10),
            snapshot_wait: Duration::from_millis(500),
            capture: None,
        }
    }
}

/// External process whose stdout is a concatenated JPEG stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Delay before relaunching the command after it exits.
    pub restart_delay: Duration,
}

impl CaptureConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            restart_delay: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bind_port_is_5001() {
        // Arrange / Act
        let cfg = StreamConfig::default();

        // Assert
        assert_eq!(cfg.bind_addr.port(), 5001);
        assert!(cfg.bind_addr.ip().is_unspecified());
    }

    #[test]
    fn test_default_backoff_is_10ms() {
        assert_eq!(StreamConfig::default().empty_frame_backoff, Duration::from_millis(10));
    }

    #[test]
    fn test_default_snapshot_wait_is_half_a_second() {
        assert_eq!(StreamConfig::default().snapshot_wait, Duration::from_millis(500));
    }

    #[test]
    fn test_default_has_no_capture_command() {
        assert!(StreamConfig::default().capture.is_none());
    }

    #[test]
    fn test_capture_config_new_uses_two_second_restart() {
        let capture = CaptureConfig::new("ffmpeg", vec!["-f".into(), "mjpeg".into()]);
        assert_eq!(capture.restart_delay, Duration::from_secs(2));
        assert_eq!(capture.args.len(), 2);
    }
}
