//! Status events emitted by the core for the surrounding UI.
//!
//! Components never talk to the UI directly.  They push [`HostEvent`]s into
//! an [`EventSink`] handed to them at construction; the daemon fans those out
//! to its status board and log.  Serialization (`serde`) is only used when an
//! event crosses the process boundary.

use serde::{Deserialize, Serialize};

use crate::domain::process::ProcessStatus;

/// Steps of a bootstrap installation, in the order they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    /// Checking whether the target already exists and wiping stale staging.
    Preparing,
    Downloading,
    Extracting,
    LinkingSymlinks,
    /// Renaming the staging directory into place.
    Finalizing,
    Completed,
}

impl std::fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Preparing => "preparing",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::LinkingSymlinks => "linking symlinks",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// Every status change the core reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    InstallPhaseChanged {
        phase: InstallPhase,
    },
    InstallFailed {
        phase: InstallPhase,
        message: String,
    },
    ProcessStatusChanged {
        name: String,
        status: ProcessStatus,
    },
    /// First readiness line seen; fires once per start.
    ProcessReady {
        name: String,
    },
    UsbAttached {
        port: String,
    },
    UsbDetached,
    CameraServerStarted {
        addr: String,
    },
    CameraServerStopped,
}

/// Receiver of [`HostEvent`]s.
///
/// Implementations must not block; emitting happens on hot paths such as the
/// bridge read loop.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: HostEvent);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: HostEvent) {}
}

impl<F> EventSink for F
where
    F: Fn(HostEvent) + Send + Sync,
{
    fn emit(&self, event: HostEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn test_closure_sink_receives_events() {
        // Arrange
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink = move |event: HostEvent| seen_clone.lock().unwrap().push(event);

        // Act
        sink.emit(HostEvent::UsbDetached);

        // Assert
        assert_eq!(*seen.lock().unwrap(), vec![HostEvent::UsbDetached]);
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = HostEvent::ProcessStatusChanged {
            name: "octoprint".to_string(),
            status: ProcessStatus::Running,
        };

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "process_status_changed");
        assert_eq!(json["status"], "running");
    }

    #[test]
    fn test_install_failed_carries_phase() {
        let json = serde_json::to_value(HostEvent::InstallFailed {
            phase: InstallPhase::LinkingSymlinks,
            message: "no manifest".to_string(),
        })
        .unwrap();
        assert_eq!(json["phase"], "linking_symlinks");
    }
}
