//! Polled view of everything the host is doing.
//!
//! The surrounding UI does not subscribe to individual components.  It polls
//! [`StatusBoard::snapshot`], which is kept current by feeding every
//! [`HostEvent`] through [`StatusBoard::apply`].
//!
//! ```text
//!  installer ─┐
//!  supervisor ├─▶ HostEvent ─▶ StatusBoard::apply ─▶ HostStatus (snapshot)
//!  bridge     │
//!  camera ────┘
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use printhost_core::{HostEvent, InstallPhase, ProcessStatus};
use serde::Serialize;

/// Snapshot of the host, serialisable for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostStatus {
    /// Last installer phase seen; `None` before the installer ran.
    pub install_phase: Option<InstallPhase>,
    pub install_error: Option<String>,
    pub print_server: ProcessStatus,
    /// Set once the print server printed its readiness marker; cleared when
    /// it stops.
    pub print_server_ready: bool,
    /// Path of the attached printer port, if any.
    pub usb_device: Option<String>,
    /// Address of the running camera server, if any.
    pub camera_server: Option<String>,
    /// Every other supervised process, by supervisor name.
    pub extensions: BTreeMap<String, ProcessStatus>,
}

impl Default for HostStatus {
    fn default() -> Self {
        Self {
            install_phase: None,
            install_error: None,
            print_server: ProcessStatus::Stopped,
            print_server_ready: false,
            usb_device: None,
            camera_server: None,
            extensions: BTreeMap::new(),
        }
    }
}

/// Event-driven holder of the current [`HostStatus`].
#[derive(Debug)]
pub struct StatusBoard {
    print_server_name: String,
    status: Mutex<HostStatus>,
}

impl StatusBoard {
    /// `print_server_name` is the supervisor name of the print server;
    /// all other process names count as extensions.
    pub fn new(print_server_name: impl Into<String>) -> Self {
        Self {
            print_server_name: print_server_name.into(),
            status: Mutex::new(HostStatus::default()),
        }
    }

    /// Folds one event into the status.
    pub fn apply(&self, event: &HostEvent) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            HostEvent::InstallPhaseChanged { phase } => {
                status.install_phase = Some(*phase);
                if *phase == InstallPhase::Preparing {
                    status.install_error = None;
                }
            }
            HostEvent::InstallFailed { phase, message } => {
                status.install_phase = Some(*phase);
                status.install_error = Some(message.clone());
            }
            HostEvent::ProcessStatusChanged { name, status: next } => {
                if *name == self.print_server_name {
                    status.print_server = *next;
                    if !matches!(next, ProcessStatus::Running) {
                        status.print_server_ready = false;
                    }
                } else {
                    status.extensions.insert(name.clone(), *next);
                }
            }
            HostEvent::ProcessReady { name } => {
                if *name == self.print_server_name {
                    status.print_server_ready = true;
                }
            }
            HostEvent::UsbAttached { port } => status.usb_device = Some(port.clone()),
            HostEvent::UsbDetached => status.usb_device = None,
            HostEvent::CameraServerStarted { addr } => status.camera_server = Some(addr.clone()),
            HostEvent::CameraServerStopped => status.camera_server = None,
        }
    }

    pub fn snapshot(&self) -> HostStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
