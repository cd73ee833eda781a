//! Lifecycle states of a supervised child process.
//!
//! ```text
//!            start()
//!  Stopped ──────────▶ Starting ──ready line──▶ Running
//!     ▲                   │                        │
//!     │ exit 0 /          │ stop()                 │ stop()
//!     │ requested stop    ▼                        ▼
//!     └──────────────── Stopping ◀─────────────────┘
//!
//!  Starting / Running ──nonzero exit, not requested──▶ Crashed
//! ```
//!
//! The supervisor never restarts anything on its own; a `Crashed` process
//! stays crashed until somebody calls `start` again.

use serde::{Deserialize, Serialize};

/// Status of one supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl ProcessStatus {
    /// `Stopped` and `Crashed` end a supervision entry.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed)
    }

    /// `true` while a child process exists.
    pub fn is_alive(self) -> bool {
        !self.is_terminal()
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;
        match (self, next) {
            (Stopped | Crashed, Starting) => true,
            (Starting, Running | Stopping | Stopped | Crashed) => true,
            (Running, Stopping | Stopped | Crashed) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }

    /// Maps a process exit to its terminal status.
    ///
    /// A stop that was asked for always ends in `Stopped`, whatever the exit
    /// code.  Otherwise exit code 0 is `Stopped` and anything else, including
    /// death by signal (`None`), is `Crashed`.
    pub fn from_exit(code: Option<i32>, stop_requested: bool) -> ProcessStatus {
        match (stop_requested, code) {
            (true, _) => Self::Stopped,
            (false, Some(0)) => Self::Stopped,
            (false, _) => Self::Crashed,
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        };
        f.write_str(label)
    }
}
