//! Description of a child process the supervisor should run.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// How the supervisor decides that a process has finished starting.
#[derive(Clone)]
pub enum Readiness {
    /// Running as soon as the spawn succeeds.
    Immediate,
    /// Running on the first output line containing this substring.
    Marker(String),
    /// Running on the first output line the predicate accepts.
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Readiness {
    /// Whether `line` signals readiness.  Always `false` for `Immediate`,
    /// which never looks at output.
    pub fn matches(&self, line: &str) -> bool {
        match self {
            Self::Immediate => false,
            Self::Marker(marker) => line.contains(marker.as_str()),
            Self::Custom(predicate) => predicate(line),
        }
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("Immediate"),
            Self::Marker(marker) => f.debug_tuple("Marker").field(marker).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Script run for a graceful stop, e.g. an extension's `kill.sh`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Everything needed to spawn and stop one supervised process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Unique supervisor key, e.g. `"octoprint"` or `"ext:webcamd"`.
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Variables set on top of the daemon's own environment.
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub readiness: Readiness,
    pub stop_command: Option<StopCommand>,
}

impl ProcessSpec {
    /// A spec with no environment, no working directory, and immediate
    /// readiness.  Adjust the public fields as needed.
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            env: Vec::new(),
            cwd: None,
            readiness: Readiness::Immediate,
            stop_command: None,
        }
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_stop_command(mut self, stop_command: StopCommand) -> Self {
        self.stop_command = Some(stop_command);
        self
    }
}
