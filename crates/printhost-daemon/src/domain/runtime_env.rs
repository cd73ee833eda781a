//! Environment every supervised child process runs in.
//!
//! The bootstrap archive unpacks a small Linux user space under
//! `<root>/usr`.  Children must see that tree first on `PATH` and as their
//! library path, and they start in `<root>/home`:
//!
//! ```text
//! PREFIX=<root>/usr
//! HOME=<root>/home
//! LD_LIBRARY_PATH=<root>/usr/lib
//! PATH=<root>/usr/bin:<root>/usr/bin/applets:<system path>
//! PWD=<root>/home
//! LANG=en_US.UTF-8
//! ```

use std::path::{Path, PathBuf};

use super::process_spec::{ProcessSpec, Readiness, StopCommand};

/// Android's default search path, appended after the bootstrap directories.
pub const ANDROID_SYSTEM_PATH: &str = "/sbin:/system/sbin:/product/bin:/apex/com.android.runtime/bin:/system/bin:/system/xbin:/odm/bin:/vendor/bin:/vendor/xbin";

/// Default locale exported to children.
pub const DEFAULT_LANG: &str = "en_US.UTF-8";

/// Paths and variables derived from the data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnv {
    root: PathBuf,
    system_path: String,
    lang: String,
    shell: Option<PathBuf>,
}

impl RuntimeEnv {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            system_path: ANDROID_SYSTEM_PATH.to_string(),
            lang: DEFAULT_LANG.to_string(),
            shell: None,
        }
    }

    /// Replaces the system path appended to `PATH`.
    pub fn with_system_path(mut self, system_path: impl Into<String>) -> Self {
        self.system_path = system_path.into();
        self
    }

    /// Uses `shell` instead of `<prefix>/bin/sh` for shell commands.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final installation directory of the bootstrap.
    pub fn prefix(&self) -> PathBuf {
        self.root.join("usr")
    }

    /// Extraction directory, renamed to [`prefix`](Self::prefix) on success.
    pub fn staging(&self) -> PathBuf {
        self.root.join("usr-staging")
    }

    pub fn home(&self) -> PathBuf {
        self.root.join("home")
    }

    pub fn shell(&self) -> PathBuf {
        self.shell
            .clone()
            .unwrap_or_else(|| self.prefix().join("bin").join("sh"))
    }

    /// The complete child environment, in a stable order.
    pub fn vars(&self) -> Vec<(String, String)> {
        let prefix = self.prefix();
        let home = self.home();
        let path = format!(
            "{bin}:{applets}:{system}",
            bin = prefix.join("bin").display(),
            applets = prefix.join("bin").join("applets").display(),
            system = self.system_path,
        );

        vec![
            ("PREFIX".to_string(), prefix.display().to_string()),
            ("HOME".to_string(), home.display().to_string()),
            (
                "LD_LIBRARY_PATH".to_string(),
                prefix.join("lib").display().to_string(),
            ),
            ("PATH".to_string(), path),
            ("PWD".to_string(), home.display().to_string()),
            ("LANG".to_string(), self.lang.clone()),
        ]
    }

    /// Creates the home directory if it does not exist yet.
    pub fn ensure_home(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.home())
    }

    fn shell_args(&self, command: &str) -> Vec<String> {
        vec![
            "-c".to_string(),
            format!("cd {} && {command}", self.home().display()),
        ]
    }

    /// Spec running `command` through the bootstrap shell from `HOME`.
    pub fn shell_command(&self, name: impl Into<String>, command: &str) -> ProcessSpec {
        ProcessSpec {
            name: name.into(),
            program: self.shell().display().to_string(),
            args: self.shell_args(command),
            env: self.vars(),
            cwd: Some(self.home()),
            readiness: Readiness::Immediate,
            stop_command: None,
        }
    }

    /// Stop command running `command` the same way as
    /// [`shell_command`](Self::shell_command).
    pub fn shell_stop_command(&self, command: &str) -> StopCommand {
        StopCommand {
            program: self.shell().display().to_string(),
            args: self.shell_args(command),
        }
    }
}
