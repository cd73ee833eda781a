//! Discovery of add-on scripts under the extensions directory.
//!
//! Layout of one extension:
//!
//! ```text
//! <extensions>/webcamd/
//!     manifest.json    {"title": "...", "description": "..."}
//!     start.sh         required, run through the bootstrap shell
//!     kill.sh          optional, used for a graceful stop
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{ProcessSpec, RuntimeEnv};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const START_SCRIPT: &str = "start.sh";
pub const KILL_SCRIPT: &str = "kill.sh";

/// Supervisor names of extensions carry this prefix so they cannot clash
/// with the print server.
pub const PROCESS_PREFIX: &str = "ext:";

#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} has no start.sh")]
    MissingStartScript { path: PathBuf },

    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// One installed extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    /// Directory name; also the key in the `enabled` list.
    pub name: String,
    pub dir: PathBuf,
    pub manifest: ExtensionManifest,
    pub has_kill_script: bool,
}

impl Extension {
    /// Reads the extension in `dir`.
    ///
    /// # Errors
    ///
    /// Fails if `start.sh` is missing or `manifest.json` is missing or not
    /// valid JSON.
    pub fn load(dir: &Path) -> Result<Self, ExtensionError> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !dir.join(START_SCRIPT).is_file() {
            return Err(ExtensionError::MissingStartScript {
                path: dir.to_path_buf(),
            });
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        let text = fs::read_to_string(&manifest_path).map_err(|source| ExtensionError::Io {
            path: manifest_path.clone(),
            source,
        })?;
        let manifest = serde_json::from_str(&text).map_err(|source| ExtensionError::Manifest {
            path: manifest_path,
            source,
        })?;

        Ok(Self {
            name,
            has_kill_script: dir.join(KILL_SCRIPT).is_file(),
            dir: dir.to_path_buf(),
            manifest,
        })
    }

    pub fn process_name(&self) -> String {
        format!("{PROCESS_PREFIX}{}", self.name)
    }

    /// Spec that runs `start.sh` in the bootstrap environment, with
    /// `kill.sh` as the graceful stop command when present.
    pub fn process_spec(&self, env: &RuntimeEnv) -> ProcessSpec {
        let start = self.dir.join(START_SCRIPT);
        let mut spec =
            env.shell_command(self.process_name(), &format!("sh {}", start.display()));
        if self.has_kill_script {
            let kill = self.dir.join(KILL_SCRIPT);
            let stop = env.shell_stop_command(&format!("sh {}", kill.display()));
            spec = spec.with_stop_command(stop);
        }
        spec
    }
}

/// Lists every valid extension under `root`, sorted by name.
///
/// A missing `root` yields an empty list.  Invalid extension directories are
/// skipped with a warning.
///
/// # Errors
///
/// [`ExtensionError::Io`] if `root` exists but cannot be listed.
pub fn discover_extensions(root: &Path) -> Result<Vec<Extension>, ExtensionError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("no extensions directory at {}", root.display());
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(ExtensionError::Io {
                path: root.to_path_buf(),
                source,
            })
        }
    };

    let mut found = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!("skipping unreadable entry in {}: {e}", root.display());
                continue;
            }
        };
        if !path.is_dir() {
            continue;
        }
        match Extension::load(&path) {
            Ok(extension) => found.push(extension),
            Err(e) => warn!("skipping extension: {e}"),
        }
    }
    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::domain::Readiness;

    fn temp_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("printhost_ext_{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_extension(root: &Path, name: &str, manifest: Option<&str>, kill: bool) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(START_SCRIPT), "echo started\n").unwrap();
        if let Some(manifest) = manifest {
            fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        }
        if kill {
            fs::write(dir.join(KILL_SCRIPT), "echo killed\n").unwrap();
        }
    }

    #[test]
    fn test_discover_skips_invalid_and_sorts() {
        // Arrange
        let root = temp_root();
        write_extension(&root, "zeta", Some(r#"{"title": "Zeta"}"#), false);
        write_extension(&root, "alpha", Some(r#"{"title": "Alpha", "description": "a"}"#), true);
        write_extension(&root, "broken", Some("{not json"), false);
        write_extension(&root, "nomanifest", None, false);
        fs::create_dir_all(root.join("nostart")).unwrap();
        fs::write(root.join("nostart").join(MANIFEST_FILE), r#"{"title": "x"}"#).unwrap();
        fs::write(root.join("stray-file"), "x").unwrap();

        // Act
        let found = discover_extensions(&root).unwrap();

        // Assert
        let names: Vec<&str> = found.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(found[0].has_kill_script);
        assert_eq!(found[0].manifest.description, "a");
        assert!(!found[1].has_kill_script);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let root = std::env::temp_dir().join(format!("printhost_ext_{}", Uuid::new_v4()));
        assert!(discover_extensions(&root).unwrap().is_empty());
    }

    #[test]
    fn test_process_spec_uses_kill_script_as_stop_command() {
        let root = temp_root();
        write_extension(&root, "cam", Some(r#"{"title": "Cam"}"#), true);
        let extension = Extension::load(&root.join("cam")).unwrap();
        let env = RuntimeEnv::new("/data/files");

        let spec = extension.process_spec(&env);

        assert_eq!(spec.name, "ext:cam");
        assert!(matches!(spec.readiness, Readiness::Immediate));
        assert!(spec.args[1].ends_with(&format!("sh {}", root.join("cam/start.sh").display())));
        let stop = spec.stop_command.expect("kill.sh present");
        assert!(stop.args[1].ends_with("cam/kill.sh"));
        let _ = fs::remove_dir_all(root);
    }
}
