//! One-shot installation of the bootstrap Linux user space.
//!
//! # What gets installed (for beginners)
//!
//! The print server needs Python, a shell, and the usual userland tools.
//! They ship as a zip archive per CPU architecture.  Installing it means:
//!
//! 1. **Preparing** – wipe any leftover staging directory from an earlier,
//!    failed attempt and create it again.
//! 2. **Downloading / Extracting** – stream the archive and unpack each entry
//!    into the staging directory as it arrives.  Paths under `bin/`,
//!    `libexec` and `lib/apt/methods` become executable.
//! 3. **Linking symlinks** – zip cannot store symlinks, so the archive carries
//!    a `SYMLINKS.txt` manifest instead.  Links are created only after every
//!    regular entry exists.
//! 4. **Finalizing** – rename the staging directory to its final name.
//!
//! The final directory existing is the only "already installed" signal.  A
//! failure leaves the staging directory behind for inspection; the next call
//! starts over from scratch.

pub mod fetcher;

use std::fs::{self, File, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use printhost_core::protocol::SYMLINK_MANIFEST_NAME;
use printhost_core::{parse_symlink_manifest, EventSink, HostEvent, InstallPhase, ManifestError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

pub use fetcher::{current_arch, resolve_archive_url, ArchiveFetcher, HttpFetcher};

/// Entry-name prefixes that receive [`EXECUTABLE_MODE`].
pub const EXECUTABLE_PREFIXES: [&str; 3] = ["bin/", "libexec", "lib/apt/methods"];

pub const EXECUTABLE_MODE: u32 = 0o700;

/// Error type for [`BootstrapInstaller::ensure_installed`].
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("failed to prepare staging directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("malformed bootstrap archive: {0}")]
    MalformedArchive(String),

    #[error("failed to extract {path}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed bootstrap archive: no SYMLINKS.txt")]
    MissingManifest,

    #[error("malformed bootstrap archive: SYMLINKS.txt lists no symlinks")]
    EmptyManifest,

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("failed to link {link} -> {target}: {source}")]
    Symlink {
        link: PathBuf,
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to move {from} to {to}: {source}")]
    Finalize {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl InstallError {
    /// The phase the installer was in when this error occurred.
    pub fn phase(&self) -> InstallPhase {
        match self {
            Self::Prepare { .. } => InstallPhase::Preparing,
            Self::Download { .. } => InstallPhase::Downloading,
            Self::MalformedArchive(_) | Self::Extract { .. } => InstallPhase::Extracting,
            Self::MissingManifest
            | Self::EmptyManifest
            | Self::Manifest(_)
            | Self::Symlink { .. } => InstallPhase::LinkingSymlinks,
            Self::Finalize { .. } => InstallPhase::Finalizing,
        }
    }
}

/// What to do with an archive whose symlink manifest lists nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymlinkPolicy {
    /// A missing or empty manifest fails the installation.
    #[default]
    RequireNonEmpty,
    /// A missing or empty manifest installs without links.
    AllowEmpty,
}

/// Result of a successful [`BootstrapInstaller::ensure_installed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    AlreadyInstalled,
    Installed { files: usize, symlinks: usize },
}

/// Staging directory used for `target`: a sibling named `<target>-staging`.
pub fn staging_dir_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bootstrap".to_string());
    target.with_file_name(format!("{name}-staging"))
}

fn is_executable_entry(name: &str) -> bool {
    EXECUTABLE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Counts bytes as they are read so the download size can be logged.
struct CountingReader<R> {
    inner: R,
    bytes: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }
}

/// Fetches and unpacks the bootstrap archive.
pub struct BootstrapInstaller<F: ArchiveFetcher> {
    fetcher: F,
    policy: SymlinkPolicy,
    events: Arc<dyn EventSink>,
}

impl<F: ArchiveFetcher> BootstrapInstaller<F> {
    pub fn new(fetcher: F, policy: SymlinkPolicy, events: Arc<dyn EventSink>) -> Self {
        Self {
            fetcher,
            policy,
            events,
        }
    }

    pub fn policy(&self) -> SymlinkPolicy {
        self.policy
    }

    /// Installs the archive at `url` into `target` unless `target` exists.
    ///
    /// Blocking; run it with `spawn_blocking` from async code.
    ///
    /// # Errors
    ///
    /// Any [`InstallError`].  [`InstallError::phase`] tells where it failed.
    /// The staging directory is left in place.
    pub fn ensure_installed(
        &self,
        url: &str,
        target: &Path,
    ) -> Result<InstallOutcome, InstallError> {
        if target.exists() {
            debug!("bootstrap already installed at {}", target.display());
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        let staging = staging_dir_for(target);
        info!(
            "installing bootstrap from {url} into {} (staging {})",
            target.display(),
            staging.display()
        );

        match self.install(url, &staging, target) {
            Ok(outcome) => {
                self.phase(InstallPhase::Completed);
                info!("bootstrap installed: {outcome:?}");
                Ok(outcome)
            }
            Err(e) => {
                let phase = e.phase();
                error!("bootstrap installation failed while {phase}: {e}");
                self.events.emit(HostEvent::InstallFailed {
                    phase,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn phase(&self, phase: InstallPhase) {
        debug!("bootstrap phase: {phase}");
        self.events.emit(HostEvent::InstallPhaseChanged { phase });
    }

    fn install(
        &self,
        url: &str,
        staging: &Path,
        target: &Path,
    ) -> Result<InstallOutcome, InstallError> {
        self.phase(InstallPhase::Preparing);
        prepare_staging(staging)?;

        self.phase(InstallPhase::Downloading);
        let stream = self.fetcher.fetch(url)?;
        let mut reader = CountingReader {
            inner: stream,
            bytes: 0,
        };

        self.phase(InstallPhase::Extracting);
        let (files, manifest) = extract_all(&mut reader, url, staging)?;
        info!("extracted {files} entries ({} bytes downloaded)", reader.bytes);

        self.phase(InstallPhase::LinkingSymlinks);
        let symlinks = match manifest {
            Some(text) => create_symlinks(staging, &text, self.policy)?,
            None if self.policy == SymlinkPolicy::AllowEmpty => 0,
            None => return Err(InstallError::MissingManifest),
        };

        self.phase(InstallPhase::Finalizing);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| InstallError::Finalize {
                from: staging.to_path_buf(),
                to: target.to_path_buf(),
                source,
            })?;
        }
        fs::rename(staging, target).map_err(|source| InstallError::Finalize {
            from: staging.to_path_buf(),
            to: target.to_path_buf(),
            source,
        })?;

        Ok(InstallOutcome::Installed { files, symlinks })
    }
}

fn prepare_staging(staging: &Path) -> Result<(), InstallError> {
    let wrap = |source| InstallError::Prepare {
        path: staging.to_path_buf(),
        source,
    };
    if staging.exists() {
        debug!("removing stale staging directory {}", staging.display());
        fs::remove_dir_all(staging).map_err(wrap)?;
    }
    fs::create_dir_all(staging).map_err(wrap)
}

/// Unpacks every entry and returns the entry count and the manifest text.
fn extract_all<R: Read>(
    reader: &mut R,
    url: &str,
    staging: &Path,
) -> Result<(usize, Option<String>), InstallError> {
    let mut files = 0;
    let mut manifest = None;

    loop {
        let mut entry = match zip::read::read_zipfile_from_stream(reader) {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(zip::result::ZipError::Io(e)) => {
                return Err(InstallError::Download {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
            Err(e) => return Err(InstallError::MalformedArchive(e.to_string())),
        };

        let name = entry.name().to_string();
        if name == SYMLINK_MANIFEST_NAME {
            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .map_err(|e| InstallError::MalformedArchive(format!("{name}: {e}")))?;
            manifest = Some(text);
            continue;
        }

        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                InstallError::MalformedArchive(format!("entry escapes root: {name}"))
            })?;
        let path = staging.join(&relative);
        let wrap = |source| InstallError::Extract {
            path: path.clone(),
            source,
        };

        if entry.is_dir() {
            fs::create_dir_all(&path).map_err(wrap)?;
            continue;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(wrap)?;
        }
        let mut file = File::create(&path).map_err(wrap)?;
        io::copy(&mut entry, &mut file).map_err(wrap)?;
        if is_executable_entry(&name) {
            fs::set_permissions(&path, Permissions::from_mode(EXECUTABLE_MODE))
                .map_err(wrap)?;
        }
        files += 1;
    }

    Ok((files, manifest))
}

fn create_symlinks(
    staging: &Path,
    text: &str,
    policy: SymlinkPolicy,
) -> Result<usize, InstallError> {
    let entries = parse_symlink_manifest(text)?;
    if entries.is_empty() && policy == SymlinkPolicy::RequireNonEmpty {
        return Err(InstallError::EmptyManifest);
    }

    for entry in &entries {
        let link = staging.join(&entry.link);
        let wrap = |source| InstallError::Symlink {
            link: link.clone(),
            target: entry.target.clone(),
            source,
        };
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent).map_err(wrap)?;
        }
        if fs::symlink_metadata(&link).is_ok() {
            fs::remove_file(&link).map_err(wrap)?;
        }
        std::os::unix::fs::symlink(&entry.target, &link).map_err(wrap)?;
    }
    debug!("created {} symlinks", entries.len());
    Ok(entries.len())
}
