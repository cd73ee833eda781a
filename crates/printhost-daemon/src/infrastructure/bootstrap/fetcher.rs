//! Where the bootstrap archive comes from.

use std::io::Read;
use std::time::Duration;

use tracing::info;

use super::InstallError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Opens a byte stream for an archive URL.
///
/// The installer reads the stream once, front to back, extracting entries as
/// they arrive.  Nothing is buffered to disk first.
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveFetcher: Send + Sync {
    /// # Errors
    ///
    /// [`InstallError::Download`] if the archive cannot be requested.
    fn fetch(&self, url: &str) -> Result<Box<dyn Read + Send>, InstallError>;
}

/// Production fetcher: a plain HTTP(S) GET.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Self { agent }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Box<dyn Read + Send>, InstallError> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| InstallError::Download {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        match response.header("Content-Length") {
            Some(length) => info!("downloading {url} ({length} bytes)"),
            None => info!("downloading {url}"),
        }
        Ok(Box::new(response.into_reader()))
    }
}

/// Bootstrap architecture name for the CPU this binary was built for.
///
/// Returns `None` on architectures no bootstrap archive exists for.
pub fn current_arch() -> Option<&'static str> {
    arch_name(std::env::consts::ARCH)
}

/// Maps a Rust target architecture to the bootstrap archive's naming.
pub fn arch_name(rust_arch: &str) -> Option<&'static str> {
    match rust_arch {
        "aarch64" => Some("aarch64"),
        "arm" => Some("arm"),
        "x86_64" => Some("x86_64"),
        "x86" => Some("i686"),
        _ => None,
    }
}

/// Substitutes `{arch}` in `template`.
pub fn resolve_archive_url(template: &str, arch: &str) -> String {
    template.replace("{arch}", arch)
}
