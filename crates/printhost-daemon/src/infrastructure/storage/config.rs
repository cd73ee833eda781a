//! TOML-based configuration persistence for the daemon.
//!
//! Reads and writes [`AppConfig`] at `$XDG_CONFIG_HOME/printhost/config.toml`
//! (or `~/.config/printhost/config.toml`).  `--config` on the command line
//! points somewhere else.
//!
//! ```toml
//! [host]
//! data_dir = "/data/data/com.printhost/files"
//!
//! [serial]
//! framing = "lines"
//! write_timeout_ms = 5000
//!
//! [camera]
//! port = 5001
//!
//! [print_server]
//! command = "octoprint serve --iknowwhatimdoing"
//! readiness_marker = "Listening on"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "...")]`, and every section is
//! `#[serde(default)]`, so an empty file is a complete configuration and an
//! older file picks up fields added later.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use printhost_core::{DeviceSelector, Framing};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::bootstrap::SymlinkPolicy;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but makes no sense, e.g. an unparseable bind address.
    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level daemon configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub print_server: PrintServerConfig,
    #[serde(default)]
    pub extensions: ExtensionsConfig,
}

/// Where the daemon keeps its files and how loudly it logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Root of everything the daemon writes: the bootstrap tree, `home/`,
    /// and the serial FIFOs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Named pipe, relative to the runtime `HOME`, the print server writes
    /// restart/stop requests into.
    #[serde(default = "default_event_pipe")]
    pub event_pipe: String,
}

/// Where the bootstrap archive comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BootstrapConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Download URL; `{arch}` is replaced with the CPU architecture.
    #[serde(default = "default_archive_url")]
    pub archive_url: String,
    #[serde(default)]
    pub symlink_policy: SymlinkPolicy,
}

/// Virtual serial channel and USB device settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub framing: Framing,
    /// FIFO the bridge writes printer output into, relative to `data_dir`.
    #[serde(default = "default_input_fifo")]
    pub input_fifo: String,
    /// FIFO the print server writes printer commands into, relative to
    /// `data_dir`.
    #[serde(default = "default_output_fifo")]
    pub output_fifo: String,
    #[serde(default)]
    pub device: DeviceSelector,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// MJPEG camera server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_camera_port")]
    pub port: u16,
    /// Command whose stdout is a concatenated JPEG stream.  Empty means
    /// frames come from elsewhere.
    #[serde(default)]
    pub capture_program: String,
    #[serde(default)]
    pub capture_args: Vec<String>,
    #[serde(default = "default_capture_restart_ms")]
    pub capture_restart_ms: u64,
}

/// The supervised print server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrintServerConfig {
    /// Shell command run from the runtime `HOME`.
    #[serde(default = "default_print_server_command")]
    pub command: String,
    /// Output substring that marks the server as started.
    #[serde(default = "default_readiness_marker")]
    pub readiness_marker: String,
    /// Shell command for a graceful stop.  Empty sends SIGTERM instead.
    #[serde(default = "default_stop_command")]
    pub stop_command: String,
    #[serde(default = "default_true")]
    pub autostart: bool,
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
}

/// Add-on scripts started next to the print server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtensionsConfig {
    /// Extension root, relative to the runtime `HOME`.
    #[serde(default = "default_extensions_dir")]
    pub dir: String,
    /// Directory names of the extensions to start.
    #[serde(default)]
    pub enabled: Vec<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
        })
        .map(|base| base.join("printhost"))
        .unwrap_or_else(|| PathBuf::from("printhost-data"))
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_event_pipe() -> String {
    "eventPipe".to_string()
}
fn default_true() -> bool {
    true
}
fn default_archive_url() -> String {
    "https://raw.githubusercontent.com/feelfreelinux/octo4a/master/termux-based-approach/bootstrap-{arch}.zip"
        .to_string()
}
fn default_input_fifo() -> String {
    "serial-input".to_string()
}
fn default_output_fifo() -> String {
    "serial-output".to_string()
}
fn default_write_timeout_ms() -> u64 {
    5000
}
fn default_read_timeout_ms() -> u64 {
    100
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_camera_port() -> u16 {
    5001
}
fn default_capture_restart_ms() -> u64 {
    2000
}
fn default_print_server_command() -> String {
    "octoprint serve --iknowwhatimdoing".to_string()
}
fn default_readiness_marker() -> String {
    "Listening on".to_string()
}
fn default_stop_command() -> String {
    "kill `pidof octoprint`".to_string()
}
fn default_kill_grace_secs() -> u64 {
    10
}
fn default_extensions_dir() -> String {
    "extensions".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            event_pipe: default_event_pipe(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            archive_url: default_archive_url(),
            symlink_policy: SymlinkPolicy::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            framing: Framing::default(),
            input_fifo: default_input_fifo(),
            output_fifo: default_output_fifo(),
            device: DeviceSelector::default(),
            write_timeout_ms: default_write_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            bind_address: default_bind_address(),
            port: default_camera_port(),
            capture_program: String::new(),
            capture_args: Vec::new(),
            capture_restart_ms: default_capture_restart_ms(),
        }
    }
}

impl Default for PrintServerConfig {
    fn default() -> Self {
        Self {
            command: default_print_server_command(),
            readiness_marker: default_readiness_marker(),
            stop_command: default_stop_command(),
            autostart: default_true(),
            kill_grace_secs: default_kill_grace_secs(),
        }
    }
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            dir: default_extensions_dir(),
            enabled: Vec::new(),
        }
    }
}

impl CameraConfig {
    /// Socket address built from `bind_address` and `port`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if `bind_address` is not an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                field: "camera.bind_address",
                message: format!("{:?}: {e}", self.bind_address),
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn capture_restart_delay(&self) -> Duration {
        Duration::from_millis(self.capture_restart_ms)
    }
}

impl SerialConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl PrintServerConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when neither
/// `XDG_CONFIG_HOME` nor `HOME` is set.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// `$XDG_CONFIG_HOME/printhost`, falling back to `~/.config/printhost`.
fn platform_config_dir() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("printhost"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
