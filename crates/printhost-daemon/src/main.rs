//! PrintHost daemon entry point.
//!
//! Turns the device into a headless 3D-printer host: installs the bootstrap
//! user space, bridges the print server's virtual serial port to the USB
//! printer, serves the camera as MJPEG, and supervises the print server and
//! its extensions.
//!
//! # Usage
//!
//! ```text
//! printhost [OPTIONS]
//!
//! Options:
//!   --config <PATH>      Config file [default: ~/.config/printhost/config.toml]
//!   --data-dir <PATH>    Override [host] data_dir
//!   --camera-port <PORT> Override [camera] port
//!   --no-camera          Do not start the MJPEG server
//!   --skip-bootstrap     Do not download/install the bootstrap archive
//!   --log-level <LEVEL>  Override [host] log_level
//!   --init-config        Write the effective config to --config and exit
//! ```
//!
//! Every option also reads a `PRINTHOST_*` environment variable; CLI args
//! take precedence.
//!
//! # Startup order
//!
//! ```text
//! config ─▶ logging ─▶ bootstrap ─▶ camera ─▶ serial bridge ─▶ print server
//!                                                              ─▶ extensions
//!                                                              ─▶ event pipe
//! ```
//!
//! Shutdown runs in reverse once Ctrl+C clears the shared `running` flag.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle as ThreadHandle;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use printhost_camera::{spawn_capture_loop, CaptureConfig, MjpegServer, StreamConfig};
use printhost_core::{EventSink, FrameBuffer, HostEvent};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use printhost_daemon::application::host_status::StatusBoard;
use printhost_daemon::application::print_server::{
    print_server_spec, PrintServerService, PRINT_SERVER_NAME,
};
use printhost_daemon::application::serial_bridge::{BridgeController, BridgeSettings};
use printhost_daemon::domain::RuntimeEnv;
use printhost_daemon::infrastructure::bootstrap::{
    current_arch, resolve_archive_url, BootstrapInstaller, HttpFetcher,
};
use printhost_daemon::infrastructure::channel::fifo::FifoChannel;
use printhost_daemon::infrastructure::channel::runner::BridgeRunner;
use printhost_daemon::infrastructure::event_bus::EventBus;
use printhost_daemon::infrastructure::event_pipe::EventPipe;
use printhost_daemon::infrastructure::extensions::discover_extensions;
use printhost_daemon::infrastructure::process::ProcessSupervisor;
use printhost_daemon::infrastructure::serial::system::SystemSerialTransport;
use printhost_daemon::infrastructure::storage::config::{
    config_file_path, load_config, save_config, AppConfig, CameraConfig,
};

/// How often the main loop re-checks the shutdown flag.
const MAIN_LOOP_TICK: Duration = Duration::from_millis(100);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// PrintHost daemon.
#[derive(Debug, Parser)]
#[command(
    name = "printhost",
    about = "3D-printer host: serial bridge, camera stream, print-server supervisor",
    version
)]
struct Cli {
    /// Path of the TOML config file.
    #[arg(long, env = "PRINTHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for the bootstrap tree, home, and FIFOs.
    #[arg(long, env = "PRINTHOST_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// TCP port of the MJPEG server.
    #[arg(long, env = "PRINTHOST_CAMERA_PORT")]
    camera_port: Option<u16>,

    /// Do not start the MJPEG server.
    #[arg(long, env = "PRINTHOST_NO_CAMERA")]
    no_camera: bool,

    /// Assume the bootstrap tree is already in place.
    #[arg(long, env = "PRINTHOST_SKIP_BOOTSTRAP")]
    skip_bootstrap: bool,

    /// `tracing` level used when `RUST_LOG` is not set.
    #[arg(long, env = "PRINTHOST_LOG_LEVEL")]
    log_level: Option<String>,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    init_config: bool,
}

impl Cli {
    /// The config file to read: `--config`, or the platform default.
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config_file_path().context("no --config given and no config directory"),
        }
    }

    /// Applies the command-line overrides on top of the file configuration.
    fn apply_overrides(&self, mut config: AppConfig) -> AppConfig {
        if let Some(dir) = &self.data_dir {
            config.host.data_dir = dir.clone();
        }
        if let Some(port) = self.camera_port {
            config.camera.port = port;
        }
        if self.no_camera {
            config.camera.enabled = false;
        }
        if self.skip_bootstrap {
            config.bootstrap.enabled = false;
        }
        if let Some(level) = &self.log_level {
            config.host.log_level = level.clone();
        }
        config
    }
}

// ── Component wiring ──────────────────────────────────────────────────────────

async fn install_bootstrap(
    config: &AppConfig,
    env: &RuntimeEnv,
    events: Arc<dyn EventSink>,
) -> anyhow::Result<()> {
    let arch = current_arch().context("no bootstrap archive exists for this CPU architecture")?;
    let url = resolve_archive_url(&config.bootstrap.archive_url, arch);
    let target = env.prefix();
    let installer =
        BootstrapInstaller::new(HttpFetcher::new(), config.bootstrap.symlink_policy, events);

    let outcome = tokio::task::spawn_blocking(move || installer.ensure_installed(&url, &target))
        .await
        .context("bootstrap task panicked")?
        .context("bootstrap installation failed")?;
    info!("bootstrap ready: {outcome:?}");
    Ok(())
}

struct Camera {
    server: MjpegServer,
    capture: Option<JoinHandle<()>>,
}

async fn start_camera(
    config: &CameraConfig,
    events: &Arc<dyn EventSink>,
    running: &Arc<AtomicBool>,
) -> anyhow::Result<Camera> {
    let capture = if config.capture_program.trim().is_empty() {
        None
    } else {
        let mut capture =
            CaptureConfig::new(config.capture_program.clone(), config.capture_args.clone());
        capture.restart_delay = config.capture_restart_delay();
        Some(capture)
    };
    let stream_config = StreamConfig {
        bind_addr: config.socket_addr()?,
        capture,
        ..StreamConfig::default()
    };

    let buffer = Arc::new(FrameBuffer::new());
    let server = MjpegServer::start(&stream_config, Arc::clone(&buffer))
        .await
        .with_context(|| {
            format!("failed to start MJPEG server on {}", stream_config.bind_addr)
        })?;
    events.emit(HostEvent::CameraServerStarted {
        addr: server.local_addr().to_string(),
    });

    let capture = stream_config
        .capture
        .map(|capture| spawn_capture_loop(capture, buffer, Arc::clone(running)));
    Ok(Camera { server, capture })
}

fn start_bridge(
    config: &AppConfig,
    events: &Arc<dyn EventSink>,
    running: &Arc<AtomicBool>,
) -> anyhow::Result<BridgeRunner<SystemSerialTransport>> {
    let serial = &config.serial;
    let settings = BridgeSettings {
        selector: serial.device.clone(),
        write_timeout: serial.write_timeout(),
        read_poll: serial.read_timeout(),
    };
    let controller =
        BridgeController::new(SystemSerialTransport::new(), settings, Arc::clone(events));
    let channel = FifoChannel::new(
        config.host.data_dir.join(&serial.input_fifo),
        config.host.data_dir.join(&serial.output_fifo),
    )
    .with_running(Arc::clone(running));

    BridgeRunner::spawn(controller, channel, serial.framing, Arc::clone(running))
        .context("failed to start the serial bridge thread")
}

fn start_extensions(supervisor: &ProcessSupervisor, env: &RuntimeEnv, config: &AppConfig) {
    if config.extensions.enabled.is_empty() {
        return;
    }
    let root = env.home().join(&config.extensions.dir);
    let extensions = match discover_extensions(&root) {
        Ok(extensions) => extensions,
        Err(e) => {
            warn!("failed to list extensions: {e}");
            return;
        }
    };

    for name in &config.extensions.enabled {
        match extensions.iter().find(|e| &e.name == name) {
            Some(extension) => {
                info!(
                    "starting extension {} ({})",
                    extension.name, extension.manifest.title
                );
                if let Err(e) = supervisor.start(extension.process_spec(env)) {
                    warn!("failed to start extension {name}: {e}");
                }
            }
            None => warn!(
                "enabled extension {name} is not installed under {}",
                root.display()
            ),
        }
    }
}

/// Logs every host event as JSON, the form the UI consumes.
fn spawn_event_logger(mut rx: broadcast::Receiver<HostEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => debug!(target: "printhost::events", "{json}"),
                    Err(e) => warn!("failed to encode host event: {e}"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("event logger skipped {n} events")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config_path()?;
    let file_config = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let config = cli.apply_overrides(file_config);

    if cli.init_config {
        save_config(&config_path, &config)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        println!("wrote {}", config_path.display());
        return Ok(());
    }

    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // `RUST_LOG` wins; otherwise the configured level applies.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.host.log_level)),
        )
        .init();

    info!(
        "PrintHost starting: config={}, data_dir={}",
        config_path.display(),
        config.host.data_dir.display()
    );

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    // ── Events and status ─────────────────────────────────────────────────────
    let bus = EventBus::new(Arc::new(StatusBoard::new(PRINT_SERVER_NAME)));
    let event_logger = spawn_event_logger(bus.subscribe());
    let events: Arc<dyn EventSink> = Arc::new(bus.clone());

    // ── Bootstrap ─────────────────────────────────────────────────────────────
    let env = RuntimeEnv::new(&config.host.data_dir);
    if config.bootstrap.enabled {
        install_bootstrap(&config, &env, Arc::clone(&events)).await?;
    } else {
        info!("bootstrap installation disabled");
    }
    env.ensure_home()
        .with_context(|| format!("failed to create {}", env.home().display()))?;

    // ── Camera ────────────────────────────────────────────────────────────────
    let camera = if config.camera.enabled {
        Some(start_camera(&config.camera, &events, &running).await?)
    } else {
        None
    };

    // ── Serial bridge ─────────────────────────────────────────────────────────
    let bridge = if config.serial.enabled {
        Some(start_bridge(&config, &events, &running)?)
    } else {
        None
    };

    // ── Print server and extensions ───────────────────────────────────────────
    let supervisor =
        ProcessSupervisor::with_kill_grace(Arc::clone(&events), config.print_server.kill_grace());
    let print_server = PrintServerService::new(
        supervisor.clone(),
        print_server_spec(&env, &config.print_server),
    );
    if config.print_server.autostart {
        if let Err(e) = print_server.start() {
            error!("failed to start print server: {e}");
        }
    }
    start_extensions(&supervisor, &env, &config);

    // ── Event pipe ────────────────────────────────────────────────────────────
    let (command_tx, mut command_rx) = mpsc::unbounded_channel();
    let pipe_path = env.home().join(&config.host.event_pipe);
    let pipe_thread: Option<ThreadHandle<()>> =
        match EventPipe::new(&pipe_path).spawn(command_tx, Arc::clone(&running)) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("event pipe {} unavailable: {e}", pipe_path.display());
                None
            }
        };

    // ── Main loop ─────────────────────────────────────────────────────────────
    while running.load(Ordering::Relaxed) {
        tokio::select! {
            Some(command) = command_rx.recv() => {
                print_server.dispatch(command);
            }
            _ = tokio::time::sleep(MAIN_LOOP_TICK) => {}
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    info!("stopping supervised processes");
    supervisor.stop_all(true).await;

    if let Some(thread) = pipe_thread {
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            _ => warn!("event pipe thread did not stop cleanly"),
        }
    }

    if let Some(runner) = bridge {
        if let Err(e) = tokio::task::spawn_blocking(move || runner.join()).await {
            warn!("serial bridge did not stop cleanly: {e}");
        }
    }

    if let Some(camera) = camera {
        if let Some(capture) = camera.capture {
            let _ = capture.await;
        }
        if let Err(e) = camera.server.shutdown().await {
            warn!("MJPEG server shutdown failed: {e}");
        }
        events.emit(HostEvent::CameraServerStopped);
    }

    // Clones of the bus live on in the supervisor, so the logger never sees
    // the channel close.
    event_logger.abort();

    info!("PrintHost stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
