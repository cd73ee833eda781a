//! Supervision of long-lived child processes.
//!
//! The print server and every enabled extension run as children of the
//! daemon.  [`ProcessSupervisor`] spawns them, follows their output, tracks
//! their [`ProcessStatus`], and stops them on request.
//!
//! # One monitor task per child (for beginners)
//!
//! Each `start` spawns three Tokio tasks:
//!
//! ```text
//!  stdout reader ──┐
//!                  ├─▶ lines ─▶ monitor ─▶ status watch + HostEvents
//!  stderr reader ──┘              ▲
//!                     stop() ─────┘
//! ```
//!
//! The monitor owns the `Child`.  It checks every output line against the
//! spec's [`Readiness`], handles stop requests, and reaps the child.  Nobody
//! else touches the process handle, so there is no lock around it.
//!
//! # Stopping
//!
//! A graceful stop with a configured stop command runs that command (for
//! example an extension's `kill.sh`) and waits for the child to exit.
//! Otherwise the child's process group gets `SIGTERM`.  Either way, a child
//! still alive after `kill_grace` gets `SIGKILL`.
//!
//! The supervisor never restarts anything on its own.

use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use printhost_core::{EventSink, HostEvent, ProcessStatus};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::process_spec::{ProcessSpec, Readiness, StopCommand};

/// Default time between a stop request and `SIGKILL`.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(10);

/// Output lines still buffered when the child exits are read for at most
/// this long.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

const LOG_CHANNEL_CAPACITY: usize = 1024;

/// Error type for supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("process {0} is already running")]
    AlreadyRunning(String),

    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("monitor for {0} ended without reporting an exit")]
    MonitorLost(String),
}

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of child output, republished for terminal views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub source: String,
    pub stream: OutputStream,
    pub line: String,
}

struct Entry {
    pid: Option<u32>,
    status: watch::Receiver<ProcessStatus>,
    stop_tx: mpsc::UnboundedSender<bool>,
}

struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    last_status: Mutex<HashMap<String, ProcessStatus>>,
    events: Arc<dyn EventSink>,
    logs: broadcast::Sender<LogLine>,
    kill_grace: Duration,
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_status(&self) -> MutexGuard<'_, HashMap<String, ProcessStatus>> {
        self.last_status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, name: &str, tx: &watch::Sender<ProcessStatus>, status: ProcessStatus) {
        if status.is_terminal() {
            // Drop the entry first so a waiter woken below can start again.
            self.entries().remove(name);
        }
        self.last_status().insert(name.to_string(), status);
        tx.send_replace(status);
        info!("process {name} is {status}");
        self.events.emit(HostEvent::ProcessStatusChanged {
            name: name.to_string(),
            status,
        });
    }
}

/// Observer for one started process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    name: String,
    pid: Option<u32>,
    status: watch::Receiver<ProcessStatus>,
}

impl ProcessHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn status(&self) -> ProcessStatus {
        *self.status.borrow()
    }

    /// Waits until the process is `Stopped` or `Crashed`.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::MonitorLost`] if the monitor task died without
    /// publishing a terminal status.
    pub async fn wait_terminal(&mut self) -> Result<ProcessStatus, SupervisorError> {
        wait_terminal(&self.name, &mut self.status).await
    }
}

async fn wait_terminal(
    name: &str,
    rx: &mut watch::Receiver<ProcessStatus>,
) -> Result<ProcessStatus, SupervisorError> {
    loop {
        let status = *rx.borrow_and_update();
        if status.is_terminal() {
            return Ok(status);
        }
        if rx.changed().await.is_err() {
            let status = *rx.borrow();
            return if status.is_terminal() {
                Ok(status)
            } else {
                Err(SupervisorError::MonitorLost(name.to_string()))
            };
        }
    }
}

/// Spawns, observes, and stops named child processes.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self::with_kill_grace(events, DEFAULT_KILL_GRACE)
    }

    pub fn with_kill_grace(events: Arc<dyn EventSink>, kill_grace: Duration) -> Self {
        let (logs, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                last_status: Mutex::new(HashMap::new()),
                events,
                logs,
                kill_grace,
            }),
        }
    }

    /// Spawns `spec` and starts following its output.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`SupervisorError::AlreadyRunning`] if `spec.name` is still supervised.
    /// - [`SupervisorError::Spawn`] if the program cannot be executed.
    pub fn start(&self, spec: ProcessSpec) -> Result<ProcessHandle, SupervisorError> {
        let mut entries = self.inner.entries();
        if entries.contains_key(&spec.name) {
            return Err(SupervisorError::AlreadyRunning(spec.name));
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            name: spec.name.clone(),
            source,
        })?;
        let pid = child.id();
        info!("started {} (pid {pid:?}): {}", spec.name, spec.program);

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, OutputStream::Stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, OutputStream::Stderr, line_tx);
        }

        let (status_tx, status_rx) = watch::channel(ProcessStatus::Starting);
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        entries.insert(
            spec.name.clone(),
            Entry {
                pid,
                status: status_rx.clone(),
                stop_tx,
            },
        );
        drop(entries);

        self.inner
            .publish(&spec.name, &status_tx, ProcessStatus::Starting);

        let handle = ProcessHandle {
            name: spec.name.clone(),
            pid,
            status: status_rx,
        };

        let monitor = Monitor {
            inner: Arc::clone(&self.inner),
            spec,
            pid,
            status_tx,
        };
        tokio::spawn(monitor.run(child, line_rx, stop_rx));

        Ok(handle)
    }

    /// Stops `name` and waits until its exit has been observed.
    ///
    /// Returns the terminal status.  Stopping a name that is not supervised
    /// returns `Stopped` without doing anything.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::MonitorLost`] if the monitor task died.
    pub async fn stop(&self, name: &str, graceful: bool) -> Result<ProcessStatus, SupervisorError> {
        let (mut rx, stop_tx) = {
            let entries = self.inner.entries();
            match entries.get(name) {
                Some(entry) => (entry.status.clone(), entry.stop_tx.clone()),
                None => {
                    debug!("stop requested for {name}, which is not running");
                    return Ok(ProcessStatus::Stopped);
                }
            }
        };

        // A closed channel means the monitor is already finishing.
        let _ = stop_tx.send(graceful);
        wait_terminal(name, &mut rx).await
    }

    /// Stops every supervised process.
    pub async fn stop_all(&self, graceful: bool) {
        let names: Vec<String> = self.inner.entries().keys().cloned().collect();
        for name in names {
            if let Err(e) = self.stop(&name, graceful).await {
                warn!("failed to stop {name}: {e}");
            }
        }
    }

    /// Current status, or the last one seen after the process ended.
    /// `None` if the name was never started.
    pub fn status(&self, name: &str) -> Option<ProcessStatus> {
        if let Some(entry) = self.inner.entries().get(name) {
            return Some(*entry.status.borrow());
        }
        self.inner.last_status().get(name).copied()
    }

    /// Watch channel for a process that is still supervised.
    pub fn subscribe(&self, name: &str) -> Option<watch::Receiver<ProcessStatus>> {
        self.inner
            .entries()
            .get(name)
            .map(|entry| entry.status.clone())
    }

    pub fn pid(&self, name: &str) -> Option<u32> {
        self.inner.entries().get(name).and_then(|entry| entry.pid)
    }

    /// Names of all processes that have not reached a terminal state.
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.entries().keys().cloned().collect();
        names.sort();
        names
    }

    /// Output of every supervised process.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogLine> {
        self.inner.logs.subscribe()
    }
}

fn spawn_line_reader<R>(
    pipe: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<(OutputStream, String)>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("output reader stopped: {e}");
                    break;
                }
            }
        }
    });
}

/// Sends `signal` to the whole process group led by `pid`.
fn signal_group(pid: Option<u32>, signal: libc::c_int) {
    let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.  The child was
    // spawned with `process_group(0)`, so its pid is also its group id.
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc != 0 {
        debug!(
            "signal {signal} to group {pid} failed: {}",
            io::Error::last_os_error()
        );
    }
}

struct Monitor {
    inner: Arc<Inner>,
    spec: ProcessSpec,
    pid: Option<u32>,
    status_tx: watch::Sender<ProcessStatus>,
}

impl Monitor {
    fn status(&self) -> ProcessStatus {
        *self.status_tx.borrow()
    }

    fn transition(&self, next: ProcessStatus) {
        if self.status().can_transition_to(next) {
            self.inner.publish(&self.spec.name, &self.status_tx, next);
        }
    }

    fn mark_ready(&self) {
        self.transition(ProcessStatus::Running);
        self.inner.events.emit(HostEvent::ProcessReady {
            name: self.spec.name.clone(),
        });
    }

    fn on_line(&self, stream: OutputStream, line: String, ready: &mut bool) {
        info!(process = %self.spec.name, "{line}");
        if !*ready
            && self.status() == ProcessStatus::Starting
            && self.spec.readiness.matches(&line)
        {
            *ready = true;
            self.mark_ready();
        }
        let _ = self.inner.logs.send(LogLine {
            source: self.spec.name.clone(),
            stream,
            line,
        });
    }

    fn spawn_stop_command(&self, stop: &StopCommand) {
        let mut command = Command::new(&stop.program);
        command
            .args(&stop.args)
            .envs(self.spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(cwd) = &self.spec.cwd {
            command.current_dir(cwd);
        }

        let name = self.spec.name.clone();
        match command.spawn() {
            Ok(mut child) => {
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) => debug!("stop command for {name} exited: {status}"),
                        Err(e) => warn!("stop command for {name} failed: {e}"),
                    }
                });
            }
            Err(e) => {
                warn!("failed to run stop command for {name}: {e}; sending SIGTERM");
                signal_group(self.pid, libc::SIGTERM);
            }
        }
    }

    async fn run(
        self,
        mut child: Child,
        mut lines: mpsc::UnboundedReceiver<(OutputStream, String)>,
        mut stop_rx: mpsc::UnboundedReceiver<bool>,
    ) {
        let mut ready = false;
        if matches!(self.spec.readiness, Readiness::Immediate) {
            ready = true;
            self.mark_ready();
        }

        let mut stop_requested = false;
        let mut lines_open = true;
        let mut kill_at: Option<Instant> = None;

        let exit = loop {
            let deadline = kill_at.unwrap_or_else(|| Instant::now() + self.inner.kill_grace);
            tokio::select! {
                exit = child.wait() => break exit,
                line = lines.recv(), if lines_open => match line {
                    Some((stream, line)) => self.on_line(stream, line, &mut ready),
                    None => lines_open = false,
                },
                Some(graceful) = stop_rx.recv(), if !stop_requested => {
                    stop_requested = true;
                    self.transition(ProcessStatus::Stopping);
                    match (&self.spec.stop_command, graceful) {
                        (Some(stop), true) => self.spawn_stop_command(stop),
                        _ => signal_group(self.pid, libc::SIGTERM),
                    }
                    kill_at = Some(Instant::now() + self.inner.kill_grace);
                },
                _ = tokio::time::sleep_until(deadline), if kill_at.is_some() => {
                    warn!(
                        "{} did not exit within {:?}; killing",
                        self.spec.name, self.inner.kill_grace
                    );
                    signal_group(self.pid, libc::SIGKILL);
                    let _ = child.start_kill();
                    kill_at = None;
                },
            }
        };

        // Lines written just before exit are still in the pipes.
        while lines_open {
            match tokio::time::timeout(DRAIN_TIMEOUT, lines.recv()).await {
                Ok(Some((stream, line))) => self.on_line(stream, line, &mut ready),
                Ok(None) | Err(_) => lines_open = false,
            }
        }

        let code = match &exit {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("failed to wait for {}: {e}", self.spec.name);
                None
            }
        };
        debug!("{} exited with code {code:?}", self.spec.name);

        let final_status = ProcessStatus::from_exit(code, stop_requested);
        self.inner
            .publish(&self.spec.name, &self.status_tx, final_status);
    }
}
