//! PrintServerUseCase: start, stop, and restart the print server.
//!
//! The print server runs as one supervised process named
//! [`PRINT_SERVER_NAME`].  It counts as started once a line of its output
//! contains the configured readiness marker (`"Listening on"` by default).
//!
//! Restart and stop requests arrive from two places: the CLI/UI, and the
//! print server itself through the event pipe ([`PipeCommand`]).  Both end up
//! in [`PrintServerService::handle_command`].

use printhost_core::ProcessStatus;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::{PipeCommand, ProcessSpec, Readiness, RuntimeEnv};
use crate::infrastructure::process::{ProcessHandle, ProcessSupervisor, SupervisorError};
use crate::infrastructure::storage::config::PrintServerConfig;

/// Supervisor name of the print server.
pub const PRINT_SERVER_NAME: &str = "octoprint";

/// Builds the print server's process spec from its configuration.
pub fn print_server_spec(env: &RuntimeEnv, config: &PrintServerConfig) -> ProcessSpec {
    let mut spec = env
        .shell_command(PRINT_SERVER_NAME, &config.command)
        .with_readiness(Readiness::Marker(config.readiness_marker.clone()));
    if !config.stop_command.trim().is_empty() {
        spec = spec.with_stop_command(env.shell_stop_command(&config.stop_command));
    }
    spec
}

/// Print server lifecycle on top of a [`ProcessSupervisor`].
#[derive(Clone)]
pub struct PrintServerService {
    supervisor: ProcessSupervisor,
    spec: ProcessSpec,
}

impl PrintServerService {
    pub fn new(supervisor: ProcessSupervisor, spec: ProcessSpec) -> Self {
        Self { supervisor, spec }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Current status; `Stopped` before the first start.
    pub fn status(&self) -> ProcessStatus {
        self.supervisor
            .status(&self.spec.name)
            .unwrap_or(ProcessStatus::Stopped)
    }

    /// Starts the print server.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::AlreadyRunning`] if it is still alive, or
    /// [`SupervisorError::Spawn`] if the shell cannot be executed.
    pub fn start(&self) -> Result<ProcessHandle, SupervisorError> {
        info!("starting print server");
        self.supervisor.start(self.spec.clone())
    }

    /// Gracefully stops the print server and waits for it to exit.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::MonitorLost`] if the supervisor lost track of it.
    pub async fn stop(&self) -> Result<ProcessStatus, SupervisorError> {
        info!("stopping print server");
        self.supervisor.stop(&self.spec.name, true).await
    }

    /// Stops the print server if it runs, then starts it again.
    ///
    /// # Errors
    ///
    /// As for [`stop`](Self::stop) and [`start`](Self::start).
    pub async fn restart(&self) -> Result<ProcessHandle, SupervisorError> {
        let stopped = self.stop().await?;
        info!("print server {stopped}; starting it again");
        self.start()
    }

    /// Acts on a request from the event pipe.
    pub async fn handle_command(&self, command: PipeCommand) {
        let result = match command {
            PipeCommand::RestartServer => self.restart().await.map(|_| ()),
            PipeCommand::StopServer => self.stop().await.map(|_| ()),
        };
        if let Err(e) = result {
            warn!("failed to handle {command:?}: {e}");
        }
    }

    /// Runs [`handle_command`](Self::handle_command) on its own task.
    ///
    /// A graceful stop can take as long as the kill grace, and the caller's
    /// loop keeps polling its shutdown flag meanwhile.
    pub fn dispatch(&self, command: PipeCommand) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move { service.handle_command(command).await })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use printhost_core::NoopSink;

    use super::*;

    fn service(script: &str, marker: &str) -> PrintServerService {
        let supervisor =
            ProcessSupervisor::with_kill_grace(Arc::new(NoopSink), Duration::from_secs(2));
        let spec = ProcessSpec::new(
            PRINT_SERVER_NAME,
            "sh",
            vec!["-c".to_string(), script.to_string()],
        )
        .with_readiness(Readiness::Marker(marker.to_string()));
        PrintServerService::new(supervisor, spec)
    }

    async fn wait_for(service: &PrintServerService, wanted: ProcessStatus) -> bool {
        for _ in 0..200 {
            if service.status() == wanted {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_spec_from_config_uses_marker_and_stop_command() {
        // Arrange
        let env = RuntimeEnv::new("/r");
        let config = PrintServerConfig::default();

        // Act
        let spec = print_server_spec(&env, &config);

        // Assert
        assert_eq!(spec.name, PRINT_SERVER_NAME);
        assert!(spec.readiness.matches("Listening on http://0.0.0.0:5000"));
        assert!(spec.args[1].ends_with("octoprint serve --iknowwhatimdoing"));
        let stop = spec.stop_command.expect("default stop command");
        assert!(stop.args[1].ends_with("kill `pidof octoprint`"));
    }

    #[test]
    fn test_blank_stop_command_means_sigterm() {
        let env = RuntimeEnv::new("/r");
        let config = PrintServerConfig {
            stop_command: "  ".to_string(),
            ..PrintServerConfig::default()
        };

        assert!(print_server_spec(&env, &config).stop_command.is_none());
    }

    #[tokio::test]
    async fn test_status_is_stopped_before_start() {
        let service = service("true", "ready");
        assert_eq!(service.status(), ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn test_marker_moves_server_to_running() {
        // Arrange
        let service = service("echo booting; echo 'Listening on :5000'; sleep 5", "Listening on");

        // Act
        service.start().unwrap();

        // Assert
        assert!(wait_for(&service, ProcessStatus::Running).await);
        assert_eq!(service.stop().await.unwrap(), ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn test_restart_command_starts_a_new_process() {
        let service = service("echo 'Listening on'; sleep 5", "Listening on");
        let first = service.start().unwrap();

        service.handle_command(PipeCommand::RestartServer).await;

        assert!(wait_for(&service, ProcessStatus::Running).await);
        let second_pid = service.supervisor.pid(PRINT_SERVER_NAME);
        assert!(second_pid.is_some());
        assert_ne!(second_pid, first.pid());
        service.handle_command(PipeCommand::StopServer).await;
        assert_eq!(service.status(), ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn test_dispatch_returns_before_slow_stop_finishes() {
        // Arrange: ignores SIGTERM, so only the 2 s kill grace ends it
        let service = service("trap '' TERM; echo 'Listening on'; sleep 30", "Listening on");
        service.start().unwrap();
        assert!(wait_for(&service, ProcessStatus::Running).await);

        // Act
        let started = tokio::time::Instant::now();
        let handle = service.dispatch(PipeCommand::StopServer);

        // Assert
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!handle.is_finished());
        handle.await.unwrap();
        assert_eq!(service.status(), ProcessStatus::Stopped);
    }
}
