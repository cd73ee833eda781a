//! Process supervisor against real `sh` children.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use printhost_core::{EventSink, HostEvent, NoopSink, ProcessStatus};
use printhost_daemon::domain::{ProcessSpec, Readiness, StopCommand};
use printhost_daemon::infrastructure::process::{OutputStream, ProcessSupervisor};
use uuid::Uuid;

fn sh(name: &str, script: &str) -> ProcessSpec {
    ProcessSpec::new(name, "sh", vec!["-c".to_string(), script.to_string()])
}

fn supervisor() -> ProcessSupervisor {
    ProcessSupervisor::with_kill_grace(Arc::new(NoopSink), Duration::from_secs(2))
}

/// Records the status sequence of every process.
#[derive(Default)]
struct StatusLog {
    changes: Mutex<Vec<(String, ProcessStatus)>>,
}

impl StatusLog {
    fn of(&self, name: &str) -> Vec<ProcessStatus> {
        self.changes
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, s)| *s)
            .collect()
    }
}

impl EventSink for StatusLog {
    fn emit(&self, event: HostEvent) {
        if let HostEvent::ProcessStatusChanged { name, status } = event {
            self.changes.lock().unwrap().push((name, status));
        }
    }
}

#[tokio::test]
async fn test_clean_exit_before_ready_never_reports_running() {
    // Arrange
    let log = Arc::new(StatusLog::default());
    let supervisor = ProcessSupervisor::new(log.clone());
    let spec = sh("quick", "echo hello; exit 0")
        .with_readiness(Readiness::Marker("never printed".to_string()));

    // Act
    let mut handle = supervisor.start(spec).unwrap();
    let status = handle.wait_terminal().await.unwrap();

    // Assert
    assert_eq!(status, ProcessStatus::Stopped);
    assert_eq!(
        log.of("quick"),
        vec![ProcessStatus::Starting, ProcessStatus::Stopped]
    );
    assert_eq!(supervisor.status("quick"), Some(ProcessStatus::Stopped));
}

#[tokio::test]
async fn test_nonzero_exit_is_crashed() {
    let supervisor = supervisor();

    let mut handle = supervisor.start(sh("failing", "exit 3")).unwrap();

    assert_eq!(handle.wait_terminal().await.unwrap(), ProcessStatus::Crashed);
    assert!(supervisor.running().is_empty());
}

#[tokio::test]
async fn test_marker_line_reports_running_then_stop_reaches_stopped() {
    // Arrange
    let log = Arc::new(StatusLog::default());
    let supervisor = ProcessSupervisor::with_kill_grace(log.clone(), Duration::from_secs(2));
    let spec = sh("server", "echo 'Listening on http://0.0.0.0:5000'; sleep 30")
        .with_readiness(Readiness::Marker("Listening on".to_string()));
    let handle = supervisor.start(spec).unwrap();

    // Act
    let mut status = supervisor.subscribe("server").unwrap();
    while *status.borrow_and_update() != ProcessStatus::Running {
        status.changed().await.unwrap();
    }
    let stopped = supervisor.stop("server", true).await.unwrap();

    // Assert
    assert_eq!(stopped, ProcessStatus::Stopped);
    assert_eq!(handle.status(), ProcessStatus::Stopped);
    assert_eq!(
        log.of("server"),
        vec![
            ProcessStatus::Starting,
            ProcessStatus::Running,
            ProcessStatus::Stopping,
            ProcessStatus::Stopped,
        ]
    );
}

#[tokio::test]
async fn test_graceful_stop_runs_stop_command() {
    // Arrange
    let marker = std::env::temp_dir().join(format!("printhost_stop_{}", Uuid::new_v4()));
    let supervisor = supervisor();
    let stop = StopCommand {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), format!("touch {}", marker.display())],
    };
    let spec = sh("with-stop", "sleep 30").with_stop_command(stop);
    supervisor.start(spec).unwrap();

    // Act
    let status = supervisor.stop("with-stop", true).await.unwrap();

    // Assert: the stop script only touches a file, so the kill grace had to
    // end the child.
    assert_eq!(status, ProcessStatus::Stopped);
    assert!(marker.exists());
    let _ = std::fs::remove_file(marker);
}

#[tokio::test]
async fn test_second_start_while_alive_is_rejected() {
    let supervisor = supervisor();
    supervisor.start(sh("dup", "sleep 30")).unwrap();

    let second = supervisor.start(sh("dup", "sleep 30"));

    assert!(second.is_err());
    supervisor.stop_all(false).await;
    assert_eq!(supervisor.status("dup"), Some(ProcessStatus::Stopped));
}

#[tokio::test]
async fn test_output_lines_are_broadcast_with_their_stream() {
    let supervisor = supervisor();
    let mut logs = supervisor.subscribe_logs();

    let mut handle = supervisor
        .start(sh("chatty", "echo to-stdout; echo to-stderr >&2"))
        .unwrap();
    handle.wait_terminal().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(line) = logs.try_recv() {
        seen.push((line.source, line.stream, line.line));
    }
    assert!(seen.contains(&(
        "chatty".to_string(),
        OutputStream::Stdout,
        "to-stdout".to_string()
    )));
    assert!(seen.contains(&(
        "chatty".to_string(),
        OutputStream::Stderr,
        "to-stderr".to_string()
    )));
}
