//! Camera capture loop.
//!
//! Runs an external command whose stdout is a stream of back-to-back JPEG
//! images (for example `ffmpeg -f v4l2 -i /dev/video0 -f mjpeg -`), splits
//! the stream into frames, and publishes them into the shared
//! [`FrameBuffer`].
//!
//! Colour conversion, rotation, and encoding all happen inside the command;
//! this loop only moves bytes.
//!
//! # Publishing policy
//!
//! A frame is written only when [`FrameBuffer::wants_frames`] says somebody
//! is watching (or nothing has been captured yet).  The command keeps
//! running either way, so the first frame after a viewer connects is fresh.
//!
//! # Restarts
//!
//! If the command exits or fails to spawn, the loop waits
//! `restart_delay` and tries again until the `running` flag is cleared.

use std::process::Stdio;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use printhost_core::FrameBuffer;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::config::CaptureConfig;
use crate::domain::jpeg::JpegSplitter;

/// How often a blocked read re-checks the `running` flag.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Spawns the capture loop on the Tokio runtime.
///
/// The returned task finishes after `running` is cleared and the current
/// child process has been killed.
pub fn spawn_capture_loop(
    config: CaptureConfig,
    buffer: Arc<FrameBuffer>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while running.load(Ordering::Relaxed) {
            match spawn_command(&config) {
                Ok(child) => {
                    info!("camera capture started: {}", config.program);
                    let published = pump_frames(child, &buffer, &running).await;
                    info!("camera capture ended after {published} published frames");
                }
                Err(e) => warn!("failed to start capture command {}: {e}", config.program),
            }

            if !running.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(config.restart_delay).await;
        }
        debug!("camera capture loop stopped");
    })
}

fn spawn_command(config: &CaptureConfig) -> std::io::Result<Child> {
    Command::new(&config.program)
        .args(&config.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

/// Reads the child's stdout until EOF or shutdown; returns frames published.
async fn pump_frames(mut child: Child, buffer: &FrameBuffer, running: &AtomicBool) -> u64 {
    let Some(mut stdout) = child.stdout.take() else {
        warn!("capture command has no stdout pipe");
        return 0;
    };

    let mut splitter = JpegSplitter::new();
    let mut chunk = vec![0u8; 64 * 1024];
    let mut published = 0u64;

    loop {
        if !running.load(Ordering::Relaxed) {
            break;
        }

        let n = match tokio::time::timeout(POLL_INTERVAL, stdout.read(&mut chunk)).await {
            Err(_) => continue,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("capture stdout read failed: {e}");
                break;
            }
        };

        for frame in splitter.feed(&chunk[..n]) {
            if buffer.wants_frames() {
                buffer.write(frame);
                published += 1;
            }
        }
    }

    if let Err(e) = child.start_kill() {
        debug!("capture command already gone: {e}");
    }
    match child.wait().await {
        Ok(status) => debug!("capture command exited: {status}"),
        Err(e) => warn!("failed to reap capture command: {e}"),
    }
    published
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> CaptureConfig {
        CaptureConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            restart_delay: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_capture_publishes_first_frame_without_listeners() {
        // Arrange: one JPEG (FF D8 01 FF D9) written with printf octal escapes
        let buffer = Arc::new(FrameBuffer::new());
        let running = Arc::new(AtomicBool::new(true));
        let config = shell(r"printf '\377\330\001\377\331'; sleep 5");

        // Act
        let task = spawn_capture_loop(config, Arc::clone(&buffer), Arc::clone(&running));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while buffer.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        running.store(false, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("loop must stop after running is cleared")
            .unwrap();

        // Assert
        assert_eq!(&*buffer.read(), &[0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
    }

    #[tokio::test]
    async fn test_capture_skips_frames_when_nobody_watches() {
        // Arrange: buffer already holds a frame and has no listeners
        let buffer = Arc::new(FrameBuffer::new());
        buffer.write(vec![0xAAu8]);
        let running = Arc::new(AtomicBool::new(true));
        let config = shell(r"printf '\377\330\002\377\331'");

        // Act
        let task = spawn_capture_loop(config, Arc::clone(&buffer), Arc::clone(&running));
        tokio::time::sleep(Duration::from_millis(300)).await;
        running.store(false, Ordering::Relaxed);
        task.await.unwrap();

        // Assert
        assert_eq!(&*buffer.read(), &[0xAA]);
    }

    #[tokio::test]
    async fn test_capture_missing_program_keeps_retrying_until_stopped() {
        let buffer = Arc::new(FrameBuffer::new());
        let running = Arc::new(AtomicBool::new(true));
        let config = CaptureConfig {
            program: "/nonexistent/printhost-capture".to_string(),
            args: Vec::new(),
            restart_delay: Duration::from_millis(20),
        };

        let task = spawn_capture_loop(config, Arc::clone(&buffer), Arc::clone(&running));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());

        running.store(false, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("loop must exit")
            .unwrap();
        assert!(buffer.is_empty());
    }
}
