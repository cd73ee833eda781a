//! Restart and stop requests written by the print server.
//!
//! The print server's "restart" and "shutdown" menu entries run shell
//! commands such as
//!
//! ```text
//! echo '{"eventType": "restartServer"}' > ~/eventPipe
//! ```
//!
//! An `event-pipe` thread reads that FIFO line by line, turns each line into
//! a [`PipeCommand`], and hands it to the async side over an unbounded
//! channel.  Anything it cannot parse is logged and dropped.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::domain::PipeCommand;
use crate::infrastructure::channel::fifo::open_fifo_reader;
use crate::infrastructure::channel::ChannelReader;

const POLL: Duration = Duration::from_millis(200);

/// Longest line kept while waiting for its newline.
const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    #[error("malformed event JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown event type {0:?}")]
    UnknownEvent(String),
}

#[derive(Deserialize)]
struct PipeEvent {
    #[serde(rename = "eventType")]
    event_type: String,
}

/// Parses one line of the event pipe.
///
/// # Errors
///
/// [`PipeError::Json`] for anything that is not an object with a string
/// `eventType`, [`PipeError::UnknownEvent`] for an unrecognised type.
pub fn parse_pipe_line(line: &str) -> Result<PipeCommand, PipeError> {
    let event: PipeEvent = serde_json::from_str(line.trim())?;
    PipeCommand::from_event_type(&event.event_type)
        .ok_or(PipeError::UnknownEvent(event.event_type))
}

/// Reader for the event FIFO.
#[derive(Debug, Clone)]
pub struct EventPipe {
    path: PathBuf,
}

impl EventPipe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the FIFO if needed and starts the `event-pipe` thread.
    ///
    /// The thread exits when `running` is cleared or `commands` is closed.
    ///
    /// # Errors
    ///
    /// Fails if the FIFO cannot be created or opened, or the thread cannot be
    /// spawned.
    pub fn spawn(
        self,
        commands: UnboundedSender<PipeCommand>,
        running: Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<()>> {
        let mut reader = open_fifo_reader(&self.path)?;
        info!("listening for print server events on {}", self.path.display());

        thread::Builder::new()
            .name("event-pipe".to_string())
            .spawn(move || {
                let mut pending: Vec<u8> = Vec::new();
                let mut buf = [0u8; 1024];

                while running.load(Ordering::Relaxed) && !commands.is_closed() {
                    let n = match reader.read_timeout(&mut buf, POLL) {
                        Ok(None) | Ok(Some(0)) => continue,
                        Ok(Some(n)) => n,
                        Err(e) => {
                            warn!("event pipe read failed: {e}");
                            thread::sleep(POLL);
                            continue;
                        }
                    };
                    pending.extend_from_slice(&buf[..n]);

                    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        dispatch(&String::from_utf8_lossy(&line), &commands);
                    }
                    if pending.len() > MAX_LINE_LEN {
                        warn!("discarding {} bytes of unterminated event data", pending.len());
                        pending.clear();
                    }
                }
                debug!("event pipe reader stopped");
            })
    }
}

fn dispatch(line: &str, commands: &UnboundedSender<PipeCommand>) {
    if line.trim().is_empty() {
        return;
    }
    match parse_pipe_line(line) {
        Ok(command) => {
            info!("print server requested {command:?}");
            let _ = commands.send(command);
        }
        Err(e) => warn!("ignoring event pipe line {:?}: {e}", line.trim()),
    }
}
