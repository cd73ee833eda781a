//! Threads that move bytes between the channel and the bridge controller.
//!
//! ```text
//!                 ┌──────────────────── serial-bridge thread ─────────────┐
//!  channel ─read─▶│ FrameDecoder ─▶ BridgeController::handle_frame (lock) │
//!                 └───────────────────────────────────────────────────────┘
//!                                          │ PumpRequest
//!                                          ▼
//!  device ──read──▶ serial-pump-<id> thread ──┐
//!                                             ├─▶ mpsc ─▶ channel-writer ─▶ channel
//!  (older pumps, until their cancel flag) ────┘
//! ```
//!
//! The channel writer is the only thread that writes to the channel, so
//! device bytes are never interleaved mid-chunk.
//!
//! # Restarts
//!
//! When the controller handles `CLOSE`, or the channel reports
//! end-of-stream or an error, the runner drops both channel halves and opens
//! the endpoint again.  End-of-stream also closes any open serial session,
//! since nobody is left to talk to the printer.

use std::io::{self, Read, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Sender},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use printhost_core::{FrameDecoder, Framing};
use tracing::{debug, error, info, warn};

use super::{ChannelEndpoint, ChannelReader};
use crate::application::serial_bridge::{BridgeController, PumpRequest};
use crate::infrastructure::serial::SerialTransport;

/// How long a blocked channel read waits before re-checking `running`.
const CHANNEL_POLL: Duration = Duration::from_millis(200);

/// Pause between tearing the endpoint down and opening it again.
const RESTART_DELAY: Duration = Duration::from_millis(200);

enum WriterMsg {
    Attach(Box<dyn Write + Send>),
    Data(Vec<u8>),
    Detach,
}

type SharedController<T> = Arc<Mutex<BridgeController<T>>>;

fn lock<T: SerialTransport>(
    controller: &SharedController<T>,
) -> MutexGuard<'_, BridgeController<T>> {
    controller.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the running bridge threads.
pub struct BridgeRunner<T: SerialTransport> {
    controller: SharedController<T>,
    thread: JoinHandle<()>,
}

impl<T: SerialTransport> BridgeRunner<T> {
    /// Starts the `serial-bridge` thread.
    ///
    /// The thread runs until `running` is cleared; it then closes any open
    /// session and waits for its helper threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn spawn<E: ChannelEndpoint>(
        controller: BridgeController<T>,
        endpoint: E,
        framing: Framing,
        running: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let controller = Arc::new(Mutex::new(controller));
        let shared = Arc::clone(&controller);
        let thread = thread::Builder::new()
            .name("serial-bridge".to_string())
            .spawn(move || run_bridge(shared, endpoint, framing, running))?;
        Ok(Self { controller, thread })
    }

    /// Shared controller, for status queries.
    pub fn controller(&self) -> &Arc<Mutex<BridgeController<T>>> {
        &self.controller
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the bridge thread to exit.  Clear `running` first.
    pub fn join(self) {
        if self.thread.join().is_err() {
            error!("serial bridge thread panicked");
        }
    }
}

fn run_bridge<T: SerialTransport, E: ChannelEndpoint>(
    controller: SharedController<T>,
    mut endpoint: E,
    framing: Framing,
    running: Arc<AtomicBool>,
) {
    let (writer_tx, writer_rx) = mpsc::channel::<WriterMsg>();
    let writer_thread = thread::Builder::new()
        .name("channel-writer".to_string())
        .spawn(move || {
            let mut writer: Option<Box<dyn Write + Send>> = None;
            while let Ok(msg) = writer_rx.recv() {
                match msg {
                    WriterMsg::Attach(w) => writer = Some(w),
                    WriterMsg::Detach => writer = None,
                    WriterMsg::Data(bytes) => {
                        let Some(w) = writer.as_mut() else {
                            debug!("dropping {} device bytes: no channel", bytes.len());
                            continue;
                        };
                        if let Err(e) = w.write_all(&bytes).and_then(|()| w.flush()) {
                            warn!("dropping {} device bytes: {e}", bytes.len());
                        }
                    }
                }
            }
        });
    let writer_thread = match writer_thread {
        Ok(handle) => handle,
        Err(e) => {
            error!("failed to spawn channel writer thread: {e}");
            return;
        }
    };

    let mut pumps: Vec<JoinHandle<()>> = Vec::new();

    while running.load(Ordering::Relaxed) {
        let pair = match endpoint.open() {
            Ok(pair) => pair,
            Err(e) => {
                warn!("failed to open channel {}: {e}", endpoint.describe());
                thread::sleep(RESTART_DELAY);
                continue;
            }
        };
        info!("serial channel open: {}", endpoint.describe());
        let _ = writer_tx.send(WriterMsg::Attach(pair.writer));

        let mut reader = pair.reader;
        serve_channel(
            &controller,
            reader.as_mut(),
            framing,
            &running,
            &writer_tx,
            &mut pumps,
        );

        let _ = writer_tx.send(WriterMsg::Detach);
        pumps.retain(|p| !p.is_finished());
        if running.load(Ordering::Relaxed) {
            debug!("restarting serial channel");
            thread::sleep(RESTART_DELAY);
        }
    }

    lock(&controller).shutdown();
    drop(writer_tx);
    for pump in pumps {
        let _ = pump.join();
    }
    let _ = writer_thread.join();
    info!("serial bridge stopped");
}

/// Reads one channel connection until it must be restarted.
fn serve_channel<T: SerialTransport>(
    controller: &SharedController<T>,
    reader: &mut dyn ChannelReader,
    framing: Framing,
    running: &Arc<AtomicBool>,
    writer_tx: &Sender<WriterMsg>,
    pumps: &mut Vec<JoinHandle<()>>,
) {
    let mut decoder = FrameDecoder::new(framing);
    let mut buf = vec![0u8; 4096];

    while running.load(Ordering::Relaxed) {
        let n = match reader.read_timeout(&mut buf, CHANNEL_POLL) {
            Ok(None) => continue,
            Ok(Some(0)) => {
                info!("serial channel reached end-of-stream");
                // An unterminated last line still reaches the printer.
                if let Some(Ok(frame)) = decoder.finish() {
                    if !frame.is_control() {
                        lock(controller).handle_frame(&frame);
                    }
                }
                lock(controller).channel_closed();
                return;
            }
            Ok(Some(n)) => n,
            Err(e) => {
                warn!("serial channel read failed: {e}");
                return;
            }
        };

        let mut restart = false;
        for decoded in decoder.feed(&buf[..n]) {
            let frame = match decoded {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("dropping malformed channel frame: {e}");
                    continue;
                }
            };

            let outcome = lock(controller).handle_frame(&frame);
            if let Some(request) = outcome.pump {
                match spawn_pump(
                    Arc::clone(controller),
                    request,
                    writer_tx.clone(),
                    Arc::clone(running),
                ) {
                    Ok(handle) => track_pump(pumps, handle),
                    Err(e) => error!("failed to spawn serial pump thread: {e}"),
                }
            }
            if outcome.restart_channel {
                // Frames after CLOSE belong to the next connection.
                restart = true;
                break;
            }
        }
        if restart {
            return;
        }
    }
}

/// Keeps `handle` for the final join, forgetting pumps that already exited.
fn track_pump(pumps: &mut Vec<JoinHandle<()>>, handle: JoinHandle<()>) {
    pumps.retain(|p| !p.is_finished());
    pumps.push(handle);
}

fn spawn_pump<T: SerialTransport>(
    controller: SharedController<T>,
    request: PumpRequest,
    writer_tx: Sender<WriterMsg>,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    let PumpRequest {
        session_id,
        mut reader,
        cancel,
    } = request;

    thread::Builder::new()
        .name(format!("serial-pump-{session_id}"))
        .spawn(move || {
            let mut buf = vec![0u8; 4096];
            loop {
                if cancel.load(Ordering::Relaxed) || !running.load(Ordering::Relaxed) {
                    break;
                }
                match reader.read(&mut buf) {
                    Ok(0) => {
                        lock(&controller).device_detached(session_id);
                        break;
                    }
                    Ok(n) => {
                        if writer_tx.send(WriterMsg::Data(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::TimedOut
                                | io::ErrorKind::WouldBlock
                                | io::ErrorKind::Interrupted
                        ) => {}
                    Err(e) => {
                        if !cancel.load(Ordering::Relaxed) {
                            warn!("serial read failed on session {session_id}: {e}");
                            lock(&controller).device_detached(session_id);
                        }
                        break;
                    }
                }
            }
            debug!("serial pump {session_id} exited");
        })
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use printhost_core::{DeviceInfo, NoopSink};

    use super::*;
    use crate::application::serial_bridge::{BridgeSettings, BridgeState};
    use crate::infrastructure::channel::memory::MemoryChannel;
    use crate::infrastructure::serial::mock::MockSerialTransport;

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn test_runner_stops_when_running_cleared() {
        // Arrange
        let transport = MockSerialTransport::new(vec![DeviceInfo::usb("/dev/ttyUSB0", 1, 2)]);
        let controller =
            BridgeController::new(transport, BridgeSettings::default(), Arc::new(NoopSink));
        let (channel, peer) = MemoryChannel::new();
        let running = Arc::new(AtomicBool::new(true));

        // Act
        let runner =
            BridgeRunner::spawn(controller, channel, Framing::Lines, Arc::clone(&running))
                .unwrap();
        assert!(wait_until(Duration::from_secs(2), || peer.opens() == 1));
        running.store(false, Ordering::Relaxed);

        // Assert
        assert!(wait_until(Duration::from_secs(2), || runner.is_finished()));
        runner.join();
    }

    #[test]
    fn test_runner_closes_session_on_channel_eof() {
        let transport = MockSerialTransport::new(vec![DeviceInfo::usb("/dev/ttyUSB0", 1, 2)]);
        let controller = BridgeController::new(
            transport.clone(),
            BridgeSettings::default(),
            Arc::new(NoopSink),
        );
        let (channel, peer) = MemoryChannel::new();
        let running = Arc::new(AtomicBool::new(true));
        let runner =
            BridgeRunner::spawn(controller, channel, Framing::Lines, Arc::clone(&running))
                .unwrap();

        peer.send(b"!octo4a: BAUDRATE 115200\n");
        assert!(wait_until(Duration::from_secs(2), || transport.open_now() == 1));

        peer.hang_up();

        assert!(wait_until(Duration::from_secs(2), || transport.open_now() == 0));
        assert!(wait_until(Duration::from_secs(2), || peer.opens() == 2));
        assert_eq!(lock(runner.controller()).state(), BridgeState::Idle);

        running.store(false, Ordering::Relaxed);
        runner.join();
    }

    #[test]
    fn test_track_pump_forgets_finished_threads() {
        // Arrange: ten pumps that already exited
        let mut pumps: Vec<JoinHandle<()>> = (0..10).map(|_| thread::spawn(|| {})).collect();
        assert!(wait_until(Duration::from_secs(2), || {
            pumps.iter().all(JoinHandle::is_finished)
        }));
        let (release_tx, release_rx) = mpsc::channel::<()>();

        // Act
        track_pump(
            &mut pumps,
            thread::spawn(move || {
                let _ = release_rx.recv();
            }),
        );

        // Assert: only the live pump is kept
        assert_eq!(pumps.len(), 1);
        assert!(!pumps[0].is_finished());
        drop(release_tx);
        for pump in pumps {
            pump.join().unwrap();
        }
    }
}
