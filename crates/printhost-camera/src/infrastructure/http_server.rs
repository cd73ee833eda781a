//! MJPEG HTTP server: routes, listener, and shutdown.
//!
//! Routes:
//!
//! | Path        | Response                                                   |
//! |-------------|------------------------------------------------------------|
//! | `/mjpeg`    | `200 multipart/x-mixed-replace; boundary=frame`, endless   |
//! | `/snapshot` | `200 image/jpeg`, the current frame (zero bytes if none)   |
//! | anything    | `200 text/html`, a short page linking the two above        |
//!
//! # Failure isolation
//!
//! hyper runs every connection in its own task.  When a viewer disconnects,
//! hyper's next write fails, it drops that connection's body stream, and the
//! stream's listener guard unregisters.  No other connection notices.
//!
//! # Shutdown
//!
//! [`MjpegServer::shutdown`] flips a `watch` flag.  That flag both stops the
//! accept loop (axum graceful shutdown) and ends every open `/mjpeg` stream,
//! so graceful shutdown never waits on an endless response.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use printhost_core::FrameBuffer;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::stream::{mjpeg_stream, BOUNDARY};
use crate::domain::config::StreamConfig;

/// Errors raised by the HTTP server itself.
///
/// Per-connection failures never surface here.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The listening socket could not be bound.
    #[error("failed to bind MJPEG server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop stopped with an I/O error.
    #[error("MJPEG server terminated: {0}")]
    Serve(#[source] std::io::Error),

    /// The server task panicked or was aborted.
    #[error("MJPEG server task failed: {0}")]
    Join(String),
}

const INDEX_HTML: &str = "<!DOCTYPE html>\n<html>\n<head><title>PrintHost camera</title></head>\n<body>\n<h1>PrintHost camera</h1>\n<ul>\n<li><a href=\"/snapshot\">/snapshot</a> &ndash; current frame as a single JPEG</li>\n<li><a href=\"/mjpeg\">/mjpeg</a> &ndash; live MJPEG stream</li>\n</ul>\n</body>\n</html>\n";

/// How often a waiting snapshot re-checks the buffer.
const SNAPSHOT_POLL: Duration = Duration::from_millis(10);

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, pre-check=0, post-check=0, max-age=0";

/// State shared by every request handler.
#[derive(Clone)]
struct ServerState {
    buffer: Arc<FrameBuffer>,
    backoff: Duration,
    snapshot_wait: Duration,
    shutdown: watch::Receiver<bool>,
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Builds the router without binding a socket.
///
/// Exposed so tests (and embedders that already own a server) can drive the
/// routes in-process.
pub fn router(
    buffer: Arc<FrameBuffer>,
    config: &StreamConfig,
    shutdown: watch::Receiver<bool>,
) -> Router {
    let state = ServerState {
        buffer,
        backoff: config.empty_frame_backoff,
        snapshot_wait: config.snapshot_wait,
        shutdown,
    };

    Router::new()
        .route("/mjpeg", get(mjpeg_handler))
        .route("/snapshot", get(snapshot_handler))
        .fallback(index_handler)
        .with_state(state)
}

async fn mjpeg_handler(State(state): State<ServerState>) -> Response {
    debug!(
        "MJPEG viewer connected ({} listeners before)",
        state.buffer.listener_count()
    );
    let body = Body::from_stream(mjpeg_stream(state.buffer, state.backoff, state.shutdown));

    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
            ),
            (header::CACHE_CONTROL, NO_CACHE.to_string()),
            (header::PRAGMA, "no-cache".to_string()),
            (header::EXPIRES, "0".to_string()),
        ],
        body,
    )
        .into_response()
}

async fn snapshot_handler(State(state): State<ServerState>) -> Response {
    let frame = fresh_frame(&state.buffer, state.snapshot_wait).await;
    (
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, NO_CACHE),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        Body::from(frame.to_vec()),
    )
        .into_response()
}

/// Counts as a listener for up to `wait` so an idle producer publishes again,
/// then returns the newest frame.  Falls back to whatever is stored (possibly
/// nothing) when no new frame shows up in time.
async fn fresh_frame(buffer: &Arc<FrameBuffer>, wait: Duration) -> Arc<[u8]> {
    let seen = buffer.generation();
    let _guard = buffer.listen();
    let deadline = tokio::time::Instant::now() + wait;
    while buffer.generation() == seen && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(SNAPSHOT_POLL).await;
    }
    buffer.read()
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

// ── Server handle ─────────────────────────────────────────────────────────────

/// A running MJPEG server.
#[derive(Debug)]
pub struct MjpegServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<std::io::Result<()>>,
}

impl MjpegServer {
    /// Binds `config.bind_addr` and starts serving in a background task.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Bind`] if the port is taken or not permitted.
    pub async fn start(config: &StreamConfig, buffer: Arc<FrameBuffer>) -> Result<Self, StreamError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| StreamError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| StreamError::Bind {
            addr: config.bind_addr,
            source,
        })?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let app = router(buffer, config, shutdown_rx.clone());

        let mut signal = shutdown_rx;
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    // Resolves on `true` or when the sender is gone.
                    loop {
                        let stop = *signal.borrow_and_update();
                        if stop || signal.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await
        });

        info!("MJPEG server listening on {local_addr}");
        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    /// Address actually bound (useful when the configured port is `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, ends every open stream, and waits for the server task.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Serve`] if the accept loop had failed, or
    /// [`StreamError::Join`] if the task panicked.
    pub async fn shutdown(self) -> Result<(), StreamError> {
        // Receivers may already be gone if the task exited early.
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(Ok(())) => {
                info!("MJPEG server on {} stopped", self.local_addr);
                Ok(())
            }
            Ok(Err(e)) => Err(StreamError::Serve(e)),
            Err(e) => Err(StreamError::Join(e.to_string())),
        }
    }
}

/// Runs the MJPEG server until `running` is cleared.
///
/// Polls the flag every 200 ms, the same cadence as the daemon's other
/// background loops, then shuts the server down gracefully.
///
/// # Errors
///
/// Propagates bind and serve failures from [`MjpegServer`].
pub async fn run_server(
    config: StreamConfig,
    buffer: Arc<FrameBuffer>,
    running: Arc<AtomicBool>,
) -> Result<(), StreamError> {
    let server = MjpegServer::start(&config, buffer).await?;

    while running.load(Ordering::Relaxed) {
        if server.task.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    info!("shutdown flag set; stopping MJPEG server");
    server.shutdown().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
