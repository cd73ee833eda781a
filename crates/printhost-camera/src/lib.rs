//! # printhost-camera
//!
//! Serves the phone camera to the print server and to any browser on the LAN.
//!
//! ```text
//! capture command (e.g. ffmpeg -f mjpeg -)          HTTP clients
//!        │ stdout bytes                                 ▲
//!        ▼                                              │
//! JpegSplitter ──frames──▶ FrameBuffer ──read──▶ MjpegServer
//!                             ▲   listener count        │ /mjpeg  (multipart stream)
//!                             └──────────────────────────┘ /snapshot (single JPEG)
//! ```
//!
//! - `domain/`         – [`StreamConfig`] and the JPEG byte-stream splitter.
//! - `application/`    – builds the multipart stream from a [`FrameBuffer`].
//! - `infrastructure/` – the axum HTTP server and the capture process loop.
//!
//! [`FrameBuffer`]: printhost_core::FrameBuffer

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::config::{CaptureConfig, StreamConfig};
pub use domain::jpeg::JpegSplitter;
pub use infrastructure::capture::spawn_capture_loop;
pub use infrastructure::http_server::{router, run_server, MjpegServer, StreamError};
