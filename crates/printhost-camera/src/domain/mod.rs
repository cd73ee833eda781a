//! Domain layer for the camera server: configuration and JPEG framing.

pub mod config;
pub mod jpeg;

pub use config::{CaptureConfig, StreamConfig};
