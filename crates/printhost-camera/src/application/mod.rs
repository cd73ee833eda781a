//! Application layer: turns the shared frame buffer into HTTP bodies.

pub mod stream;

pub use stream::{encode_part, mjpeg_stream, BOUNDARY};
