//! Infrastructure layer: sockets and child processes.
//!
//! - [`http_server`] – axum router, bound listener, graceful shutdown.
//! - [`capture`]     – runs the capture command and feeds the frame buffer.

pub mod capture;
pub mod http_server;
