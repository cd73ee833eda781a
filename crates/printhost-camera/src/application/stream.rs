//! Builds the `multipart/x-mixed-replace` body for `/mjpeg`.
//!
//! # Wire format
//!
//! Every part looks like this, repeated for as long as the client stays
//! connected:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 48213\r\n
//! \r\n
//! <48213 bytes of JPEG>\r\n
//! ```
//!
//! Browsers and the print server's webcam plugin replace the displayed
//! image each time a new part arrives.
//!
//! # Pacing
//!
//! There is no frame-rate limit.  The loop re-reads the buffer every time
//! hyper is ready for more data, so a viewer faster than the camera will see
//! the same frame repeated.  The only sleep happens while the buffer is still
//! empty, to avoid spinning before the camera produces anything.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use futures_util::stream::{self, Stream};
use printhost_core::{FrameBuffer, ListenerGuard};
use tokio::sync::watch;

/// Multipart boundary token used in the `Content-Type` header.
pub const BOUNDARY: &str = "frame";

/// Encodes one multipart part carrying `jpeg`.
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

struct StreamState {
    // Held for the lifetime of the stream; dropping it unregisters.
    listener: ListenerGuard,
    backoff: Duration,
    shutdown: watch::Receiver<bool>,
}

/// Returns the endless multipart stream for one viewer.
///
/// The viewer is registered on `buffer` immediately and unregistered when
/// the returned stream is dropped, which hyper does as soon as a write to
/// the client fails.  The stream ends on its own once `shutdown` flips to
/// `true` or its sender is dropped.
pub fn mjpeg_stream(
    buffer: Arc<FrameBuffer>,
    backoff: Duration,
    shutdown: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let state = StreamState {
        listener: buffer.listen(),
        backoff,
        shutdown,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            let stopping = *state.shutdown.borrow();
            if stopping {
                return None;
            }

            let frame = state.listener.buffer().read();
            if frame.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(state.backoff) => continue,
                    changed = state.shutdown.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                        continue;
                    }
                }
            }

            // Let other connections and the producer run between parts.
            tokio::task::yield_now().await;
            return Some((Ok(encode_part(&frame)), state));
        }
    })
}
