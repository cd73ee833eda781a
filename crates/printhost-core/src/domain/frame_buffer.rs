//! Single-slot store for the most recent camera JPEG.
//!
//! # How frames move (for beginners)
//!
//! The camera capture loop is the only writer.  Every MJPEG stream and every
//! snapshot request is a reader.  There is no queue: a write simply replaces
//! the slot, so a slow viewer skips frames instead of building a backlog.
//!
//! ```text
//! capture loop ──write()──▶ [ latest JPEG ] ◀──read()── /mjpeg stream #1
//!                                           ◀──read()── /mjpeg stream #2
//!                                           ◀──read()── /snapshot
//! ```
//!
//! Readers get an `Arc<[u8]>`, so handing the frame to a connection is a
//! reference-count bump rather than a copy.
//!
//! # Listener count
//!
//! Each open `/mjpeg` stream holds a [`ListenerGuard`].  The producer checks
//! [`FrameBuffer::wants_frames`] before spending CPU on encoding a new JPEG.
//! The count never gates reads: a snapshot request with zero listeners still
//! gets whatever is in the slot.
//!
//! Because an idle producer stops publishing, a frame can go stale while
//! nobody streams.  Every write bumps [`FrameBuffer::generation`], so a
//! one-shot reader can register briefly and wait for the counter to move.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

/// Thread-safe latest-value store for JPEG bytes with a listener refcount.
#[derive(Debug)]
pub struct FrameBuffer {
    latest: Mutex<Arc<[u8]>>,
    generation: AtomicU64,
    listeners: AtomicUsize,
}

impl FrameBuffer {
    /// Creates an empty buffer with no listeners.
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(Arc::from(Vec::<u8>::new())),
            generation: AtomicU64::new(0),
            listeners: AtomicUsize::new(0),
        }
    }

    /// Replaces the stored frame.  Most recent write wins.
    pub fn write(&self, frame: impl Into<Arc<[u8]>>) {
        let frame = frame.into();
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        *latest = frame;
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Number of writes so far.  Changes whenever the slot is replaced.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns the current frame, which is empty before the first write.
    pub fn read(&self) -> Arc<[u8]> {
        Arc::clone(&self.latest.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Returns `true` if no frame has been written yet.
    pub fn is_empty(&self) -> bool {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Increments the listener count and returns the new value.
    pub fn register_listener(&self) -> usize {
        self.listeners.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the listener count and returns the new value.
    ///
    /// Saturates at zero: an unbalanced call never wraps the counter.
    pub fn unregister_listener(&self) -> usize {
        let previous = self
            .listeners
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Current number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::Acquire)
    }

    /// Whether the producer should publish a new frame.
    ///
    /// `true` while anybody is streaming, and also while the slot is still
    /// empty so the first snapshot has something to return.
    pub fn wants_frames(&self) -> bool {
        self.listener_count() > 0 || self.is_empty()
    }

    /// Registers a listener that is unregistered when the guard drops.
    pub fn listen(self: &Arc<Self>) -> ListenerGuard {
        self.register_listener();
        ListenerGuard {
            buffer: Arc::clone(self),
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII registration of one stream listener.
///
/// Dropping the guard, whether the stream ended normally, the client went
/// away, or the task was cancelled, unregisters exactly once.
#[derive(Debug)]
pub struct ListenerGuard {
    buffer: Arc<FrameBuffer>,
}

impl ListenerGuard {
    /// The buffer this listener is registered on.
    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.buffer.unregister_listener();
    }
}
