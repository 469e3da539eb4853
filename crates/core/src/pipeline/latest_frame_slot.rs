use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::shared::frame::Frame;

/// One-slot, latest-wins buffer between the frame producer and the
/// classification worker.
///
/// The producer never waits: a frame offered while another is still queued
/// replaces it, and the replaced frame is handed back so the caller can
/// release it right away. Memory stays bounded to one queued frame no
/// matter how far the classifier falls behind.
pub struct LatestFrameSlot {
    inner: Mutex<SlotInner>,
    available: Condvar,
}

struct SlotInner {
    pending: Option<Frame>,
    closed: bool,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                pending: None,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Queues `frame`, returning the frame it displaced, if any.
    ///
    /// Once the slot is closed the frame is refused and returned as `Err`.
    pub fn offer(&self, frame: Frame) -> Result<Option<Frame>, Frame> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(frame);
        }
        let replaced = inner.pending.replace(frame);
        drop(inner);
        self.available.notify_one();
        Ok(replaced)
    }

    /// Blocks until a frame is queued and takes it. After [`close`], drains
    /// the remaining frame and then returns `None`.
    ///
    /// [`close`]: LatestFrameSlot::close
    pub fn take(&self) -> Option<Frame> {
        let mut inner = self.lock();
        loop {
            if let Some(frame) = inner.pending.take() {
                return Some(frame);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stops accepting frames and wakes the consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    /// Removes the queued frame without waiting.
    pub fn discard(&self) -> Option<Frame> {
        self.lock().pending.take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LatestFrameSlot {
    fn default() -> Self {
        Self::new()
    }
}
