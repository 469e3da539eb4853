use std::fmt;

use thiserror::Error;

/// Error raised by a source-supplied release hook.
#[derive(Error, Debug)]
#[error("failed to release frame {sequence}: {message}")]
pub struct FrameReleaseError {
    pub sequence: u64,
    pub message: String,
}

/// Hook a frame source attaches to frames whose backing buffer must be
/// handed back (device buffers, pooled allocations).
pub trait FrameRelease: Send {
    fn release(&mut self, sequence: u64) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// A single camera frame: contiguous RGB bytes in row-major order plus the
/// orientation and sequence metadata the analyzer needs.
///
/// A frame is owned by exactly one context at a time and released exactly
/// once: explicitly through [`Frame::release`], or on drop if nobody did.
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    rotation_degrees: u16,
    sequence: u64,
    releaser: Option<Box<dyn FrameRelease>>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, sequence: u64) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            rotation_degrees: 0,
            sequence,
            releaser: None,
        }
    }

    /// Sets the clockwise rotation needed to display the frame upright.
    /// Values are normalized to 0, 90, 180 or 270.
    pub fn with_rotation(mut self, degrees: u16) -> Self {
        self.rotation_degrees = normalize_rotation(degrees);
        self
    }

    pub fn with_releaser(mut self, releaser: Box<dyn FrameRelease>) -> Self {
        self.releaser = Some(releaser);
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn rotation_degrees(&self) -> u16 {
        self.rotation_degrees
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Hands the frame's resources back to its source.
    pub fn release(mut self) -> Result<(), FrameReleaseError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), FrameReleaseError> {
        self.data = Vec::new();
        match self.releaser.take() {
            Some(mut releaser) => {
                releaser
                    .release(self.sequence)
                    .map_err(|e| FrameReleaseError {
                        sequence: self.sequence,
                        message: e.to_string(),
                    })
            }
            None => Ok(()),
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            log::warn!("{e}");
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("rotation_degrees", &self.rotation_degrees)
            .finish()
    }
}

fn normalize_rotation(degrees: u16) -> u16 {
    (degrees % 360) / 90 * 90
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::testing::*;
    use super::*;

    #[test]
    fn test_construction_and_accessors() {
        let data = vec![0u8; 12]; // 2x2x3
        let frame = Frame::new(data.clone(), 2, 2, 3, 5);
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.sequence(), 5);
        assert_eq!(frame.rotation_degrees(), 0);
        assert_eq!(frame.data(), &data[..]);
    }

    #[test]
    #[should_panic(expected = "data length must equal width * height * channels")]
    fn test_mismatched_data_length_panics_in_debug() {
        let data = vec![0u8; 10]; // wrong size for 2x2x3
        Frame::new(data, 2, 2, 3, 0);
    }

    #[test]
    fn test_rotation_is_normalized() {
        let frame = Frame::new(vec![0u8; 3], 1, 1, 3, 0).with_rotation(450);
        assert_eq!(frame.rotation_degrees(), 90);
        let frame = Frame::new(vec![0u8; 3], 1, 1, 3, 0).with_rotation(275);
        assert_eq!(frame.rotation_degrees(), 270);
    }

    #[test]
    fn test_explicit_release_runs_hook_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let frame = tracked_frame(1, &count);
        frame.release().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_unreleased_frame() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let _frame = tracked_frame(1, &count);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_failure_is_reported_not_panicked() {
        let count = Arc::new(AtomicUsize::new(0));
        let frame = Frame::new(vec![0u8; 3], 1, 1, 3, 9).with_releaser(Box::new(
            CountingRelease {
                count: count.clone(),
                fail: true,
            },
        ));
        let err = frame.release().unwrap_err();
        assert_eq!(err.sequence, 9);
        assert!(err.to_string().contains("already returned"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_frame_without_releaser_releases_cleanly() {
        let frame = Frame::new(vec![1u8; 3], 1, 1, 3, 0);
        assert!(frame.release().is_ok());
    }
}
