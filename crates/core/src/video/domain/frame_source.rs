use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to open frame source: {0}")]
    Open(String),
    #[error("failed to read frame: {0}")]
    Read(String),
}

/// Properties of a bound source.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// `None` for live sources with no known end.
    pub total_frames: Option<usize>,
}

/// A live source of frames (camera, replayed recording).
///
/// Implementations handle device details while the pipeline works with
/// the abstract [`Frame`]. The source enforces no backpressure of its own;
/// consumers decide what to keep.
pub trait FrameSource: Send {
    /// Binds the source. Failing here means the camera cannot be used.
    fn open(&mut self) -> Result<SourceInfo, SourceError>;

    /// Returns an iterator over frames in capture order.
    fn frames(&mut self) -> Box<dyn Iterator<Item = Result<Frame, SourceError>> + '_>;

    /// Releases the device.
    fn close(&mut self);

    /// Pushes frames into `on_frame` until it returns `false` or the source
    /// runs dry. Read errors are logged and skipped. Returns the number of
    /// frames delivered.
    fn subscribe(&mut self, on_frame: &mut dyn FnMut(Frame) -> bool) -> usize {
        let mut delivered = 0;
        for result in self.frames() {
            match result {
                Ok(frame) => {
                    delivered += 1;
                    if !on_frame(frame) {
                        break;
                    }
                }
                Err(e) => log::warn!("{e}"),
            }
        }
        delivered
    }
}
