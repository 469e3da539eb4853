use crate::shared::frame::Frame;

/// Provides a full-resolution still of what the camera currently sees.
pub trait StillSource: Send + Sync {
    fn grab(&self) -> Result<Frame, Box<dyn std::error::Error + Send + Sync>>;
}
