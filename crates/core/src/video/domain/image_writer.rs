use std::path::Path;

use crate::shared::frame::Frame;

/// Writes a single frame to an image file.
pub trait ImageWriter: Send + Sync {
    /// Writes `frame` to `path`, turning it upright according to its
    /// rotation metadata.
    fn write(
        &self,
        path: &Path,
        frame: &Frame,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
