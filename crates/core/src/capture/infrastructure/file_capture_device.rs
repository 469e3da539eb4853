use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::capture::domain::capture_device::{CaptureCompletion, CaptureDevice};
use crate::capture::domain::capture_state::{ArtifactHandle, CaptureError, CaptureOutcome};
use crate::shared::constants::{CAPTURE_EXTENSION, CAPTURE_FILE_PREFIX};
use crate::video::domain::image_writer::ImageWriter;
use crate::video::domain::still_source::StillSource;

/// Takes a full-resolution still and stores it as
/// `<prefix>-<unix millis>.jpg` in the output directory.
///
/// The grab and the write run on a background thread so `capture` returns
/// immediately.
pub struct FileCaptureDevice {
    still: Arc<dyn StillSource>,
    writer: Arc<dyn ImageWriter>,
    output_dir: PathBuf,
    prefix: String,
}

impl FileCaptureDevice {
    pub fn new(
        still: Arc<dyn StillSource>,
        writer: Arc<dyn ImageWriter>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            still,
            writer,
            output_dir: output_dir.into(),
            prefix: CAPTURE_FILE_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl CaptureDevice for FileCaptureDevice {
    fn capture(&mut self, completion: CaptureCompletion) {
        let still = self.still.clone();
        let writer = self.writer.clone();
        let output_dir = self.output_dir.clone();
        let prefix = self.prefix.clone();

        thread::spawn(move || {
            let outcome = match take_picture(still.as_ref(), writer.as_ref(), &output_dir, &prefix)
            {
                Ok(path) => CaptureOutcome::Success(ArtifactHandle::new(path)),
                Err(e) => CaptureOutcome::Failure(e),
            };
            completion(outcome);
        });
    }
}

fn take_picture(
    still: &dyn StillSource,
    writer: &dyn ImageWriter,
    output_dir: &Path,
    prefix: &str,
) -> Result<PathBuf, CaptureError> {
    let frame = still
        .grab()
        .map_err(|e| CaptureError::Device(e.to_string()))?;
    let path = capture_path(output_dir, prefix);
    writer
        .write(&path, &frame)
        .map_err(|e| CaptureError::Storage(format!("{}: {e}", path.display())))?;
    log::debug!("Wrote capture {}", path.display());
    Ok(path)
}

/// `<dir>/<prefix>-<unix millis>.jpg`, bumping the timestamp if a file with
/// that name already exists.
fn capture_path(output_dir: &Path, prefix: &str) -> PathBuf {
    let mut millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    loop {
        let path = output_dir.join(format!("{prefix}-{millis}.{CAPTURE_EXTENSION}"));
        if !path.exists() {
            return path;
        }
        millis += 1;
    }
}
