use std::path::Path;

use crate::capture::domain::capture_state::CaptureOutcome;
use crate::capture::domain::notification_sink::{NotificationSink, NotifyError};

/// Opens a saved picture for the user.
pub type Opener = Box<dyn FnMut(&Path) -> std::io::Result<()> + Send>;

/// Reports capture outcomes through the `log` crate, optionally opening the
/// saved picture in the platform's default viewer.
pub struct LogNotificationSink {
    opener: Option<Opener>,
}

impl LogNotificationSink {
    pub fn new() -> Self {
        Self { opener: None }
    }

    /// Open each saved capture with the platform viewer.
    pub fn opening_captures(self) -> Self {
        self.with_opener(Box::new(|path: &Path| open::that(path)))
    }

    pub fn with_opener(mut self, opener: Opener) -> Self {
        self.opener = Some(opener);
        self
    }
}

impl Default for LogNotificationSink {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for LogNotificationSink {
    fn notify(&mut self, outcome: &CaptureOutcome) -> Result<(), NotifyError> {
        match outcome {
            CaptureOutcome::Success(handle) => {
                log::info!("Face detected! Capture saved to {}", handle.path().display());
                if let Some(opener) = self.opener.as_mut() {
                    opener(handle.path()).map_err(|e| {
                        NotifyError(format!("could not open {}: {e}", handle.path().display()))
                    })?;
                }
                Ok(())
            }
            CaptureOutcome::Failure(error) => {
                log::error!("Face detected but capture failed: {error}");
                Ok(())
            }
        }
    }
}
