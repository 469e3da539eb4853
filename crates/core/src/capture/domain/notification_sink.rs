use thiserror::Error;

use super::capture_state::CaptureOutcome;

#[derive(Error, Debug)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Tells the user a capture finished (successfully or not).
///
/// Fire-and-forget: callers log a returned error and move on.
pub trait NotificationSink: Send {
    fn notify(&mut self, outcome: &CaptureOutcome) -> Result<(), NotifyError>;
}
