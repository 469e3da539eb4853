use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Why a capture did not produce a picture.
///
/// Every variant is terminal for the session: the state moves to
/// `Completed(Failure)` and nothing retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture device failed: {0}")]
    Device(String),
    #[error("failed to store capture: {0}")]
    Storage(String),
    #[error("camera unavailable: {0}")]
    SourceUnavailable(String),
}

/// Handle to a persisted capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    path: PathBuf,
}

impl ArtifactHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Success(ArtifactHandle),
    Failure(CaptureError),
}

/// Session-scoped capture state. Transitions only move forward:
/// `Idle -> Triggered -> Completed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Triggered,
    Completed(CaptureOutcome),
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, CaptureState::Idle)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, CaptureState::Completed(_))
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "idle"),
            CaptureState::Triggered => write!(f, "triggered"),
            CaptureState::Completed(CaptureOutcome::Success(artifact)) => {
                write!(f, "completed ({})", artifact.path().display())
            }
            CaptureState::Completed(CaptureOutcome::Failure(e)) => {
                write!(f, "completed with error ({e})")
            }
        }
    }
}

/// Generation number of a session cell. Bumped on every reset so work
/// started for an earlier session can be told apart; closing keeps the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A published transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub session: SessionId,
    pub state: CaptureState,
}
