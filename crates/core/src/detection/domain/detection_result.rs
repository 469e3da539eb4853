use thiserror::Error;

use super::classifier::ClassifierError;

/// A classifier error on one frame. Transient: the next frame is analyzed
/// as usual.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("face detection failed on frame {sequence}: {reason}")]
pub struct DetectionFailure {
    pub sequence: u64,
    pub reason: String,
}

/// Outcome of analyzing one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionResult {
    Positive,
    Negative,
    Failed(DetectionFailure),
}

impl DetectionResult {
    pub fn from_analysis(sequence: u64, analysis: Result<usize, ClassifierError>) -> Self {
        match analysis {
            Ok(0) => DetectionResult::Negative,
            Ok(_) => DetectionResult::Positive,
            Err(e) => DetectionResult::Failed(DetectionFailure {
                sequence,
                reason: e.to_string(),
            }),
        }
    }
}
