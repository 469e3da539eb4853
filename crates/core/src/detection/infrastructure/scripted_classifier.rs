use std::collections::HashMap;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::detection::domain::classifier::{Classifier, ClassifierError};
use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("failed to read detection script {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid detection script: {0}")]
    Parse(#[from] serde_json::Error),
}

/// What the classifier reports for one frame.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ScriptedResult {
    Positive,
    Negative,
    Failed(String),
}

#[derive(Deserialize, Debug)]
struct Script {
    #[serde(default = "default_result")]
    default: ScriptedResult,
    #[serde(default)]
    latency_ms: u64,
    #[serde(default)]
    frames: HashMap<u64, ScriptedResult>,
}

fn default_result() -> ScriptedResult {
    ScriptedResult::Negative
}

/// Replays pre-computed face detection results by frame sequence.
///
/// Stands in for a real model: the script says which frames contain a face
/// and which fail, and `latency_ms` simulates inference time.
pub struct ScriptedClassifier {
    results: HashMap<u64, ScriptedResult>,
    default: ScriptedResult,
    latency: Duration,
}

impl ScriptedClassifier {
    pub fn new(results: HashMap<u64, ScriptedResult>, default: ScriptedResult) -> Self {
        Self {
            results,
            default,
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        let script: Script = serde_json::from_str(json)?;
        Ok(Self::new(script.frames, script.default)
            .with_latency(Duration::from_millis(script.latency_ms)))
    }

    pub fn from_path(path: &Path) -> Result<Self, ScriptError> {
        let json = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }
}

impl Classifier for ScriptedClassifier {
    fn analyze(&mut self, frame: &Frame) -> Result<usize, ClassifierError> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        match self.results.get(&frame.sequence()).unwrap_or(&self.default) {
            ScriptedResult::Positive => Ok(1),
            ScriptedResult::Negative => Ok(0),
            ScriptedResult::Failed(reason) => Err(reason.clone().into()),
        }
    }
}
