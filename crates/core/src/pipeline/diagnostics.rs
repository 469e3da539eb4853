use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::detection::domain::detection_result::DetectionFailure;
use crate::shared::frame::FrameReleaseError;

/// Cross-cutting sink for pipeline events that are worth recording but
/// never worth failing over: detection errors, release errors, dropped
/// frames.
///
/// Shared between the producer and worker threads, hence `&self` and
/// `Sync`.
pub trait DiagnosticsSink: Send + Sync {
    /// A classifier call failed. The pipeline keeps going.
    fn detection_failed(&self, failure: &DetectionFailure);

    /// A frame's release hook failed.
    fn release_failed(&self, error: &FrameReleaseError);

    /// A frame was analyzed; `duration_ms` is the classifier latency.
    fn frame_analyzed(&self, sequence: u64, duration_ms: f64);

    /// A frame arrived after the session left `Idle` and was dropped unseen.
    fn frame_discarded(&self, sequence: u64);

    /// A queued frame was replaced by a newer one before analysis.
    fn frame_replaced(&self, sequence: u64);

    /// Log a human-readable status message.
    fn info(&self, message: &str);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

/// Silent sink used by tests and embedders with their own reporting.
pub struct NullDiagnostics;

impl DiagnosticsSink for NullDiagnostics {
    fn detection_failed(&self, _failure: &DetectionFailure) {}
    fn release_failed(&self, _error: &FrameReleaseError) {}
    fn frame_analyzed(&self, _sequence: u64, _duration_ms: f64) {}
    fn frame_discarded(&self, _sequence: u64) {}
    fn frame_replaced(&self, _sequence: u64) {}
    fn info(&self, _message: &str) {}
}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct DiagnosticsCounters {
    pub analyzed: usize,
    pub detection_failures: usize,
    pub release_failures: usize,
    pub discarded: usize,
    pub replaced: usize,
    pub analysis_ms: Vec<f64>,
}

/// Sink that reports through the `log` crate and keeps counters for an
/// end-of-run summary.
pub struct LogDiagnostics {
    counters: Mutex<DiagnosticsCounters>,
    start_time: Instant,
}

impl LogDiagnostics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(DiagnosticsCounters::default()),
            start_time: Instant::now(),
        }
    }

    pub fn counters(&self) -> DiagnosticsCounters {
        self.lock().clone()
    }

    /// Returns the formatted summary, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        let counters = self.lock();
        let touched = counters.analyzed
            + counters.detection_failures
            + counters.discarded
            + counters.replaced;
        if touched == 0 {
            return None;
        }

        let elapsed_s = self.start_time.elapsed().as_secs_f64();
        let mut lines = vec![format!("Detection summary ({elapsed_s:.1}s total):")];
        lines.push(format!("  analyzed:           {}", counters.analyzed));
        lines.push(format!("  detection failures: {}", counters.detection_failures));
        lines.push(format!("  replaced (stale):   {}", counters.replaced));
        lines.push(format!("  discarded (done):   {}", counters.discarded));
        if counters.release_failures > 0 {
            lines.push(format!("  release failures:   {}", counters.release_failures));
        }
        if !counters.analysis_ms.is_empty() {
            let total: f64 = counters.analysis_ms.iter().sum();
            let avg = total / counters.analysis_ms.len() as f64;
            lines.push(format!("  analysis: avg {avg:.1}ms"));
        }
        Some(lines.join("\n"))
    }

    fn lock(&self) -> MutexGuard<'_, DiagnosticsCounters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LogDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsSink for LogDiagnostics {
    fn detection_failed(&self, failure: &DetectionFailure) {
        self.lock().detection_failures += 1;
        log::warn!("{failure}");
    }

    fn release_failed(&self, error: &FrameReleaseError) {
        self.lock().release_failures += 1;
        log::warn!("{error}");
    }

    fn frame_analyzed(&self, sequence: u64, duration_ms: f64) {
        let mut counters = self.lock();
        counters.analyzed += 1;
        counters.analysis_ms.push(duration_ms);
        log::trace!("Analyzed frame {sequence} in {duration_ms:.1}ms");
    }

    fn frame_discarded(&self, sequence: u64) {
        self.lock().discarded += 1;
        log::trace!("Discarded frame {sequence}, capture already triggered");
    }

    fn frame_replaced(&self, sequence: u64) {
        self.lock().replaced += 1;
        log::trace!("Dropped stale frame {sequence}");
    }

    fn info(&self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
