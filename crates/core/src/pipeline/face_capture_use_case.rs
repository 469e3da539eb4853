use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use thiserror::Error;

use crate::capture::domain::capture_session::{CaptureSession, SessionTicket};
use crate::capture::domain::capture_state::{
    CaptureError, CaptureOutcome, CaptureState, SessionId,
};
use crate::detection::domain::classifier::Classifier;
use crate::video::domain::frame_source::FrameSource;

use super::detection_coordinator::{DetectionCoordinator, FrameSubmitter, WorkerPanicked};
use super::diagnostics::DiagnosticsSink;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("session {0} is not idle (state: {1})")]
    SessionNotIdle(SessionId, CaptureState),
    #[error("Pipeline already executed")]
    AlreadyExecuted,
    #[error("frame producer thread panicked")]
    ProducerPanicked,
    #[error(transparent)]
    Worker(#[from] WorkerPanicked),
}

/// How one session ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session: SessionId,
    /// `None` when the session closed without a capture (no face before the
    /// source ran dry, or cancellation).
    pub outcome: Option<CaptureOutcome>,
    pub frames_received: usize,
    pub cancelled: bool,
}

/// Runs one capture session: binds the frame source, feeds frames to the
/// detection coordinator, and waits until the session reaches a terminal
/// state.
///
/// The capture itself is carried out by a [`CaptureConsumer`] subscribed to
/// the same session; without one a triggered session waits until
/// cancelled.
///
/// The source and classifier are handed back after each run, so the use
/// case can be executed again once the session has been reset. A run that
/// loses them to a panicking thread leaves the use case spent.
///
/// [`CaptureConsumer`]: super::capture_consumer::CaptureConsumer
pub struct FaceCaptureUseCase {
    source: Option<Box<dyn FrameSource>>,
    classifier: Option<Box<dyn Classifier>>,
    session: Arc<CaptureSession>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    cancelled: Arc<AtomicBool>,
}

impl FaceCaptureUseCase {
    pub fn new(
        source: Box<dyn FrameSource>,
        classifier: Box<dyn Classifier>,
        session: Arc<CaptureSession>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        cancelled: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            source: Some(source),
            classifier: Some(classifier),
            session,
            diagnostics,
            cancelled: cancelled.unwrap_or_else(|| Arc::new(AtomicBool::new(false))),
        }
    }

    /// Flag that stops the running session when set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn execute(&mut self) -> Result<SessionReport, PipelineError> {
        let ticket = self.session.ticket();
        match ticket.state() {
            Some(CaptureState::Idle) => {}
            state => {
                return Err(PipelineError::SessionNotIdle(
                    ticket.id(),
                    state.unwrap_or_else(|| self.session.state()),
                ))
            }
        }
        let source = self.source.take().ok_or(PipelineError::AlreadyExecuted)?;
        let classifier = self
            .classifier
            .take()
            .ok_or(PipelineError::AlreadyExecuted)?;

        let updates = self.session.subscribe();
        let coordinator =
            DetectionCoordinator::spawn(classifier, ticket.clone(), self.diagnostics.clone());
        let producer = spawn_producer(
            source,
            coordinator.submitter(),
            ticket.clone(),
            self.cancelled.clone(),
        );

        let Ok((source, frames_received)) = producer.join() else {
            if let Ok(classifier) = coordinator.cancel() {
                self.classifier = Some(classifier);
            }
            ticket.close();
            return Err(PipelineError::ProducerPanicked);
        };
        self.source = Some(source);

        if self.cancelled.load(Ordering::SeqCst) {
            self.classifier = Some(coordinator.cancel()?);
            return Ok(self.cancelled_report(&ticket, frames_received));
        }

        self.classifier = Some(coordinator.finish()?);

        let outcome = loop {
            match ticket.state() {
                Some(CaptureState::Idle) => {
                    log::info!(
                        "Session {} ended without a face after {frames_received} frames",
                        ticket.id()
                    );
                    ticket.close();
                    break None;
                }
                Some(CaptureState::Completed(outcome)) => break Some(outcome),
                None => break None,
                Some(CaptureState::Triggered) => {}
            }

            if self.cancelled.load(Ordering::SeqCst) {
                return Ok(self.cancelled_report(&ticket, frames_received));
            }
            match updates.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break None,
            }
        };

        Ok(SessionReport {
            session: ticket.id(),
            outcome,
            frames_received,
            cancelled: false,
        })
    }

    fn cancelled_report(&self, ticket: &SessionTicket, frames_received: usize) -> SessionReport {
        ticket.close();
        self.diagnostics
            .info(&format!("Session {} cancelled", ticket.id()));
        SessionReport {
            session: ticket.id(),
            outcome: None,
            frames_received,
            cancelled: true,
        }
    }
}

/// Binds the source and pushes its frames into the coordinator until the
/// session is done, the source runs dry, or the run is cancelled.
fn spawn_producer(
    mut source: Box<dyn FrameSource>,
    submitter: FrameSubmitter,
    ticket: SessionTicket,
    cancelled: Arc<AtomicBool>,
) -> thread::JoinHandle<(Box<dyn FrameSource>, usize)> {
    thread::spawn(move || {
        match source.open() {
            Ok(info) => log::debug!(
                "Frame source bound: {}x{} @ {:.1} fps",
                info.width,
                info.height,
                info.fps
            ),
            Err(e) => {
                log::error!("{e}");
                ticket.abort(CaptureError::SourceUnavailable(e.to_string()));
                return (source, 0);
            }
        }

        let received = source.subscribe(&mut |frame| {
            submitter.on_frame(frame);
            !cancelled.load(Ordering::SeqCst)
                && matches!(
                    ticket.state(),
                    Some(CaptureState::Idle) | Some(CaptureState::Triggered)
                )
        });
        source.close();
        (source, received)
    })
}
