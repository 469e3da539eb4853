use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Instant;

use thiserror::Error;

use crate::capture::domain::capture_session::SessionTicket;
use crate::detection::domain::classifier::Classifier;
use crate::detection::domain::detection_result::DetectionResult;
use crate::shared::frame::Frame;

use super::diagnostics::DiagnosticsSink;
use super::latest_frame_slot::LatestFrameSlot;

#[derive(Error, Debug)]
#[error("classification worker panicked")]
pub struct WorkerPanicked;

/// Feeds live frames to a classifier and fires the capture trigger on the
/// first face.
///
/// Layout: `producer --on_frame--> [latest-frame slot] --> worker (classify) --> session cell`
///
/// The producer never blocks on classification. The worker analyzes one
/// frame at a time, so at most one frame is in flight and at most one more
/// is queued. Every frame that reaches the coordinator is released exactly
/// once, whichever way it leaves.
pub struct DetectionCoordinator {
    submitter: FrameSubmitter,
    worker: Option<JoinHandle<Box<dyn Classifier>>>,
}

impl DetectionCoordinator {
    /// Starts the classification worker for the session behind `ticket`.
    pub fn spawn(
        classifier: Box<dyn Classifier>,
        ticket: SessionTicket,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        let slot = Arc::new(LatestFrameSlot::new());
        let teardown = Arc::new(Teardown::default());
        let handler = CompletionHandler {
            ticket: ticket.clone(),
            teardown: teardown.clone(),
            diagnostics: diagnostics.clone(),
        };
        let worker = spawn_worker(classifier, slot.clone(), handler);

        Self {
            submitter: FrameSubmitter {
                ticket,
                slot,
                teardown,
                diagnostics,
            },
            worker: Some(worker),
        }
    }

    /// Accepts one frame. See [`FrameSubmitter::on_frame`].
    pub fn on_frame(&self, frame: Frame) {
        self.submitter.on_frame(frame);
    }

    /// A cloneable handle the producer thread can own.
    pub fn submitter(&self) -> FrameSubmitter {
        self.submitter.clone()
    }

    /// The transition logic the worker runs after each classification.
    /// Exposed for classifiers that complete on their own threads.
    pub fn completion_handler(&self) -> CompletionHandler {
        CompletionHandler {
            ticket: self.submitter.ticket.clone(),
            teardown: self.submitter.teardown.clone(),
            diagnostics: self.submitter.diagnostics.clone(),
        }
    }

    /// Stops accepting frames, lets the worker analyze the frame still
    /// queued, and hands the classifier back.
    pub fn finish(mut self) -> Result<Box<dyn Classifier>, WorkerPanicked> {
        self.submitter.slot.close();
        self.join()
    }

    /// Tears the coordinator down mid-flight: the queued frame is released
    /// unanalyzed and a classification still running is ignored. Nothing is
    /// published for this coordinator once `cancel` returns.
    pub fn cancel(mut self) -> Result<Box<dyn Classifier>, WorkerPanicked> {
        self.stop();
        self.join()
    }

    fn stop(&self) {
        self.submitter.teardown.cancel();
        self.submitter.slot.close();
        if let Some(frame) = self.submitter.slot.discard() {
            release_frame(frame, &*self.submitter.diagnostics);
        }
    }

    fn join(&mut self) -> Result<Box<dyn Classifier>, WorkerPanicked> {
        match self.worker.take() {
            Some(handle) => handle.join().map_err(|_| WorkerPanicked),
            None => Err(WorkerPanicked),
        }
    }
}

impl Drop for DetectionCoordinator {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
            let _ = self.join();
        }
    }
}

/// Producer-side entry point of the coordinator.
#[derive(Clone)]
pub struct FrameSubmitter {
    ticket: SessionTicket,
    slot: Arc<LatestFrameSlot>,
    teardown: Arc<Teardown>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl FrameSubmitter {
    /// Accepts one frame without waiting for classification.
    ///
    /// Frames arriving once the session has left `Idle` (or after teardown)
    /// are released on the spot. Otherwise the frame takes the queue slot,
    /// displacing and releasing any older frame still waiting there.
    pub fn on_frame(&self, frame: Frame) {
        if self.teardown.is_cancelled() || !self.ticket.is_idle() {
            self.diagnostics.frame_discarded(frame.sequence());
            release_frame(frame, &*self.diagnostics);
            return;
        }

        match self.slot.offer(frame) {
            Ok(None) => {}
            Ok(Some(replaced)) => {
                self.diagnostics.frame_replaced(replaced.sequence());
                release_frame(replaced, &*self.diagnostics);
            }
            Err(refused) => {
                self.diagnostics.frame_discarded(refused.sequence());
                release_frame(refused, &*self.diagnostics);
            }
        }
    }
}

/// Applies one classification result to the session.
#[derive(Clone)]
pub struct CompletionHandler {
    ticket: SessionTicket,
    teardown: Arc<Teardown>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl CompletionHandler {
    /// Releases `frame`, then reacts to `result`. Returns true only for the
    /// call whose positive result won the `Idle -> Triggered` transition.
    pub fn handle(&self, frame: Frame, result: DetectionResult) -> bool {
        let sequence = frame.sequence();
        release_frame(frame, &*self.diagnostics);

        // Holding the gate keeps `cancel` from returning while a trigger is
        // being published.
        self.teardown
            .unless_cancelled(|| match result {
                DetectionResult::Positive => {
                    let won = self.ticket.try_trigger();
                    if !won {
                        log::debug!("Frame {sequence}: face found but capture already triggered");
                    }
                    won
                }
                DetectionResult::Negative => false,
                DetectionResult::Failed(failure) => {
                    self.diagnostics.detection_failed(&failure);
                    false
                }
            })
            .unwrap_or(false)
    }
}

/// Cancellation flag whose check-then-act sections are exclusive with
/// teardown: once [`Teardown::cancel`] returns, no section is running and
/// none will start.
#[derive(Default)]
struct Teardown {
    cancelled: AtomicBool,
    gate: RwLock<()>,
}

impl Teardown {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        let _exclusive = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn unless_cancelled<T>(&self, section: impl FnOnce() -> T) -> Option<T> {
        let _shared = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            return None;
        }
        Some(section())
    }
}

fn spawn_worker(
    mut classifier: Box<dyn Classifier>,
    slot: Arc<LatestFrameSlot>,
    handler: CompletionHandler,
) -> JoinHandle<Box<dyn Classifier>> {
    std::thread::spawn(move || {
        while let Some(frame) = slot.take() {
            if handler.teardown.is_cancelled() {
                release_frame(frame, &*handler.diagnostics);
                continue;
            }
            // The session may have left Idle while this frame sat in the slot.
            if !handler.ticket.is_idle() {
                handler.diagnostics.frame_discarded(frame.sequence());
                release_frame(frame, &*handler.diagnostics);
                continue;
            }

            let sequence = frame.sequence();
            let started = Instant::now();
            let analysis = classifier.analyze(&frame);
            handler
                .diagnostics
                .frame_analyzed(sequence, started.elapsed().as_secs_f64() * 1000.0);

            handler.handle(frame, DetectionResult::from_analysis(sequence, analysis));
        }
        classifier
    })
}

fn release_frame(frame: Frame, diagnostics: &dyn DiagnosticsSink) {
    if let Err(e) = frame.release() {
        diagnostics.release_failed(&e);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    use crossbeam_channel::{Receiver, Sender};
    use rstest::rstest;

    use super::*;
    use crate::capture::domain::capture_session::CaptureSession;
    use crate::capture::domain::capture_state::{CaptureError, CaptureState};
    use crate::detection::domain::classifier::ClassifierError;
    use crate::pipeline::diagnostics::{LogDiagnostics, NullDiagnostics};
    use crate::shared::frame::testing::{tracked_frame, CountingRelease};

    // --- Stubs ---

    /// Answers from a table keyed by frame sequence; unknown frames are
    /// negative. Records every frame it sees.
    struct StubClassifier {
        results: HashMap<u64, Result<usize, String>>,
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl StubClassifier {
        fn new(results: Vec<(u64, Result<usize, String>)>) -> Self {
            Self {
                results: results.into_iter().collect(),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Classifier for StubClassifier {
        fn analyze(&mut self, frame: &Frame) -> Result<usize, ClassifierError> {
            self.seen.lock().unwrap().push(frame.sequence());
            match self.results.get(&frame.sequence()) {
                Some(Ok(faces)) => Ok(*faces),
                Some(Err(reason)) => Err(reason.clone().into()),
                None => Ok(0),
            }
        }
    }

    /// Blocks each analysis until the test lets it go.
    struct GatedClassifier {
        gate: Receiver<usize>,
        started: Sender<u64>,
    }

    impl Classifier for GatedClassifier {
        fn analyze(&mut self, frame: &Frame) -> Result<usize, ClassifierError> {
            let _ = self.started.send(frame.sequence());
            self.gate.recv().map_err(|e| e.into())
        }
    }

    fn gated() -> (GatedClassifier, Sender<usize>, Receiver<u64>) {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        (
            GatedClassifier {
                gate: gate_rx,
                started: started_tx,
            },
            gate_tx,
            started_rx,
        )
    }

    fn null_diagnostics() -> Arc<dyn DiagnosticsSink> {
        Arc::new(NullDiagnostics)
    }

    /// Delivers frames one at a time, waiting for each to be analyzed.
    fn feed_sequentially(
        coordinator: &DetectionCoordinator,
        started: &Receiver<u64>,
        gate: &Sender<usize>,
        faces: &[usize],
        count: &Arc<AtomicUsize>,
    ) {
        for (seq, f) in faces.iter().enumerate() {
            coordinator.on_frame(tracked_frame(seq as u64, count));
            started.recv_timeout(Duration::from_secs(5)).unwrap();
            gate.send(*f).unwrap();
        }
    }

    // --- Tests ---

    #[test]
    fn test_negative_negative_positive_triggers_once() {
        let session = CaptureSession::start();
        let updates = session.subscribe();
        let released = Arc::new(AtomicUsize::new(0));
        let (classifier, gate, started) = gated();

        let coordinator =
            DetectionCoordinator::spawn(Box::new(classifier), session.ticket(), null_diagnostics());
        feed_sequentially(&coordinator, &started, &gate, &[0, 0, 1], &released);
        coordinator.finish().unwrap();

        let seen: Vec<CaptureState> = updates.try_iter().map(|c| c.state).collect();
        assert_eq!(seen, vec![CaptureState::Idle, CaptureState::Triggered]);
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_negative_results_leave_session_idle() {
        let session = CaptureSession::start();
        let released = Arc::new(AtomicUsize::new(0));
        let classifier = StubClassifier::new(vec![]);
        let seen = classifier.seen.clone();

        let coordinator =
            DetectionCoordinator::spawn(Box::new(classifier), session.ticket(), null_diagnostics());
        coordinator.on_frame(tracked_frame(0, &released));
        coordinator.finish().unwrap();

        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(*seen.lock().unwrap(), vec![0]);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detection_failure_is_reported_and_not_fatal() {
        let session = CaptureSession::start();
        let updates = session.subscribe();
        let released = Arc::new(AtomicUsize::new(0));
        let diagnostics = Arc::new(LogDiagnostics::new());
        let (classifier, gate, started) = gated();

        let coordinator =
            DetectionCoordinator::spawn(Box::new(classifier), session.ticket(), diagnostics.clone());
        coordinator.on_frame(tracked_frame(0, &released));
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        drop(gate); // analysis errors out
        coordinator.finish().unwrap();

        assert_eq!(diagnostics.counters().detection_failures, 1);
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(updates.try_iter().count(), 1); // only the initial Idle
    }

    #[test]
    fn test_failure_then_positive_still_triggers() {
        let session = CaptureSession::start();
        let released = Arc::new(AtomicUsize::new(0));
        let classifier = StubClassifier::new(vec![(0, Err("busy".into())), (1, Ok(1))]);
        let seen = classifier.seen.clone();
        let coordinator =
            DetectionCoordinator::spawn(Box::new(classifier), session.ticket(), null_diagnostics());

        coordinator.on_frame(tracked_frame(0, &released));
        while seen.lock().unwrap().is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        coordinator.on_frame(tracked_frame(1, &released));
        coordinator.finish().unwrap();

        assert_eq!(session.state(), CaptureState::Triggered);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    #[case::positive(1)]
    #[case::negative(0)]
    fn test_frame_released_exactly_once_per_outcome(#[case] faces: usize) {
        let session = CaptureSession::start();
        let released = Arc::new(AtomicUsize::new(0));
        let classifier = StubClassifier::new(vec![(0, Ok(faces))]);
        let coordinator =
            DetectionCoordinator::spawn(Box::new(classifier), session.ticket(), null_diagnostics());

        coordinator.on_frame(tracked_frame(0, &released));
        coordinator.finish().unwrap();

        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_frames_after_trigger_are_dropped_without_analysis() {
        let session = CaptureSession::start();
        let ticket = session.ticket();
        assert!(ticket.try_trigger());
        let released = Arc::new(AtomicUsize::new(0));
        let classifier = StubClassifier::new(vec![(0, Ok(1))]);
        let seen = classifier.seen.clone();
        let diagnostics = Arc::new(LogDiagnostics::new());

        let coordinator =
            DetectionCoordinator::spawn(Box::new(classifier), ticket, diagnostics.clone());
        for seq in 0..5 {
            coordinator.on_frame(tracked_frame(seq, &released));
        }
        coordinator.finish().unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(released.load(Ordering::SeqCst), 5);
        assert_eq!(diagnostics.counters().discarded, 5);
    }

    #[test]
    fn test_frames_after_completion_are_dropped() {
        let session = CaptureSession::start();
        let ticket = session.ticket();
        ticket.abort(CaptureError::Device("unplugged".into()));
        let released = Arc::new(AtomicUsize::new(0));
        let classifier = StubClassifier::new(vec![]);
        let seen = classifier.seen.clone();

        let coordinator = DetectionCoordinator::spawn(Box::new(classifier), ticket, null_diagnostics());
        coordinator.on_frame(tracked_frame(0, &released));
        coordinator.finish().unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backpressure_keeps_one_queued_frame_latest_wins() {
        let session = CaptureSession::start();
        let released = Arc::new(AtomicUsize::new(0));
        let diagnostics = Arc::new(LogDiagnostics::new());
        let (classifier, gate, started) = gated();

        let coordinator =
            DetectionCoordinator::spawn(Box::new(classifier), session.ticket(), diagnostics.clone());

        // Frame 0 goes in flight and blocks; frames 1..=10 pile up behind it.
        coordinator.on_frame(tracked_frame(0, &released));
        assert_eq!(started.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
        for seq in 1..=10 {
            coordinator.on_frame(tracked_frame(seq, &released));
        }
        // Only frame 10 survives; 1..=9 were replaced and released already.
        assert_eq!(released.load(Ordering::SeqCst), 9);
        assert_eq!(diagnostics.counters().replaced, 9);

        gate.send(0).unwrap();
        assert_eq!(started.recv_timeout(Duration::from_secs(5)).unwrap(), 10);
        gate.send(0).unwrap();
        coordinator.finish().unwrap();

        assert_eq!(released.load(Ordering::SeqCst), 11);
        assert_eq!(diagnostics.counters().analyzed, 2);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(16)]
    fn test_concurrent_positive_completions_trigger_once(#[case] completions: usize) {
        let session = CaptureSession::start();
        let released = Arc::new(AtomicUsize::new(0));
        let coordinator = DetectionCoordinator::spawn(
            Box::new(StubClassifier::new(vec![])),
            session.ticket(),
            null_diagnostics(),
        );
        let barrier = Arc::new(Barrier::new(completions));

        let handles: Vec<_> = (0..completions)
            .map(|seq| {
                let handler = coordinator.completion_handler();
                let barrier = barrier.clone();
                let frame = tracked_frame(seq as u64, &released);
                thread::spawn(move || {
                    barrier.wait();
                    handler.handle(frame, DetectionResult::Positive)
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        coordinator.finish().unwrap();

        assert_eq!(winners, 1);
        assert_eq!(session.state(), CaptureState::Triggered);
        assert_eq!(released.load(Ordering::SeqCst), completions);
    }

    #[test]
    fn test_cancel_mid_flight_publishes_nothing() {
        let session = CaptureSession::start();
        let updates = session.subscribe();
        let released = Arc::new(AtomicUsize::new(0));
        let (classifier, gate, started) = gated();

        let coordinator =
            DetectionCoordinator::spawn(Box::new(classifier), session.ticket(), null_diagnostics());
        coordinator.on_frame(tracked_frame(0, &released));
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        coordinator.on_frame(tracked_frame(1, &released)); // queued

        // The in-flight analysis will come back positive after teardown began.
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            gate.send(1).unwrap();
        });
        coordinator.cancel().unwrap();
        releaser.join().unwrap();

        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(updates.try_iter().count(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_completion_racing_cancel_never_publishes_after_teardown() {
        for _ in 0..500 {
            let session = CaptureSession::start();
            let updates = session.subscribe();
            updates.recv().unwrap(); // current Idle
            let released = Arc::new(AtomicUsize::new(0));
            let coordinator = DetectionCoordinator::spawn(
                Box::new(StubClassifier::new(vec![])),
                session.ticket(),
                null_diagnostics(),
            );
            let handler = coordinator.completion_handler();
            let barrier = Arc::new(Barrier::new(2));
            let frame = tracked_frame(0, &released);
            let racer = {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    handler.handle(frame, DetectionResult::Positive)
                })
            };

            barrier.wait();
            coordinator.cancel().unwrap();
            let published_during_teardown = updates.try_iter().count();
            let won = racer.join().unwrap();

            assert_eq!(updates.try_iter().count(), 0);
            assert_eq!(published_during_teardown, usize::from(won));
            assert_eq!(released.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_stale_ticket_after_reset_cannot_trigger() {
        let session = CaptureSession::start();
        let stale = session.ticket();
        session.reset();
        let coordinator = DetectionCoordinator::spawn(
            Box::new(StubClassifier::new(vec![])),
            stale,
            null_diagnostics(),
        );
        let released = Arc::new(AtomicUsize::new(0));

        let won = coordinator
            .completion_handler()
            .handle(tracked_frame(0, &released), DetectionResult::Positive);
        coordinator.finish().unwrap();

        assert!(!won);
        assert_eq!(session.state(), CaptureState::Idle);
    }

    #[test]
    fn test_drop_releases_queued_frame() {
        let session = CaptureSession::start();
        let released = Arc::new(AtomicUsize::new(0));
        let (classifier, gate, started) = gated();
        {
            let coordinator = DetectionCoordinator::spawn(
                Box::new(classifier),
                session.ticket(),
                null_diagnostics(),
            );
            coordinator.on_frame(tracked_frame(0, &released));
            started.recv_timeout(Duration::from_secs(5)).unwrap();
            coordinator.on_frame(tracked_frame(1, &released));
            drop(gate);
        }
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_release_failure_is_reported() {
        let session = CaptureSession::start();
        let count = Arc::new(AtomicUsize::new(0));
        let diagnostics = Arc::new(LogDiagnostics::new());
        let coordinator = DetectionCoordinator::spawn(
            Box::new(StubClassifier::new(vec![])),
            session.ticket(),
            diagnostics.clone(),
        );

        let frame = Frame::new(vec![0u8; 3], 1, 1, 3, 0).with_releaser(Box::new(
            CountingRelease {
                count: count.clone(),
                fail: true,
            },
        ));
        coordinator.on_frame(frame);
        coordinator.finish().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(diagnostics.counters().release_failures, 1);
    }

    #[test]
    fn test_finish_returns_classifier_for_reuse() {
        let session = CaptureSession::start();
        let coordinator = DetectionCoordinator::spawn(
            Box::new(StubClassifier::new(vec![])),
            session.ticket(),
            null_diagnostics(),
        );
        let mut classifier = coordinator.finish().unwrap();
        assert_eq!(
            classifier
                .analyze(&Frame::new(vec![0u8; 3], 1, 1, 3, 0))
                .unwrap(),
            0
        );
    }
}
