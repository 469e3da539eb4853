use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use crate::capture::domain::capture_device::CaptureDevice;
use crate::capture::domain::capture_session::CaptureSession;
use crate::capture::domain::capture_state::{CaptureOutcome, CaptureState, SessionId, StateChange};
use crate::capture::domain::notification_sink::NotificationSink;

#[derive(Error, Debug)]
#[error("capture consumer thread panicked")]
pub struct ConsumerPanicked;

/// Single-winner guard: at most one capture per session id, however many
/// times `Triggered` is observed.
#[derive(Default)]
pub struct CaptureGate {
    last_claimed: AtomicU64,
}

impl CaptureGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true for exactly one caller per session id. Ids only move
    /// forward, so a late duplicate for an older session also loses.
    pub fn claim(&self, session: SessionId) -> bool {
        self.last_claimed.fetch_max(session.0, Ordering::SeqCst) < session.0
    }
}

/// Watches the session and performs the capture once it is triggered.
///
/// Runs on its own thread. The device reports back through a completion
/// callback that may fire on any thread; the callback only forwards the
/// outcome over a channel, and the consumer thread applies
/// `Triggered -> Completed` and tells the user.
pub struct CaptureConsumer {
    shutdown_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

struct ConsumerLoop {
    session: Arc<CaptureSession>,
    device: Box<dyn CaptureDevice>,
    notifier: Box<dyn NotificationSink>,
    gate: CaptureGate,
    last_notified: SessionId,
    completed_tx: Sender<(SessionId, CaptureOutcome)>,
}

impl CaptureConsumer {
    pub fn spawn(
        session: Arc<CaptureSession>,
        device: Box<dyn CaptureDevice>,
        notifier: Box<dyn NotificationSink>,
    ) -> Self {
        let updates = session.subscribe();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let (completed_tx, completed_rx) = crossbeam_channel::unbounded();

        let consumer = ConsumerLoop {
            session,
            device,
            notifier,
            gate: CaptureGate::new(),
            last_notified: SessionId(0),
            completed_tx,
        };
        let worker =
            std::thread::spawn(move || consumer.run(updates, completed_rx, shutdown_rx));

        Self {
            shutdown_tx,
            worker: Some(worker),
        }
    }

    /// Stops the consumer. Completions and state changes that already
    /// arrived are still applied and notified; no new capture starts.
    pub fn shutdown(mut self) -> Result<(), ConsumerPanicked> {
        let _ = self.shutdown_tx.send(());
        match self.worker.take() {
            Some(handle) => handle.join().map_err(|_| ConsumerPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for CaptureConsumer {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = self.shutdown_tx.send(());
            let _ = handle.join();
        }
    }
}

impl ConsumerLoop {
    fn run(
        mut self,
        updates: Receiver<StateChange>,
        completed_rx: Receiver<(SessionId, CaptureOutcome)>,
        shutdown_rx: Receiver<()>,
    ) {
        let mut running = true;
        while running {
            crossbeam_channel::select! {
                recv(updates) -> msg => {
                    match msg {
                        Ok(change) => self.on_change(change, true),
                        Err(_) => running = false,
                    }
                },
                recv(completed_rx) -> msg => {
                    if let Ok((session, outcome)) = msg {
                        self.on_completed(session, outcome);
                    }
                },
                recv(shutdown_rx) -> _ => {
                    self.drain(&updates, &completed_rx);
                    running = false;
                },
            }
        }
        log::debug!("Capture consumer stopped");
    }

    fn drain(
        &mut self,
        updates: &Receiver<StateChange>,
        completed_rx: &Receiver<(SessionId, CaptureOutcome)>,
    ) {
        for (session, outcome) in completed_rx.try_iter() {
            self.on_completed(session, outcome);
        }
        for change in updates.try_iter() {
            self.on_change(change, false);
        }
    }

    fn on_change(&mut self, change: StateChange, may_capture: bool) {
        match change.state {
            CaptureState::Idle => {}
            CaptureState::Triggered => {
                if may_capture && self.gate.claim(change.session) {
                    self.start_capture(change.session);
                }
            }
            CaptureState::Completed(outcome) => {
                if change.session > self.last_notified {
                    self.last_notified = change.session;
                    self.notify(&outcome);
                }
            }
        }
    }

    fn start_capture(&mut self, session: SessionId) {
        log::info!("Taking picture for session {session}");
        let completed_tx = self.completed_tx.clone();
        self.device.capture(Box::new(move |outcome| {
            // The consumer may be gone by now; the session was closed with it.
            let _ = completed_tx.send((session, outcome));
        }));
    }

    fn on_completed(&mut self, session: SessionId, outcome: CaptureOutcome) {
        match &outcome {
            CaptureOutcome::Success(artifact) => {
                log::info!("Capture saved to {}", artifact.path().display());
            }
            CaptureOutcome::Failure(e) => log::error!("Capture failed: {e}"),
        }
        if !self.session.ticket_for(session).complete(outcome) {
            log::debug!("Ignoring capture result for session {session}, no longer current");
        }
    }

    fn notify(&mut self, outcome: &CaptureOutcome) {
        if let Err(e) = self.notifier.notify(outcome) {
            log::warn!("{e}");
        }
    }
}
