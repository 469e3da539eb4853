use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::Receiver;

use super::capture_state::{CaptureError, CaptureOutcome, CaptureState, SessionId, StateChange};
use super::state_observers::StateObservers;

/// The one shared mutable cell of the pipeline: the capture state of the
/// current session.
///
/// Every write is a compare-and-set performed under the cell lock and
/// scoped to a [`SessionTicket`], so among concurrent attempts to make the
/// same transition exactly one wins. The winner's transition is published
/// to observers before the lock is released.
pub struct CaptureSession {
    cell: Mutex<SessionCell>,
}

struct SessionCell {
    id: SessionId,
    state: CaptureState,
    closed: bool,
    observers: StateObservers,
}

impl SessionCell {
    fn accepts(&self, id: SessionId) -> bool {
        self.id == id && !self.closed
    }

    fn current(&self) -> StateChange {
        StateChange {
            session: self.id,
            state: self.state.clone(),
        }
    }
}

impl CaptureSession {
    /// Creates the cell for a fresh session in `Idle`.
    pub fn start() -> Arc<Self> {
        Arc::new(Self {
            cell: Mutex::new(SessionCell {
                id: SessionId(1),
                state: CaptureState::Idle,
                closed: false,
                observers: StateObservers::new(),
            }),
        })
    }

    pub fn current(&self) -> StateChange {
        self.lock().current()
    }

    pub fn state(&self) -> CaptureState {
        self.lock().state.clone()
    }

    pub fn id(&self) -> SessionId {
        self.lock().id
    }

    /// True once the current session has been unbound.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Returns a ticket for the current session.
    pub fn ticket(self: &Arc<Self>) -> SessionTicket {
        let id = self.id();
        SessionTicket {
            session: Arc::clone(self),
            id,
        }
    }

    /// Returns a ticket for a session id learned from a [`StateChange`].
    /// The ticket is simply rejected if that session is no longer current.
    pub fn ticket_for(self: &Arc<Self>, id: SessionId) -> SessionTicket {
        SessionTicket {
            session: Arc::clone(self),
            id,
        }
    }

    /// Subscribes to state changes, starting with the current one.
    pub fn subscribe(&self) -> Receiver<StateChange> {
        let mut cell = self.lock();
        let current = cell.current();
        cell.observers.subscribe(current)
    }

    /// Reinitializes the cell to `Idle` under a new session id.
    ///
    /// Tickets issued before the reset stop working, so a capture or
    /// classification still in flight for the old session cannot touch the
    /// new one.
    pub fn reset(&self) -> SessionId {
        let mut cell = self.lock();
        cell.id = SessionId(cell.id.0 + 1);
        cell.state = CaptureState::Idle;
        cell.closed = false;
        let change = cell.current();
        cell.observers.publish(&change);
        log::info!("Capture session {} started", cell.id);
        cell.id
    }

    fn transition(
        &self,
        id: SessionId,
        next: impl FnOnce(&CaptureState) -> Option<CaptureState>,
    ) -> bool {
        let mut cell = self.lock();
        if !cell.accepts(id) {
            log::debug!("Ignoring transition for stale session {id}");
            return false;
        }
        let Some(state) = next(&cell.state) else {
            return false;
        };
        cell.state = state;
        let change = cell.current();
        cell.observers.publish(&change);
        true
    }

    fn close(&self, id: SessionId) -> bool {
        let mut cell = self.lock();
        if !cell.accepts(id) {
            return false;
        }
        cell.closed = true;
        log::info!("Capture session {id} closed in state {}", cell.state);
        true
    }

    fn lock(&self) -> MutexGuard<'_, SessionCell> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Capability to act on one specific session.
#[derive(Clone)]
pub struct SessionTicket {
    session: Arc<CaptureSession>,
    id: SessionId,
}

impl SessionTicket {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The session's state, or `None` once this ticket is stale or closed.
    pub fn state(&self) -> Option<CaptureState> {
        let cell = self.session.lock();
        cell.accepts(self.id).then(|| cell.state.clone())
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state(), Some(CaptureState::Idle))
    }

    /// `Idle -> Triggered`. Returns true only for the single winner.
    pub fn try_trigger(&self) -> bool {
        let won = self.session.transition(self.id, |state| match state {
            CaptureState::Idle => Some(CaptureState::Triggered),
            _ => None,
        });
        if won {
            log::info!("Face detected, capture triggered for session {}", self.id);
        }
        won
    }

    /// `Triggered -> Completed(outcome)`.
    pub fn complete(&self, outcome: CaptureOutcome) -> bool {
        self.session.transition(self.id, move |state| match state {
            CaptureState::Triggered => Some(CaptureState::Completed(outcome)),
            _ => None,
        })
    }

    /// Ends the session with a failure from `Idle` or `Triggered`.
    pub fn abort(&self, error: CaptureError) -> bool {
        self.session.transition(self.id, move |state| match state {
            CaptureState::Completed(_) => None,
            _ => Some(CaptureState::Completed(CaptureOutcome::Failure(error))),
        })
    }

    /// Unbinds the session. Nothing can transition or be published for it
    /// afterwards; a new session needs [`CaptureSession::reset`].
    pub fn close(&self) -> bool {
        self.session.close(self.id)
    }
}
