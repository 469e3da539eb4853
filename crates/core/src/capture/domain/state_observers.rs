use crossbeam_channel::{Receiver, Sender};

use super::capture_state::StateChange;

/// Fan-out of state changes to subscribers.
///
/// Each subscriber gets its own unbounded channel. A new subscriber is
/// seeded with the current value, so it never waits for the next transition
/// to learn where the session stands. Not synchronized on its own: the
/// session cell calls it while holding its lock, which keeps every
/// subscriber's view in transition order.
#[derive(Default)]
pub struct StateObservers {
    senders: Vec<Sender<StateChange>>,
}

impl StateObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, current: StateChange) -> Receiver<StateChange> {
        let (tx, rx) = crossbeam_channel::unbounded();
        // Cannot fail: we still hold the receiver.
        let _ = tx.send(current);
        self.senders.push(tx);
        rx
    }

    /// Delivers `change` to every live subscriber, dropping the ones whose
    /// receiver is gone.
    pub fn publish(&mut self, change: &StateChange) {
        self.senders.retain(|tx| tx.send(change.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::domain::capture_state::{CaptureState, SessionId};

    fn change(state: CaptureState) -> StateChange {
        StateChange {
            session: SessionId(1),
            state,
        }
    }

    #[test]
    fn test_new_subscriber_receives_current_value() {
        let mut observers = StateObservers::new();
        let rx = observers.subscribe(change(CaptureState::Triggered));
        assert_eq!(rx.try_recv().unwrap().state, CaptureState::Triggered);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_late_subscriber_does_not_get_history() {
        let mut observers = StateObservers::new();
        let early = observers.subscribe(change(CaptureState::Idle));
        observers.publish(&change(CaptureState::Triggered));

        let late = observers.subscribe(change(CaptureState::Triggered));

        let early_seen: Vec<_> = early.try_iter().map(|c| c.state).collect();
        let late_seen: Vec<_> = late.try_iter().map(|c| c.state).collect();
        assert_eq!(early_seen, vec![CaptureState::Idle, CaptureState::Triggered]);
        assert_eq!(late_seen, vec![CaptureState::Triggered]);
    }

    #[test]
    fn test_publish_prunes_dropped_subscribers() {
        let mut observers = StateObservers::new();
        let kept = observers.subscribe(change(CaptureState::Idle));
        let dropped = observers.subscribe(change(CaptureState::Idle));
        drop(dropped);

        observers.publish(&change(CaptureState::Triggered));

        assert_eq!(observers.len(), 1);
        assert_eq!(kept.try_iter().count(), 2);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let mut observers = StateObservers::new();
        observers.publish(&change(CaptureState::Triggered));
        assert!(observers.is_empty());
    }
}
