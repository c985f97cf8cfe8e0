//! Session lifecycle events and the listener registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::ClientError;

/// Identifies one session lease between a client and the service.
///
/// A client that loses its session and reconnects gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Client-side view of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected with a live session.
    Connected,
    /// Temporarily disconnected. The session may still be alive server-side,
    /// so ephemeral nodes are not yet gone.
    Suspended,
    /// The session expired. Every ephemeral node it owned has been removed.
    Lost,
}

/// What a listener wants done with its registration after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerAction {
    Keep,
    Remove,
}

/// Handle returned by [`SessionListeners::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback invoked on every session state transition.
///
/// Runs on whatever thread drives the client's session (for a network client,
/// its I/O thread), so it must be cheap and must not block.
pub type SessionListener = Arc<dyn Fn(SessionState) -> ListenerAction + Send + Sync>;

/// Observer registry for session state transitions.
///
/// Listeners are invoked from a snapshot taken outside the registry lock, so a
/// listener may subscribe or unsubscribe (including itself) without
/// deadlocking.
#[derive(Default)]
pub struct SessionListeners {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, SessionListener)>>,
}

impl SessionListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: SessionListener) -> Result<SubscriptionId, ClientError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .map_err(|_| ClientError::Poisoned("session listeners"))?
            .push((id, listener));
        Ok(id)
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, ClientError> {
        let mut listeners = self
            .listeners
            .lock()
            .map_err(|_| ClientError::Poisoned("session listeners"))?;
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        Ok(listeners.len() != before)
    }

    /// Deliver `state` to every registered listener, dropping the ones that
    /// answer [`ListenerAction::Remove`].
    pub fn notify(&self, state: SessionState) -> Result<(), ClientError> {
        let snapshot: Vec<(SubscriptionId, SessionListener)> = self
            .listeners
            .lock()
            .map_err(|_| ClientError::Poisoned("session listeners"))?
            .clone();

        let finished: Vec<SubscriptionId> = snapshot
            .into_iter()
            .filter_map(|(id, listener)| match listener(state) {
                ListenerAction::Remove => Some(id),
                ListenerAction::Keep => None,
            })
            .collect();

        if !finished.is_empty() {
            self.listeners
                .lock()
                .map_err(|_| ClientError::Poisoned("session listeners"))?
                .retain(|(id, _)| !finished.contains(id));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SessionListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionListeners")
            .field("registered", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: Arc<AtomicUsize>, action: ListenerAction) -> SessionListener {
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            action
        })
    }

    #[test]
    fn notify_reaches_every_listener() {
        let listeners = SessionListeners::new();
        let hits = Arc::new(AtomicUsize::new(0));
        listeners
            .subscribe(counting(hits.clone(), ListenerAction::Keep))
            .unwrap();
        listeners
            .subscribe(counting(hits.clone(), ListenerAction::Keep))
            .unwrap();

        listeners.notify(SessionState::Suspended).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn remove_action_deregisters_after_first_call() {
        let listeners = SessionListeners::new();
        let hits = Arc::new(AtomicUsize::new(0));
        listeners
            .subscribe(counting(hits.clone(), ListenerAction::Remove))
            .unwrap();

        listeners.notify(SessionState::Lost).unwrap();
        listeners.notify(SessionState::Lost).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let listeners = SessionListeners::new();
        let id = listeners
            .subscribe(Arc::new(|_| ListenerAction::Keep))
            .unwrap();

        assert!(listeners.unsubscribe(id).unwrap());
        assert!(!listeners.unsubscribe(id).unwrap());
    }

    #[test]
    fn listener_can_unsubscribe_others_while_notified() {
        let listeners = Arc::new(SessionListeners::new());
        let victim = listeners
            .subscribe(Arc::new(|_| ListenerAction::Keep))
            .unwrap();

        let registry = Arc::clone(&listeners);
        listeners
            .subscribe(Arc::new(move |_| {
                let _ = registry.unsubscribe(victim);
                ListenerAction::Keep
            }))
            .unwrap();

        listeners.notify(SessionState::Connected).unwrap();
        assert_eq!(listeners.len(), 1);
    }
}
