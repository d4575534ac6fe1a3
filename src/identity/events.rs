//! Identity Events
//!
//! Single source of truth for published manager state, consumed either through
//! registered listeners or through a replaying watch channel.

use futures::Stream;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

use crate::types::{Identity, IdentityStatus, ManagerState};

/// Receives every identity state transition.
///
/// Called on the manager's task; implementations must not block.
pub trait IdentityStatusListener: Send + Sync {
    fn on_identity_status_changed(&self, identity: Option<&Identity>, status: IdentityStatus);
}

impl<F> IdentityStatusListener for F
where
    F: Fn(Option<&Identity>, IdentityStatus) + Send + Sync,
{
    fn on_identity_status_changed(&self, identity: Option<&Identity>, status: IdentityStatus) {
        self(identity, status)
    }
}

/// Publishes manager state to listeners and watch subscribers.
pub(crate) struct EventBus {
    state: watch::Sender<ManagerState>,
    listeners: RwLock<Vec<Arc<dyn IdentityStatusListener>>>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ManagerState::Loading);
        Self {
            state,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn IdentityStatusListener>) {
        self.listeners.write().push(listener);
    }

    /// Replace the current state and notify every listener.
    pub(crate) fn publish(&self, state: ManagerState) {
        let identity = state.identity().cloned();
        let status = state.status();
        self.state.send_replace(state);

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_identity_status_changed(identity.as_ref(), status);
        }
    }

    pub(crate) fn current(&self) -> ManagerState {
        self.state.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ManagerState> {
        self.state.subscribe()
    }
}

/// Stream over a state channel: the current value first, then each change.
///
/// Values published faster than they are polled are coalesced to the latest.
pub fn watch_stream(receiver: watch::Receiver<ManagerState>) -> impl Stream<Item = ManagerState> {
    futures::stream::unfold((receiver, true), |(mut receiver, first)| async move {
        if !first {
            receiver.changed().await.ok()?;
        }
        let state = receiver.borrow_and_update().clone();
        Some((state, (receiver, false)))
    })
}
