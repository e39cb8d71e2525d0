//! Auth change notifications and the listener registry behind them.
//!
//! Every subscriber gets its own unbounded queue, so an emitter never waits
//! on a slow subscriber and each subscriber sees events in emission order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::Session;

/// Kind of session transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    /// Result of the bootstrap "get current session" query
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// A single notification: what happened and the session that resulted.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

impl AuthChange {
    pub fn new(event: AuthEvent, session: Option<Session>) -> Self {
        Self { event, session }
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<AuthChange>>,
}

fn lock(listeners: &Mutex<Listeners>) -> MutexGuard<'_, Listeners> {
    // Nothing in the critical sections can leave the map half-updated.
    listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registry of auth change listeners.
/// Clone is cheap - all clones share the same registry.
#[derive(Clone, Default)]
pub struct AuthEvents {
    listeners: Arc<Mutex<Listeners>>,
}

impl AuthEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It is active as soon as this returns.
    pub fn subscribe(&self) -> AuthSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut listeners = lock(&self.listeners);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.senders.insert(id, tx);
            id
        };
        debug!(id, "Auth listener registered");

        AuthSubscription {
            id,
            rx,
            registry: Arc::downgrade(&self.listeners),
            released: false,
        }
    }

    /// Deliver a notification to every registered listener.
    pub fn emit(&self, event: AuthEvent, session: Option<Session>) {
        let change = AuthChange::new(event, session);
        let mut listeners = lock(&self.listeners);
        // Receivers gone without unsubscribing are pruned here
        listeners
            .senders
            .retain(|_, tx| tx.send(change.clone()).is_ok());
        debug!(?event, listeners = listeners.senders.len(), "Auth change emitted");
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).senders.len()
    }
}

/// A registered auth change listener.
///
/// Released exactly once: either explicitly via `unsubscribe` or when the
/// handle is dropped. After release no further notifications are queued and
/// the registry keeps no reference to it.
pub struct AuthSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<AuthChange>,
    registry: Weak<Mutex<Listeners>>,
    released: bool,
}

impl AuthSubscription {
    /// Wait for the next notification. Returns `None` once the emitting
    /// side is gone.
    pub async fn recv(&mut self) -> Option<AuthChange> {
        self.rx.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(listeners) = self.registry.upgrade() {
            lock(&listeners).senders.remove(&self.id);
        }
        self.rx.close();
        debug!(id = self.id, "Auth listener released");
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
