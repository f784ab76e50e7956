//! Change notifications for a shared document.
//!
//! Every subscriber owns a single-slot mailbox. A broadcast fills the slot if
//! it is empty and drops the pulse otherwise, so any number of broadcasts
//! between two reads collapse into one wake-up. Receivers re-derive what to
//! send from the sync state, never from the pulse itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TryRecvError};

type Subscribers = Vec<(u64, mpsc::Sender<bool>)>;

/// Fans out "something changed" pulses to every current subscriber.
#[derive(Clone, Default)]
pub struct ChangeBroadcaster {
    inner: Arc<BroadcasterInner>,
}

#[derive(Default)]
struct BroadcasterInner {
    next_id: AtomicU64,
    subscribers: Mutex<Subscribers>,
}

impl BroadcasterInner {
    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        let mut subscribers = self.lock();
        if let Some(index) = subscribers.iter().position(|(sub_id, _)| *sub_id == id) {
            // Dropping the only sender closes the channel.
            subscribers.remove(index);
        }
    }
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(1);
        self.inner.lock().push((id, sender));
        Subscription {
            id,
            receiver: tokio::sync::Mutex::new(receiver),
            broadcaster: Arc::clone(&self.inner),
        }
    }

    /// Sends a pulse to every subscriber without blocking.
    ///
    /// Subscribers whose slot is already full keep their pending pulse.
    pub fn broadcast(&self) {
        let subscribers = self.inner.lock();
        for (_, sender) in subscribers.iter() {
            let _ = sender.try_send(true);
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }
}

/// A live subscription to change notifications.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    id: u64,
    receiver: tokio::sync::Mutex<mpsc::Receiver<bool>>,
    broadcaster: Arc<BroadcasterInner>,
}

impl Subscription {
    /// Waits for the next pulse.
    ///
    /// Returns `false` once the subscription has been closed.
    pub async fn changed(&self) -> bool {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await.unwrap_or(false)
    }

    /// Takes a pending pulse without waiting.
    pub fn try_changed(&self) -> Result<bool, TryRecvError> {
        match self.receiver.try_lock() {
            Ok(mut receiver) => receiver.try_recv(),
            Err(_) => Err(TryRecvError::Empty),
        }
    }

    /// Removes this subscription and closes its channel. Calling this more
    /// than once has no further effect.
    pub fn unsubscribe(&self) {
        self.broadcaster.remove(self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
