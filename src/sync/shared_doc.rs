//! A document paired with its change broadcaster.

use std::sync::{Arc, Mutex, PoisonError};

use automerge::{AutoCommit, ChangeHash};

use super::broadcast::{ChangeBroadcaster, Subscription};

/// An Automerge document shared between any number of sync exchanges.
///
/// Every exchange that applies a message calls
/// [`SharedDoc::notify_received_changes`] so the other exchanges wake up and
/// forward the new state to their peers. The notification can also drive
/// other consumers such as backups.
#[derive(Clone)]
pub struct SharedDoc {
    doc: Arc<Mutex<AutoCommit>>,
    broadcaster: ChangeBroadcaster,
}

impl SharedDoc {
    pub fn new(doc: AutoCommit) -> Self {
        Self {
            doc: Arc::new(Mutex::new(doc)),
            broadcaster: ChangeBroadcaster::new(),
        }
    }

    /// Runs `f` with exclusive access to the document.
    pub fn with_doc<T>(&self, f: impl FnOnce(&mut AutoCommit) -> T) -> T {
        let mut doc = self.doc.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut doc)
    }

    /// Applies a local edit and wakes every exchange so it gets sent out.
    pub fn update<T>(&self, f: impl FnOnce(&mut AutoCommit) -> T) -> T {
        let result = self.with_doc(f);
        self.notify_received_changes();
        result
    }

    /// Current heads of the document.
    pub fn heads(&self) -> Vec<ChangeHash> {
        self.with_doc(|doc| doc.get_heads())
    }

    /// Serializes the whole document.
    pub fn save(&self) -> Vec<u8> {
        self.with_doc(|doc| doc.save())
    }

    /// Subscribes to notifications about changes received by this document.
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    /// Wakes every subscriber. Called after a message has been received.
    pub fn notify_received_changes(&self) {
        self.broadcaster.broadcast();
    }

    pub fn broadcaster(&self) -> &ChangeBroadcaster {
        &self.broadcaster
    }
}

impl Default for SharedDoc {
    fn default() -> Self {
        Self::new(AutoCommit::new())
    }
}

impl std::fmt::Debug for SharedDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDoc")
            .field("subscribers", &self.broadcaster.subscriber_count())
            .finish()
    }
}
