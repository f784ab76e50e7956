//! The sync state of one exchange.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use automerge::sync::{self, SyncDoc};
use automerge::ChangeHash;

use super::policy::ReadPredicate;
use super::shared_doc::SharedDoc;
use crate::error::SyncError;

/// Summary of a message that was applied to the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMessageInfo {
    /// Heads the sender had when it produced the message.
    pub heads: Vec<ChangeHash>,
    /// Number of change chunks embedded in the message, whether or not the
    /// local document already had them.
    pub changes: usize,
    /// Size of the encoded message.
    pub bytes: usize,
}

/// Sync state for one peer, bound to a shared document.
///
/// Clones share the same state. One exchange owns a session and uses it from
/// exactly two places, its inbound and its outbound loop; calls from those
/// two loops are serialized by the session's lock. The lock order is always
/// sync state first, then the document.
#[derive(Clone)]
pub struct SyncSession {
    doc: SharedDoc,
    state: Arc<Mutex<sync::State>>,
}

impl SyncSession {
    /// Creates a session with a fresh sync state.
    pub fn new(doc: SharedDoc) -> Self {
        Self::with_state(doc, sync::State::new())
    }

    /// Creates a session resuming from an existing sync state.
    pub fn with_state(doc: SharedDoc, state: sync::State) -> Self {
        Self {
            doc,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn doc(&self) -> &SharedDoc {
        &self.doc
    }

    /// Generates the next message for the peer, or `None` if there is
    /// nothing to send right now.
    pub fn generate_message(&self) -> Option<sync::Message> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.doc
            .with_doc(|doc| doc.sync().generate_sync_message(&mut *state))
    }

    /// Runs `predicate` on a decoded message and applies it if accepted.
    ///
    /// Returns `Ok(None)` when the predicate skipped the message. `index` is
    /// the 1-based message index used in errors.
    pub fn receive_message(
        &self,
        index: usize,
        message: sync::Message,
        bytes: usize,
        predicate: &dyn ReadPredicate,
    ) -> Result<Option<SyncMessageInfo>, SyncError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.doc.with_doc(|doc| {
            let accepted = predicate
                .accept(doc, &message)
                .map_err(|source| SyncError::Predicate { index, source })?;
            if !accepted {
                return Ok(None);
            }

            let heads = message.heads.clone();
            let changes = message.changes.len();
            doc.sync()
                .receive_sync_message(&mut *state, message)
                .map_err(|source| SyncError::Engine { index, source })?;

            Ok(Some(SyncMessageInfo {
                heads,
                changes,
                bytes,
            }))
        })
    }
}

impl fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSession").finish_non_exhaustive()
    }
}

/// Displays heads as comma separated hex hashes.
pub struct HeadsDisplay<'a>(pub &'a [ChangeHash]);

impl fmt::Display for HeadsDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, head) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", head)?;
        }
        Ok(())
    }
}
