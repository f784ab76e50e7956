//! Pluggable policies for inbound message handling.
//!
//! A [`ReadPredicate`] decides whether a decoded message is applied at all. A
//! [`TerminationCheck`] runs after each accepted message and decides whether
//! the reader has synchronized enough to stop.

use std::collections::HashSet;

use automerge::sync::Message;
use automerge::{AutoCommit, ChangeHash};

use super::session::SyncMessageInfo;
use crate::error::BoxError;

/// Filters messages before they reach the sync state.
///
/// `Ok(true)` applies the message, `Ok(false)` skips it and an error aborts
/// the exchange.
pub trait ReadPredicate: Send + Sync {
    fn accept(&self, doc: &AutoCommit, message: &Message) -> Result<bool, BoxError>;
}

impl<F> ReadPredicate for F
where
    F: Fn(&AutoCommit, &Message) -> Result<bool, BoxError> + Send + Sync,
{
    fn accept(&self, doc: &AutoCommit, message: &Message) -> Result<bool, BoxError> {
        self(doc, message)
    }
}

/// Stops a reader once the local and remote documents are suitably in sync.
pub trait TerminationCheck: Send + Sync {
    fn is_done(&self, doc: &mut AutoCommit, message: &SyncMessageInfo) -> bool;
}

impl<F> TerminationCheck for F
where
    F: Fn(&mut AutoCommit, &SyncMessageInfo) -> bool + Send + Sync,
{
    fn is_done(&self, doc: &mut AutoCommit, message: &SyncMessageInfo) -> bool {
        self(doc, message)
    }
}

/// Includes every message.
pub fn accept_all(_doc: &AutoCommit, _message: &Message) -> Result<bool, BoxError> {
    Ok(true)
}

/// Skips any message carrying changes, which makes the local document read
/// only: it still hands out its own changes but never takes the peer's.
pub fn skip_changes(_doc: &AutoCommit, message: &Message) -> Result<bool, BoxError> {
    Ok(message.changes.is_empty())
}

/// Never stops; the reader runs until the stream ends.
pub fn never(_doc: &mut AutoCommit, _message: &SyncMessageInfo) -> bool {
    false
}

/// Stops once the local heads and the heads in the message are identical.
pub fn heads_equal(doc: &mut AutoCommit, message: &SyncMessageInfo) -> bool {
    let (missing_local, missing_remote) = compare_heads(&doc.get_heads(), &message.heads);
    missing_local == 0 && missing_remote == 0
}

/// Stops once the local document contains every remote head. The remote may
/// still be missing local changes.
pub fn has_all_remote_heads(doc: &mut AutoCommit, message: &SyncMessageInfo) -> bool {
    let (missing_local, _) = compare_heads(&doc.get_heads(), &message.heads);
    missing_local == 0
}

/// Compares two head sets.
///
/// Returns `(missing_in_a, missing_in_b)`: how many hashes of `b` are absent
/// from `a`, and how many hashes of `a` are absent from `b`.
pub fn compare_heads(a: &[ChangeHash], b: &[ChangeHash]) -> (usize, usize) {
    let mut unseen: HashSet<&ChangeHash> = a.iter().collect();
    let mut missing_in_a = 0;
    for hash in b {
        if !unseen.remove(hash) {
            missing_in_a += 1;
        }
    }
    (missing_in_a, unseen.len())
}
