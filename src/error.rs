//! Error types for sync exchanges.

use std::io;

use thiserror::Error;

/// Boxed error returned by caller-supplied policies and transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while exchanging sync messages.
///
/// Message indexes are 1-based and refer to the message being read when the
/// failure happened.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("failed to unmarshal message {index}: {source}")]
    FrameDecode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to load message {index}: {reason}")]
    PayloadDecode { index: usize, reason: String },

    #[error("failed to run read predicate on message {index}: {source}")]
    Predicate {
        index: usize,
        #[source]
        source: BoxError,
    },

    #[error("failed to receive message {index}: {source}")]
    Engine {
        index: usize,
        #[source]
        source: automerge::AutomergeError,
    },

    #[error("failed while scanning message {index}: {source}")]
    Scan {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("failed to write message: {0}")]
    Write(#[source] io::Error),

    #[error("failed to close writer: {0}")]
    Close(#[source] io::Error),

    #[error("request closed with no messages received")]
    EmptyExchange,

    #[error("sync cancelled")]
    Cancelled,

    #[error("failed to setup request: invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("http request failed: {0}")]
    Http(#[source] BoxError),

    #[error("http request failed with status {0}")]
    Status(u16),

    #[error("http request returned a response with an unsuitable content type {0}")]
    UnsuitableContentType(String),

    #[error("{0}\n{1}")]
    Joined(Box<SyncError>, Box<SyncError>),
}

impl SyncError {
    /// Returns true if this error only records an observed cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// Combines two errors, keeping both messages.
    pub fn join(first: SyncError, second: SyncError) -> SyncError {
        SyncError::Joined(Box::new(first), Box::new(second))
    }
}
