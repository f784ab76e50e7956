//! Full duplex Automerge sync over a single HTTP request.
//!
//! Both peers stream newline delimited JSON frames, each carrying one
//! base64 encoded Automerge sync message. The client sends its messages in
//! the request body of a `PUT` while the server answers in the response
//! body, and both keep going for as long as either side has something to
//! say.
//!
//! - [`sync`]: frames, the change broadcaster and the read and write loops
//! - [`client`]: [`SharedDoc::http_push_pull_changes`]
//! - [`server`]: [`SharedDoc::serve_changes`] for axum handlers
//! - [`config`]: configuration for the bundled server binary

pub mod client;
pub mod config;
pub mod error;
pub mod server;
pub mod sync;

pub use client::{ClientOptions, HttpDoer, HttpDoerFn, SyncRequest, SyncResponse};
pub use error::{BoxError, SyncError};
pub use server::{ExchangeHandle, ServerOptions};
pub use sync::{SharedDoc, SyncSession};
