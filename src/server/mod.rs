//! HTTP server side of a sync exchange.

pub mod app;
pub mod exchange;
pub mod handler;

pub use app::{router, DocRegistry};
pub use exchange::serve_exchange;
pub use handler::{ExchangeHandle, ServerOptions};
