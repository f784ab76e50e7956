//! Streaming Automerge sync over a pair of byte streams.
//!
//! An exchange runs two loops against one [`SyncSession`]: the outbound loop
//! ([`generate_messages`]) writes newline delimited [`MessageFrame`]s while
//! the inbound loop ([`consume_messages`]) reads the peer's frames and feeds
//! them into the same sync state. Every applied message wakes the other
//! exchanges on the same [`SharedDoc`] through its [`ChangeBroadcaster`].
//!
//! # Usage
//!
//! ```
//! use ndjson_sync::sync::{SharedDoc, SyncSession};
//!
//! let doc = SharedDoc::default();
//! let session = SyncSession::new(doc.clone());
//!
//! // The first message always advertises our heads.
//! assert!(session.generate_message().is_some());
//! ```

pub mod broadcast;
pub mod frame;
pub mod pipe;
pub mod policy;
pub mod read;
pub mod session;
pub mod shared_doc;
pub mod source;
pub mod write;

pub use broadcast::{ChangeBroadcaster, Subscription};
pub use frame::{is_suitable_content_type, MessageFrame, CONTENT_TYPE, CONTENT_TYPE_WITH_CHARSET, EVENT_SYNC};
pub use pipe::{frame_pipe, PipeSink, PipeStream};
pub use policy::{
    accept_all, compare_heads, has_all_remote_heads, heads_equal, never, skip_changes,
    ReadPredicate, TerminationCheck,
};
pub use read::{consume_messages, MAX_LINE_LENGTH};
pub use session::{HeadsDisplay, SyncMessageInfo, SyncSession};
pub use shared_doc::SharedDoc;
pub use source::{BodyFactory, MessageSource};
pub use write::{generate_messages, FrameSink, GenerateMode, WriterSink};
