//! A readable stream of frames backed by a lazily started producer.

use std::io;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::broadcast::Subscription;
use super::pipe::{frame_pipe, PipeStream};
use super::session::SyncSession;
use super::write::{generate_messages, GenerateMode};
use crate::error::SyncError;

/// Builds a fresh [`MessageSource`] for a request that has to be replayed.
pub type BodyFactory = Arc<dyn Fn() -> MessageSource + Send + Sync>;

struct Producer {
    session: SyncSession,
    subscription: Arc<Subscription>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

enum SourceState {
    Idle(Producer),
    Running(PipeStream),
    /// Closed before the first read.
    Closed,
    Done,
}

/// Request body that streams sync messages as they are generated.
///
/// Nothing happens until the first poll, which starts a producer task on the
/// given [`TaskTracker`]. The producer writes sync messages continuously and
/// sends a new round whenever the subscription fires. It stops once `cancel`
/// fires, and the stream then ends without an error. Any other producer
/// failure is yielded as the last item.
pub struct MessageSource {
    state: SourceState,
}

impl MessageSource {
    pub fn new(
        session: SyncSession,
        subscription: Arc<Subscription>,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            state: SourceState::Idle(Producer {
                session,
                subscription,
                cancel,
                tracker,
            }),
        }
    }

    /// Closes the reading end. A running producer fails its next write.
    pub fn close(&mut self) {
        match mem::replace(&mut self.state, SourceState::Done) {
            SourceState::Idle(_) => self.state = SourceState::Closed,
            SourceState::Running(mut stream) => stream.close(),
            SourceState::Closed | SourceState::Done => {}
        }
    }
}

fn start(producer: Producer) -> PipeStream {
    let Producer {
        session,
        subscription,
        cancel,
        tracker,
    } = producer;
    let (mut sink, stream) = frame_pipe();

    let task = async move {
        let result = generate_messages(
            &session,
            &subscription,
            &mut sink,
            &cancel,
            GenerateMode::Continuous,
        )
        .await;

        match result {
            Ok(()) | Err(SyncError::Cancelled) => {}
            Err(err) => {
                tracing::debug!(error = %err, "message source producer failed");
                tokio::select! {
                    _ = sink.fail(io::Error::other(err)) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }
    };
    tracker.spawn(task.instrument(tracing::Span::current()));

    stream
}

impl Stream for MessageSource {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                SourceState::Idle(_) => {
                    if let SourceState::Idle(producer) =
                        mem::replace(&mut this.state, SourceState::Done)
                    {
                        this.state = SourceState::Running(start(producer));
                    }
                }
                SourceState::Running(stream) => {
                    let item = futures::ready!(Pin::new(stream).poll_next(cx));
                    if item.is_none() {
                        this.state = SourceState::Done;
                    }
                    return Poll::Ready(item);
                }
                SourceState::Closed => {
                    this.state = SourceState::Done;
                    return Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "read on closed message source",
                    ))));
                }
                SourceState::Done => return Poll::Ready(None),
            }
        }
    }
}

impl std::fmt::Debug for MessageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            SourceState::Idle(_) => "idle",
            SourceState::Running(_) => "running",
            SourceState::Closed => "closed",
            SourceState::Done => "done",
        };
        f.debug_struct("MessageSource").field("state", &state).finish()
    }
}
