//! Outbound side of an exchange: generating frames from the sync state.

use std::future::Future;
use std::io;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::broadcast::Subscription;
use super::frame::MessageFrame;
use super::session::{HeadsDisplay, SyncSession};
use crate::error::SyncError;

/// Destination for encoded frames.
pub trait FrameSink: Send {
    /// Writes one frame and flushes it to the consumer.
    fn send(&mut self, frame: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Signals that no more frames will follow.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Resolves once the consumer has gone away.
    fn disconnected(&self) -> impl Future<Output = ()> + Send {
        std::future::pending()
    }

    /// Returns true if the consumer has gone away.
    fn is_disconnected(&self) -> bool {
        false
    }
}

/// Adapts any [`AsyncWrite`] into a [`FrameSink`].
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
}

impl<W> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> FrameSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: Bytes) -> io::Result<()> {
        self.writer.write_all(&frame).await?;
        self.writer.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// How long the outbound loop keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateMode {
    /// Send everything that can be sent right now, then close the sink.
    Once,
    /// Keep waiting for new changes until cancelled.
    Continuous,
}

#[derive(Default)]
struct SendStats {
    messages: usize,
    bytes: usize,
}

/// Writes sync messages from `session` into `sink`.
///
/// Each round generates messages until the sync state has nothing left to
/// say, so a single notification covers any number of new changes. In
/// continuous mode the loop then waits for the next notification on
/// `subscription`, and ends with [`SyncError::Cancelled`] when `cancel`
/// fires or the sink consumer disconnects. A closed subscription ends the
/// loop normally. Write failures end it with [`SyncError::Write`].
pub async fn generate_messages<S: FrameSink>(
    session: &SyncSession,
    subscription: &Subscription,
    sink: &mut S,
    cancel: &CancellationToken,
    mode: GenerateMode,
) -> Result<(), SyncError> {
    let mut stats = SendStats::default();
    let result = generate_into(session, subscription, sink, cancel, mode, &mut stats).await;
    tracing::info!(
        sent_messages = stats.messages,
        sent_bytes = stats.bytes,
        "finished writing sync messages"
    );
    result
}

async fn generate_into<S: FrameSink>(
    session: &SyncSession,
    subscription: &Subscription,
    sink: &mut S,
    cancel: &CancellationToken,
    mode: GenerateMode,
    stats: &mut SendStats,
) -> Result<(), SyncError> {
    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        while let Some(message) = session.generate_message() {
            let heads = message.heads.clone();
            let frame = MessageFrame::sync(message.encode()).encode();
            let bytes = frame.len();

            // A consumer that stopped reading must not pin us here forever.
            tokio::select! {
                biased;
                result = sink.send(frame) => result.map_err(SyncError::Write)?,
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            }

            stats.messages += 1;
            stats.bytes += bytes;
            tracing::debug!(bytes, heads = %HeadsDisplay(&heads), "wrote message");
        }

        if mode == GenerateMode::Once {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = sink.disconnected() => {
                tracing::debug!("frame consumer disconnected");
                return Err(SyncError::Cancelled);
            }
            pulse = subscription.changed() => {
                if !pulse {
                    tracing::debug!("change subscription closed");
                    break;
                }
            }
        }
    }

    sink.close().await.map_err(SyncError::Close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::policy::{accept_all, never};
    use crate::sync::read::consume_messages;
    use crate::sync::shared_doc::SharedDoc;
    use automerge::transaction::Transactable;
    use automerge::{AutoCommit, ROOT};
    use std::sync::Arc;
    use std::time::Duration;

    struct FailingSink;

    impl FrameSink for FailingSink {
        async fn send(&mut self, _frame: Bytes) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        async fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn lines(output: &[u8]) -> Vec<&[u8]> {
        output
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .collect()
    }

    #[tokio::test]
    async fn test_once_writes_first_message_and_closes() {
        let shared = SharedDoc::default();
        let session = SyncSession::new(shared.clone());
        let sub = shared.subscribe();
        let mut sink = WriterSink::new(Vec::new());

        generate_messages(
            &session,
            &sub,
            &mut sink,
            &CancellationToken::new(),
            GenerateMode::Once,
        )
        .await
        .unwrap();

        let output = sink.into_inner();
        assert_eq!(lines(&output).len(), 1);
        assert!(output.starts_with(b"{\"event\":\"sync\",\"data\":\""));
        assert!(output.ends_with(b"\"}\n"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let shared = SharedDoc::default();
        let session = SyncSession::new(shared.clone());
        let sub = shared.subscribe();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sink = WriterSink::new(Vec::new());

        let err = generate_messages(&session, &sub, &mut sink, &cancel, GenerateMode::Continuous)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(sink.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_not_cancellation() {
        let shared = SharedDoc::default();
        let session = SyncSession::new(shared.clone());
        let sub = shared.subscribe();

        let err = generate_messages(
            &session,
            &sub,
            &mut FailingSink,
            &CancellationToken::new(),
            GenerateMode::Continuous,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::Write(_)));
    }

    #[tokio::test]
    async fn test_closed_subscription_ends_loop() {
        let shared = SharedDoc::default();
        let session = SyncSession::new(shared.clone());
        let sub = shared.subscribe();
        sub.unsubscribe();
        let mut sink = WriterSink::new(Vec::new());

        generate_messages(
            &session,
            &sub,
            &mut sink,
            &CancellationToken::new(),
            GenerateMode::Continuous,
        )
        .await
        .unwrap();

        assert_eq!(lines(&sink.into_inner()).len(), 1);
    }

    #[tokio::test]
    async fn test_continuous_sends_each_new_change() {
        for has_peer in [true, false] {
            let local = SharedDoc::default();
            let session = SyncSession::new(local.clone());
            let peer = SyncSession::new(SharedDoc::default());
            if has_peer {
                let hello = peer.generate_message().unwrap();
                session.receive_message(1, hello, 0, &accept_all).unwrap();
            }

            let sub = Arc::new(local.subscribe());
            let (writer, reader) = tokio::io::duplex(64 * 1024);

            let producer = {
                let session = session.clone();
                let sub = sub.clone();
                tokio::spawn(async move {
                    let mut sink = WriterSink::new(writer);
                    generate_messages(
                        &session,
                        &sub,
                        &mut sink,
                        &CancellationToken::new(),
                        GenerateMode::Continuous,
                    )
                    .await
                })
            };

            let editor = local.clone();
            tokio::spawn(async move {
                for i in 0..10 {
                    editor.update(|doc| doc.put(ROOT, i.to_string(), "hello").unwrap());
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                // The last pulse stays buffered, so everything is drained
                // before the loop sees the closed subscription.
                sub.unsubscribe();
            });

            let received = tokio::time::timeout(
                Duration::from_secs(10),
                consume_messages(&peer, tokio::io::BufReader::new(reader), &accept_all, &never),
            )
            .await
            .expect("timed out reading messages")
            .unwrap();
            assert!(received >= 1);

            producer.await.unwrap().unwrap();

            if has_peer {
                assert_eq!(peer.doc().heads(), local.heads());
            } else {
                assert!(peer.doc().heads().is_empty());
            }
        }
    }

    #[tokio::test]
    async fn test_once_after_peer_hello_sends_changes() {
        let mut doc = AutoCommit::new();
        doc.put(ROOT, "a", "b").unwrap();
        let local = SharedDoc::new(doc);
        let session = SyncSession::new(local.clone());
        let peer = SyncSession::new(SharedDoc::default());
        let hello = peer.generate_message().unwrap();
        session.receive_message(1, hello, 0, &accept_all).unwrap();

        let sub = local.subscribe();
        let mut sink = WriterSink::new(Vec::new());
        generate_messages(
            &session,
            &sub,
            &mut sink,
            &CancellationToken::new(),
            GenerateMode::Once,
        )
        .await
        .unwrap();

        let output = sink.into_inner();
        consume_messages(&peer, &output[..], &accept_all, &never)
            .await
            .unwrap();
        assert_eq!(peer.doc().heads(), local.heads());
    }
}
