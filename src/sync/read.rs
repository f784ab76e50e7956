//! Inbound side of an exchange: reading frames into the sync state.

use std::io;

use automerge::sync;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use super::frame::MessageFrame;
use super::policy::{ReadPredicate, TerminationCheck};
use super::session::{HeadsDisplay, SyncSession};
use crate::error::SyncError;

/// Longest line accepted from a peer, not counting the line ending.
pub const MAX_LINE_LENGTH: usize = 64 * 1024 * 1024;

#[derive(Default)]
struct ReceiveStats {
    messages: usize,
    changes: usize,
    bytes: usize,
}

/// Reads frames from `reader` and applies every accepted sync message.
///
/// Frames with an unknown event are ignored. After each applied message all
/// subscribers of the document are notified and `check` decides whether to
/// stop; when it does, no further frames are decoded. Returns the number of
/// applied messages. Reaching the end of the stream without any applied
/// message is not an error here. A line longer than [`MAX_LINE_LENGTH`]
/// fails with [`SyncError::Scan`].
pub async fn consume_messages<R>(
    session: &SyncSession,
    reader: R,
    predicate: &dyn ReadPredicate,
    check: &dyn TerminationCheck,
) -> Result<usize, SyncError>
where
    R: AsyncRead + Unpin,
{
    consume_with_limit(session, reader, predicate, check, MAX_LINE_LENGTH).await
}

async fn consume_with_limit<R>(
    session: &SyncSession,
    reader: R,
    predicate: &dyn ReadPredicate,
    check: &dyn TerminationCheck,
    max_line_length: usize,
) -> Result<usize, SyncError>
where
    R: AsyncRead + Unpin,
{
    let lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_length));
    let mut stats = ReceiveStats::default();
    let result = consume_into(session, lines, predicate, check, &mut stats).await;
    tracing::info!(
        received_messages = stats.messages,
        received_changes = stats.changes,
        received_bytes = stats.bytes,
        "finished receiving sync messages"
    );
    result.map(|()| stats.messages)
}

async fn consume_into<R>(
    session: &SyncSession,
    mut lines: FramedRead<R, LinesCodec>,
    predicate: &dyn ReadPredicate,
    check: &dyn TerminationCheck,
    stats: &mut ReceiveStats,
) -> Result<(), SyncError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let index = stats.messages + 1;
        let line = match lines.next().await {
            None => return Ok(()),
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                return Err(SyncError::Scan {
                    index,
                    source: scan_error(err),
                })
            }
        };
        let read = line.len();

        let frame = MessageFrame::decode(line.as_bytes())
            .map_err(|source| SyncError::FrameDecode { index, source })?;
        if !frame.is_sync() {
            tracing::debug!(event = %frame.event, "ignoring frame");
            continue;
        }

        let message = sync::Message::decode(&frame.data).map_err(|e| {
            SyncError::PayloadDecode {
                index,
                reason: e.to_string(),
            }
        })?;

        let Some(info) = session.receive_message(index, message, read, predicate)? else {
            tracing::debug!(bytes = read, "skipping message");
            continue;
        };

        tracing::debug!(
            changes = info.changes,
            bytes = info.bytes,
            heads = %HeadsDisplay(&info.heads),
            "received message"
        );
        stats.messages += 1;
        stats.changes += info.changes;
        stats.bytes += info.bytes;
        session.doc().notify_received_changes();

        if session.doc().with_doc(|doc| check.is_done(doc, &info)) {
            tracing::info!("termination check met");
            return Ok(());
        }
    }
}

fn scan_error(err: LinesCodecError) -> io::Error {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "line too long")
        }
        LinesCodecError::Io(err) => err,
    }
}
