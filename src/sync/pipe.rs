//! An in-memory frame pipe used as a streaming HTTP body.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

use super::write::FrameSink;

/// Creates a connected sink and stream.
///
/// The pipe holds at most one frame, so every send waits until the previous
/// frame has been taken by the consumer. Dropping the stream makes every
/// later send fail with [`io::ErrorKind::BrokenPipe`].
pub fn frame_pipe() -> (PipeSink, PipeStream) {
    let (sender, receiver) = mpsc::channel(1);
    (
        PipeSink {
            sender: Some(sender),
        },
        PipeStream { receiver },
    )
}

/// Writing half of a [`frame_pipe`].
#[derive(Debug)]
pub struct PipeSink {
    sender: Option<mpsc::Sender<io::Result<Bytes>>>,
}

impl PipeSink {
    /// Hands `error` to the consumer and closes the pipe.
    pub async fn fail(&mut self, error: io::Error) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Err(error)).await;
        }
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "frame pipe closed")
}

impl FrameSink for PipeSink {
    async fn send(&mut self, frame: Bytes) -> io::Result<()> {
        let sender = self.sender.as_ref().ok_or_else(broken_pipe)?;
        sender.send(Ok(frame)).await.map_err(|_| broken_pipe())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.sender = None;
        Ok(())
    }

    async fn disconnected(&self) {
        if let Some(sender) = &self.sender {
            sender.closed().await;
        }
    }

    fn is_disconnected(&self) -> bool {
        self.sender.as_ref().map_or(true, |sender| sender.is_closed())
    }
}

/// Reading half of a [`frame_pipe`].
#[derive(Debug)]
pub struct PipeStream {
    receiver: mpsc::Receiver<io::Result<Bytes>>,
}

impl PipeStream {
    /// Stops accepting frames. Frames already in the pipe can still be read.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

impl Stream for PipeStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
