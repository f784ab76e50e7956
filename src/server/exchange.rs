//! Running both legs of a server side exchange.

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::sync::{
    consume_messages, generate_messages, never, FrameSink, GenerateMode, ReadPredicate,
    Subscription, SyncSession,
};

/// Serves one exchange: applies messages read from `body` while streaming
/// messages into `sink` until the client goes away or `cancel` fires.
///
/// The request body ending without a single sync message fails the exchange
/// with [`SyncError::EmptyExchange`], since the outbound side cannot make
/// progress without hearing from the client. A client that disconnects is
/// not an error, and neither is cancellation through `cancel`. Failing to
/// read the request body counts as a disconnect, since that is how a client
/// going away usually shows up on the inbound side.
pub async fn serve_exchange<R, S>(
    session: &SyncSession,
    subscription: &Subscription,
    body: R,
    sink: &mut S,
    predicate: &dyn ReadPredicate,
    cancel: &CancellationToken,
) -> Result<(), SyncError>
where
    R: AsyncRead + Unpin,
    S: FrameSink,
{
    let scope = cancel.child_token();

    let outbound = async {
        let result =
            generate_messages(session, subscription, &mut *sink, &scope, GenerateMode::Continuous)
                .await;
        if result.is_err() {
            scope.cancel();
        }
        result
    };

    let inbound = async {
        tracing::debug!("reading messages from request body");
        let result = tokio::select! {
            biased;
            result = consume_messages(session, body, predicate, &never) => result,
            _ = scope.cancelled() => Err(SyncError::Cancelled),
        };
        match result {
            Ok(0) => {
                scope.cancel();
                Some(SyncError::EmptyExchange)
            }
            Ok(_) | Err(SyncError::Cancelled) => None,
            Err(SyncError::Scan { index, source }) => {
                tracing::debug!(index, error = %source, "request body ended abruptly");
                scope.cancel();
                None
            }
            Err(err) => {
                scope.cancel();
                Some(err)
            }
        }
    };

    // Outbound is polled first so the opening message goes out before we
    // block on the request body.
    let (outbound_result, inbound_error) = tokio::join!(outbound, inbound);

    if cancel.is_cancelled() || sink.is_disconnected() {
        tracing::debug!("client disconnected");
        return Ok(());
    }

    match (inbound_error, outbound_result) {
        (None, Ok(())) | (None, Err(SyncError::Cancelled)) => Ok(()),
        (Some(err), Ok(())) | (Some(err), Err(SyncError::Cancelled)) => Err(err),
        (None, Err(err)) => Err(err),
        (Some(inbound), Err(outbound)) => Err(SyncError::join(outbound, inbound)),
    }
}
