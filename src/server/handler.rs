//! Answering a sync request with a streaming response.

use std::io;
use std::sync::Arc;

use automerge::sync;
use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::exchange::serve_exchange;
use crate::error::SyncError;
use crate::sync::{
    accept_all, frame_pipe, is_suitable_content_type, ReadPredicate, SharedDoc, SyncSession,
    CONTENT_TYPE_WITH_CHARSET,
};

type HeaderEditor = Box<dyn Fn(&mut HeaderMap) + Send + Sync>;

/// Options for [`SharedDoc::serve_changes`].
pub struct ServerOptions {
    sync_state: Option<sync::State>,
    read_predicate: Arc<dyn ReadPredicate>,
    header_editors: Vec<HeaderEditor>,
    shutdown: CancellationToken,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            sync_state: None,
            read_predicate: Arc::new(accept_all),
            header_editors: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes from a previously persisted sync state for this client.
    pub fn with_sync_state(mut self, state: sync::State) -> Self {
        self.sync_state = Some(state);
        self
    }

    pub fn with_read_predicate(mut self, predicate: impl ReadPredicate + 'static) -> Self {
        self.read_predicate = Arc::new(predicate);
        self
    }

    /// Adds an editor that runs on the response headers before they are sent.
    pub fn with_header_editor(
        mut self,
        editor: impl Fn(&mut HeaderMap) + Send + Sync + 'static,
    ) -> Self {
        self.header_editors.push(Box::new(editor));
        self
    }

    /// Ends the exchange without error once `token` is cancelled, e.g. on
    /// server shutdown.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }
}

/// Handle to the exchange behind a streaming response.
#[derive(Debug)]
pub struct ExchangeHandle(Option<JoinHandle<Result<(), SyncError>>>);

impl ExchangeHandle {
    fn finished() -> Self {
        Self(None)
    }

    /// Waits for the exchange to end. Failures after the response status
    /// was sent can only be reported here.
    pub async fn wait(self) -> Result<(), SyncError> {
        let Some(handle) = self.0 else {
            return Ok(());
        };
        match handle.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(SyncError::Cancelled),
        }
    }
}

fn header_is_suitable(headers: &HeaderMap, name: header::HeaderName) -> bool {
    match headers.get(name) {
        Some(value) => {
            let value = String::from_utf8_lossy(value.as_bytes());
            value.is_empty() || is_suitable_content_type(&value)
        }
        None => true,
    }
}

impl SharedDoc {
    /// Answers a sync request.
    ///
    /// Requests with an unsuitable `Accept` or `Content-Type` get an empty
    /// 406 or 415 response. Anything else gets a 200 response whose body
    /// streams our messages while a spawned task applies the messages from
    /// the request body. Must be called within a Tokio runtime.
    pub fn serve_changes(&self, request: Request, options: ServerOptions) -> (Response, ExchangeHandle) {
        if !header_is_suitable(request.headers(), header::ACCEPT) {
            return (StatusCode::NOT_ACCEPTABLE.into_response(), ExchangeHandle::finished());
        }
        if !header_is_suitable(request.headers(), header::CONTENT_TYPE) {
            return (
                StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response(),
                ExchangeHandle::finished(),
            );
        }

        let ServerOptions {
            sync_state,
            read_predicate,
            header_editors,
            shutdown,
        } = options;
        let session = match sync_state {
            Some(state) => SyncSession::with_state(self.clone(), state),
            None => SyncSession::new(self.clone()),
        };

        let target = format!("{} {}", request.method(), request.uri());
        tracing::info!(
            proto = ?request.version(),
            target = %target,
            status = StatusCode::OK.as_u16(),
            "sending http sync response"
        );

        let (mut sink, stream) = frame_pipe();
        let mut response = Response::new(Body::from_stream(stream));
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(CONTENT_TYPE_WITH_CHARSET),
        );
        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        for editor in &header_editors {
            editor(headers);
        }

        let subscription = self.subscribe();
        let body = StreamReader::new(
            request
                .into_body()
                .into_data_stream()
                .map_err(io::Error::other),
        );
        let span = tracing::info_span!("http_sync_exchange", target = %target);
        let handle = tokio::spawn(
            async move {
                serve_exchange(
                    &session,
                    &subscription,
                    body,
                    &mut sink,
                    read_predicate.as_ref(),
                    &shutdown,
                )
                .await
            }
            .instrument(span),
        );

        (response, ExchangeHandle(Some(handle)))
    }
}
