//! HTTP client side of a sync exchange.
//!
//! A single `PUT` request carries our messages in its streaming body while
//! the response body streams the server's messages back, so one request
//! pushes and pulls changes at the same time.

pub mod doer;

use std::sync::Arc;

use automerge::sync;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

pub use doer::{HttpDoer, HttpDoerFn, SyncRequest, SyncResponse};

use crate::error::SyncError;
use crate::sync::{
    accept_all, consume_messages, is_suitable_content_type, never, BodyFactory, MessageSource,
    ReadPredicate, SharedDoc, SyncSession, TerminationCheck, CONTENT_TYPE,
    CONTENT_TYPE_WITH_CHARSET,
};

type HeaderEditor = Box<dyn Fn(&mut HeaderMap) + Send + Sync>;

/// Options for [`SharedDoc::http_push_pull_changes`].
pub struct ClientOptions {
    http_client: Arc<dyn HttpDoer>,
    session: Option<SyncSession>,
    sync_state: Option<sync::State>,
    read_predicate: Arc<dyn ReadPredicate>,
    termination_check: Arc<dyn TerminationCheck>,
    request_editors: Vec<HeaderEditor>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            http_client: Arc::new(reqwest::Client::new()),
            session: None,
            sync_state: None,
            read_predicate: Arc::new(accept_all),
            termination_check: Arc::new(never),
            request_editors: Vec::new(),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http_client(mut self, client: impl HttpDoer + 'static) -> Self {
        self.http_client = Arc::new(client);
        self
    }

    /// Resumes from a previously persisted sync state.
    pub fn with_sync_state(mut self, state: sync::State) -> Self {
        self.sync_state = Some(state);
        self
    }

    /// Uses an existing session, so its sync state carries over to the next
    /// call. The session must be bound to the document being synced.
    pub fn with_session(mut self, session: SyncSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_read_predicate(mut self, predicate: impl ReadPredicate + 'static) -> Self {
        self.read_predicate = Arc::new(predicate);
        self
    }

    pub fn with_termination_check(mut self, check: impl TerminationCheck + 'static) -> Self {
        self.termination_check = Arc::new(check);
        self
    }

    /// Adds an editor that runs on the request headers before sending.
    pub fn with_request_editor(
        mut self,
        editor: impl Fn(&mut HeaderMap) + Send + Sync + 'static,
    ) -> Self {
        self.request_editors.push(Box::new(editor));
        self
    }
}

fn request_headers(editors: &[HeaderEditor]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE_WITH_CHARSET),
    );
    headers.insert(header::ACCEPT, HeaderValue::from_static(CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    // The server may reject the request before we start streaming.
    headers.insert(header::EXPECT, HeaderValue::from_static("100-continue"));
    for editor in editors {
        editor(&mut headers);
    }
    headers
}

impl SharedDoc {
    /// Synchronizes this document with the server at `url`.
    ///
    /// Local messages are streamed in the request body while the server's
    /// messages are applied from the response body. The call returns once
    /// the response ends, the termination check is met or `cancel` fires.
    /// Cancellation is not an error. No background task outlives the call.
    pub async fn http_push_pull_changes(
        &self,
        url: &str,
        options: ClientOptions,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let parsed = Url::parse(url).map_err(|e| SyncError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let ClientOptions {
            http_client,
            session,
            sync_state,
            read_predicate,
            termination_check,
            request_editors,
        } = options;
        let session = match (session, sync_state) {
            (Some(session), _) => session,
            (None, Some(state)) => SyncSession::with_state(self.clone(), state),
            (None, None) => SyncSession::new(self.clone()),
        };

        let subscription = Arc::new(session.doc().subscribe());
        let scope = cancel.child_token();
        let tracker = TaskTracker::new();

        let body_factory: BodyFactory = {
            let session = session.clone();
            let subscription = subscription.clone();
            let scope = scope.clone();
            let tracker = tracker.clone();
            Arc::new(move || {
                MessageSource::new(
                    session.clone(),
                    subscription.clone(),
                    scope.clone(),
                    tracker.clone(),
                )
            })
        };
        let request = SyncRequest::new(
            Method::PUT,
            parsed,
            request_headers(&request_editors),
            body_factory,
        );

        let span = tracing::info_span!("http_sync", target = %format!("PUT {url}"));
        let result = push_pull(
            http_client.as_ref(),
            request,
            &session,
            read_predicate.as_ref(),
            termination_check.as_ref(),
            &scope,
        )
        .instrument(span)
        .await;

        scope.cancel();
        tracker.close();
        tracker.wait().await;
        subscription.unsubscribe();

        match result {
            Err(SyncError::Cancelled) if cancel.is_cancelled() => Ok(()),
            other => other,
        }
    }
}

async fn push_pull(
    client: &dyn HttpDoer,
    request: SyncRequest,
    session: &SyncSession,
    predicate: &dyn ReadPredicate,
    check: &dyn TerminationCheck,
    scope: &CancellationToken,
) -> Result<(), SyncError> {
    let target = format!("{} {}", request.method, request.url);
    let response = tokio::select! {
        response = client.execute(request) => response.map_err(SyncError::Http)?,
        _ = scope.cancelled() => return Err(SyncError::Cancelled),
    };
    tracing::info!(
        proto = ?response.version,
        target = %target,
        status = response.status.as_u16(),
        "received http sync response"
    );
    if response.status != StatusCode::OK {
        return Err(SyncError::Status(response.status.as_u16()));
    }

    if let Some(value) = response.headers.get(header::CONTENT_TYPE) {
        let value = String::from_utf8_lossy(value.as_bytes());
        if !value.is_empty() && !is_suitable_content_type(&value) {
            return Err(SyncError::UnsuitableContentType(value.into_owned()));
        }
    }

    let reader = StreamReader::new(response.body);
    tokio::select! {
        result = consume_messages(session, reader, predicate, check) => result.map(|_| ()),
        _ = scope.cancelled() => Err(SyncError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::server::serve_exchange;
    use crate::sync::{frame_pipe, heads_equal, SyncMessageInfo};
    use automerge::transaction::Transactable;
    use automerge::{AutoCommit, ReadDoc, ROOT};
    use futures::StreamExt;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncBufReadExt;

    fn doc_with(key: &str) -> SharedDoc {
        let mut doc = AutoCommit::new();
        doc.put(ROOT, key, "value").unwrap();
        SharedDoc::new(doc)
    }

    #[tokio::test]
    async fn test_non_200_response() {
        let doer = HttpDoerFn(|_request: SyncRequest| async {
            Ok::<_, BoxError>(SyncResponse::empty(StatusCode::BAD_REQUEST))
        });
        let err = SharedDoc::default()
            .http_push_pull_changes(
                "https://localhost",
                ClientOptions::new().with_http_client(doer),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Status(400)));
        assert_eq!(err.to_string(), "http request failed with status 400");
    }

    #[tokio::test]
    async fn test_transport_error() {
        let doer = HttpDoerFn(|_request: SyncRequest| async {
            Err::<SyncResponse, BoxError>(
                "thing \"https://localhost\": use of closed network connection".into(),
            )
        });
        let err = SharedDoc::default()
            .http_push_pull_changes(
                "https://localhost",
                ClientOptions::new().with_http_client(doer),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "http request failed: thing \"https://localhost\": use of closed network connection"
        );
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let err = SharedDoc::default()
            .http_push_pull_changes("not a url", ClientOptions::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_read_until_server_close() {
        let seen = Arc::new(Mutex::new(None));
        let doer = {
            let seen = seen.clone();
            HttpDoerFn(move |request: SyncRequest| {
                let seen = seen.clone();
                async move {
                    let SyncRequest {
                        method,
                        url,
                        headers,
                        body,
                        ..
                    } = request;
                    // At least the first message line arrives in the body.
                    let mut lines = StreamReader::new(body).lines();
                    let first = lines.next_line().await?;
                    *seen.lock().unwrap() = Some((method, url.to_string(), headers, first));
                    Ok::<_, BoxError>(SyncResponse::empty(StatusCode::OK))
                }
            })
        };

        SharedDoc::default()
            .http_push_pull_changes(
                "https://localhost",
                ClientOptions::new()
                    .with_http_client(doer)
                    .with_request_editor(|headers| {
                        headers.insert("x-sync-peer", HeaderValue::from_static("test"));
                    }),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let (method, url, headers, first) = seen.lock().unwrap().take().unwrap();
        assert_eq!(method, Method::PUT);
        assert_eq!(url, "https://localhost/");
        assert_eq!(headers[header::CONTENT_TYPE], CONTENT_TYPE_WITH_CHARSET);
        assert_eq!(headers[header::ACCEPT], CONTENT_TYPE);
        assert_eq!(headers[header::CACHE_CONTROL], "no-store");
        assert_eq!(headers[header::EXPECT], "100-continue");
        assert_eq!(headers["x-sync-peer"], "test");
        assert!(first.unwrap().starts_with("{\"event\":\"sync\""));
    }

    #[tokio::test]
    async fn test_unsuitable_response_content_type() {
        let doer = HttpDoerFn(|_request: SyncRequest| async {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
            Ok::<_, BoxError>(SyncResponse::empty(StatusCode::OK).with_headers(headers))
        });
        let err = SharedDoc::default()
            .http_push_pull_changes(
                "https://localhost",
                ClientOptions::new().with_http_client(doer),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "http request returned a response with an unsuitable content type text/html"
        );
    }

    #[tokio::test]
    async fn test_read_until_check_passes() {
        let doer = HttpDoerFn(|_request: SyncRequest| async {
            let remote = SyncSession::new(SharedDoc::default());
            let body = futures::stream::iter(remote.generate_message().map(|message| {
                Ok::<_, io::Error>(crate::sync::MessageFrame::sync(message.encode()).encode())
            }))
            // The remote never hangs up on its own.
            .chain(futures::stream::pending());
            Ok::<_, BoxError>(SyncResponse::new(StatusCode::OK, body))
        });

        let called = Arc::new(AtomicBool::new(false));
        let check = {
            let called = called.clone();
            move |_: &mut AutoCommit, _: &SyncMessageInfo| {
                called.store(true, Ordering::SeqCst);
                true
            }
        };

        tokio::time::timeout(
            Duration::from_secs(5),
            SharedDoc::default().http_push_pull_changes(
                "https://localhost",
                ClientOptions::new()
                    .with_http_client(doer)
                    .with_termination_check(check),
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("client did not stop")
        .unwrap();

        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_response() {
        let doer = HttpDoerFn(|_request: SyncRequest| {
            futures::future::pending::<Result<SyncResponse, BoxError>>()
        });
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });

        SharedDoc::default()
            .http_push_pull_changes(
                "https://localhost",
                ClientOptions::new().with_http_client(doer),
                &cancel,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_exchange_with_in_memory_server() {
        let server_doc = doc_with("server");
        let server_cancel = CancellationToken::new();
        let doer = {
            let server_doc = server_doc.clone();
            let server_cancel = server_cancel.clone();
            HttpDoerFn(move |request: SyncRequest| {
                let server_doc = server_doc.clone();
                let server_cancel = server_cancel.clone();
                async move {
                    let (mut sink, stream) = frame_pipe();
                    tokio::spawn(async move {
                        let session = SyncSession::new(server_doc.clone());
                        let subscription = server_doc.subscribe();
                        let _ = serve_exchange(
                            &session,
                            &subscription,
                            StreamReader::new(request.body),
                            &mut sink,
                            &accept_all,
                            &server_cancel,
                        )
                        .await;
                    });
                    Ok::<_, BoxError>(SyncResponse::new(StatusCode::OK, stream))
                }
            })
        };

        let client_doc = doc_with("client");
        tokio::time::timeout(
            Duration::from_secs(10),
            client_doc.http_push_pull_changes(
                "https://localhost",
                ClientOptions::new()
                    .with_http_client(doer)
                    .with_termination_check(heads_equal),
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("client did not converge")
        .unwrap();
        server_cancel.cancel();

        assert_eq!(client_doc.heads(), server_doc.heads());
        client_doc.with_doc(|doc| {
            assert!(doc.get(ROOT, "server").unwrap().is_some());
        });
        server_doc.with_doc(|doc| {
            assert!(doc.get(ROOT, "client").unwrap().is_some());
        });
    }
}
