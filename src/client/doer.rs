//! The HTTP transport used by the sync client.

use std::future::Future;
use std::io;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode, Url, Version};

use crate::error::BoxError;
use crate::sync::{BodyFactory, MessageSource};

/// A sync request ready to be sent.
pub struct SyncRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// Streaming body. Nothing is generated until it is first polled.
    pub body: MessageSource,
    body_factory: BodyFactory,
}

impl SyncRequest {
    pub(crate) fn new(method: Method, url: Url, headers: HeaderMap, body_factory: BodyFactory) -> Self {
        Self {
            method,
            url,
            headers,
            body: body_factory(),
            body_factory,
        }
    }

    /// Builds a new body bound to the same exchange, for transports that
    /// replay a request after a redirect or a retry.
    pub fn fresh_body(&self) -> MessageSource {
        (self.body_factory)()
    }
}

impl std::fmt::Debug for SyncRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// The response to a [`SyncRequest`], with a streaming body.
pub struct SyncResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

impl SyncResponse {
    pub fn new<S>(status: StatusCode, body: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: body.boxed(),
        }
    }

    /// A response without a body.
    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, stream::empty())
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Executes sync requests.
///
/// Implemented for [`reqwest::Client`]. Wrap a closure in [`HttpDoerFn`] to
/// plug in a custom transport.
pub trait HttpDoer: Send + Sync {
    fn execute(&self, request: SyncRequest) -> BoxFuture<'_, Result<SyncResponse, BoxError>>;
}

impl HttpDoer for reqwest::Client {
    fn execute(&self, request: SyncRequest) -> BoxFuture<'_, Result<SyncResponse, BoxError>> {
        Box::pin(async move {
            let SyncRequest {
                method,
                url,
                headers,
                body,
                ..
            } = request;

            let response = self
                .request(method, url)
                .headers(headers)
                .body(reqwest::Body::wrap_stream(body))
                .send()
                .await?;

            Ok(SyncResponse {
                status: response.status(),
                version: response.version(),
                headers: response.headers().clone(),
                body: response.bytes_stream().map_err(io::Error::other).boxed(),
            })
        })
    }
}

/// Adapts a closure into an [`HttpDoer`].
pub struct HttpDoerFn<F>(pub F);

impl<F, Fut> HttpDoer for HttpDoerFn<F>
where
    F: Fn(SyncRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<SyncResponse, BoxError>> + Send + 'static,
{
    fn execute(&self, request: SyncRequest) -> BoxFuture<'_, Result<SyncResponse, BoxError>> {
        Box::pin((self.0)(request))
    }
}
