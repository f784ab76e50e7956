//! Router for a multi-document sync server.
//!
//! Each document is addressed by an id in the path and created empty on its
//! first sync. Every client syncing the same id shares one [`SharedDoc`], so
//! changes from one client are streamed to all others.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::handler::ServerOptions;
use crate::sync::SharedDoc;

/// Documents held by the server, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct DocRegistry {
    docs: Arc<RwLock<HashMap<String, SharedDoc>>>,
}

impl DocRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<SharedDoc> {
        self.docs.read().await.get(id).cloned()
    }

    /// Returns the document for `id`, creating an empty one if needed.
    pub async fn get_or_create(&self, id: &str) -> SharedDoc {
        if let Some(doc) = self.get(id).await {
            return doc;
        }
        let mut docs = self.docs.write().await;
        docs.entry(id.to_string()).or_default().clone()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[derive(Clone)]
struct AppState {
    docs: DocRegistry,
    shutdown: CancellationToken,
}

/// Builds the router.
///
/// - `GET /health`: health check
/// - `GET /{id}`: the saved document bytes
/// - `PUT /{id}`: a streaming sync exchange on the document
///
/// Cancelling `shutdown` ends all running exchanges.
pub fn router(docs: DocRegistry, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/{id}", get(get_doc).put(sync_doc))
        .with_state(AppState { docs, shutdown })
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_doc(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.docs.get(&id).await {
        Some(doc) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            doc.save(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn sync_doc(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> Response {
    let doc = state.docs.get_or_create(&id).await;
    let options = ServerOptions::new().with_shutdown(state.shutdown.clone());
    let (response, exchange) = doc.serve_changes(request, options);

    tokio::spawn(async move {
        match exchange.wait().await {
            Ok(()) => tracing::debug!(doc = %id, "sync exchange finished"),
            // The status line has already gone out, so all we can do is log.
            Err(err) => tracing::error!(doc = %id, error = %err, "error returned while handling request"),
        }
    });

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use automerge::transaction::Transactable;
    use automerge::ROOT;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let response = router(DocRegistry::new(), CancellationToken::new())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_get_unknown_doc() {
        let response = router(DocRegistry::new(), CancellationToken::new())
            .oneshot(Request::builder().uri("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_saved_doc() {
        let docs = DocRegistry::new();
        let doc = docs.get_or_create("notes").await;
        doc.update(|d| d.put(ROOT, "a", "b").unwrap());

        let response = router(docs, CancellationToken::new())
            .oneshot(Request::builder().uri("/notes").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let mut loaded = automerge::AutoCommit::load(&body).unwrap();
        assert_eq!(loaded.get_heads(), doc.heads());
    }

    #[tokio::test]
    async fn test_registry_shares_documents() {
        let docs = DocRegistry::new();
        assert!(docs.is_empty().await);
        let first = docs.get_or_create("a").await;
        first.update(|d| d.put(ROOT, "k", "v").unwrap());
        let again = docs.get_or_create("a").await;

        assert_eq!(first.heads(), again.heads());
        assert_eq!(docs.len().await, 1);
    }
}
