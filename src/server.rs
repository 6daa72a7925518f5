//! HTTP surface.
//!
//! | Route | |
//! |---|---|
//! | `POST /search` | YAML search document → JSON result |
//! | `GET /documents` | up to 1000 stored documents |
//! | `GET /mapping` | index schema as YAML |
//! | `GET /health` | liveness |
//!
//! Compilation may block on the embedding provider, so every handler runs
//! its work on the blocking pool.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;

use crate::search::query::{DocumentList, SearchResult};
use crate::service::{SearchService, ServiceError};

type HandlerError = (StatusCode, String);

pub fn router(service: Arc<SearchService>) -> Router {
    Router::new()
        .route("/search", post(search))
        .route("/documents", get(list_documents))
        .route("/mapping", get(mapping))
        .route("/health", get(health))
        .with_state(service)
}

/// Serve until Ctrl-C.
pub async fn serve(listener: TcpListener, service: Arc<SearchService>) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "query server listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("query server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn search(
    State(service): State<Arc<SearchService>>,
    body: String,
) -> Result<Json<SearchResult>, HandlerError> {
    let result = run_blocking(move || service.search_yaml(&body)).await?;
    Ok(Json(result))
}

async fn list_documents(
    State(service): State<Arc<SearchService>>,
) -> Result<Json<DocumentList>, HandlerError> {
    let documents = run_blocking(move || service.list_documents()).await?;
    Ok(Json(documents))
}

async fn mapping(
    State(service): State<Arc<SearchService>>,
) -> Result<impl IntoResponse, HandlerError> {
    let yaml = run_blocking(move || service.mapping_yaml()).await?;
    Ok(([(header::CONTENT_TYPE, "application/yaml")], yaml))
}

async fn health() -> &'static str {
    "ok"
}

async fn run_blocking<T, F>(work: F) -> Result<T, HandlerError>
where
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(error_response(&e)),
        Err(e) => {
            tracing::error!(error = %e, "request task failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, format!("request task failed: {e}")))
        }
    }
}

fn error_response(error: &ServiceError) -> HandlerError {
    let status = if error.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, error.to_string())
}
