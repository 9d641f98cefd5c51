//! HTTP daemon/server mode for `tunegrep`.
//!
//! This module exposes a small HTTP+JSON API over one configured store:
//!
//! - `GET /v1/health` – simple health check endpoint.
//! - `POST /v1/search` – accepts `{query, limit?, native_syntax?}` and
//!   returns a `SearchResult`.
//! - `POST /v1/index` – accepts `{mode?, force_rescan?}` and returns an
//!   `IndexSummary`.
//! - `POST /v1/prune` – returns a `PruneSummary`.
//! - `GET /v1/info` – returns a `StoreSummary`.
//!
//! Engine calls run on Tokio's blocking pool. Searches share a read lock;
//! index and prune runs take the write lock so only one writer touches
//! the store at a time.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::models::{
    IndexConfig, IndexMode, IndexSummary, PruneSummary, SearchConfig, SearchResult, StoreSummary,
};
use crate::search::engine;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ServerState {
    index: Arc<IndexConfig>,
    lock: Arc<RwLock<()>>,
}

impl ServerState {
    /// Serve the store in `index.store`, indexing `index.root` on request.
    pub fn new(index: IndexConfig) -> Self {
        Self {
            index: Arc::new(index),
            lock: Arc::new(RwLock::new(())),
        }
    }
}

/// Simple health-check response payload.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(default)]
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    native_syntax: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct IndexBody {
    #[serde(default)]
    mode: Option<IndexMode>,
    #[serde(default)]
    force_rescan: bool,
}

/// JSON error body returned by the API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Error type used by HTTP handlers to map internal failures into
/// JSON error responses.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{err:#}");
        if message.starts_with("store not found at ") {
            Self {
                status: StatusCode::NOT_FOUND,
                message,
            }
        } else {
            ApiError::bad_request(message)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

/// Build the Axum router for the tunegrep HTTP API.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/search", post(search))
        .route("/v1/index", post(index))
        .route("/v1/prune", post(prune))
        .route("/v1/info", get(store_info))
        .with_state(state)
}

/// Run the HTTP server bound to the provided socket address.
///
/// This is used by the CLI `tunegrep serve` subcommand.
pub async fn run(addr: SocketAddr, state: ServerState) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_with_listener(listener, state).await
}

/// Run the HTTP server using an existing `TcpListener`.
pub async fn serve_with_listener(listener: TcpListener, state: ServerState) -> Result<()> {
    info!(
        addr = ?listener.local_addr().ok(),
        store = %state.index.store.location.display(),
        "serving"
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Run `job` on the blocking pool while holding the store lock.
async fn blocking<T, F>(state: &ServerState, access: Access, job: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&IndexConfig) -> Result<T> + Send + 'static,
{
    let index = Arc::clone(&state.index);
    let lock = Arc::clone(&state.lock);

    tokio::task::spawn_blocking(move || {
        let poisoned = || anyhow!("store lock poisoned");
        match access {
            Access::Read => {
                let _guard = lock.read().map_err(|_| poisoned())?;
                job(&index)
            }
            Access::Write => {
                let _guard = lock.write().map_err(|_| poisoned())?;
                job(&index)
            }
        }
    })
    .await
    .map_err(|err| ApiError::internal(err.to_string()))?
    .map_err(ApiError::from)
}

/// Opening a store that does not exist yet creates it and may import the
/// sibling store, so that search has to run as a writer.
fn search_access(index: &IndexConfig) -> Access {
    if index.store.location.exists() {
        Access::Read
    } else {
        Access::Write
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn search(
    State(state): State<ServerState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResult>, ApiError> {
    let access = search_access(&state.index);
    let result = blocking(&state, access, move |index| {
        engine::run_search(SearchConfig {
            query: body.query,
            store: index.store.clone(),
            native_syntax: body.native_syntax.unwrap_or(true),
            limit: body.limit,
            index_if_empty: None,
        })
    })
    .await?;
    Ok(Json(result))
}

async fn index(
    State(state): State<ServerState>,
    body: Option<Json<IndexBody>>,
) -> Result<Json<IndexSummary>, ApiError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let summary = blocking(&state, Access::Write, move |index| {
        let mut config = index.clone();
        config.mode = body.mode.unwrap_or(IndexMode::Full);
        config.force_rescan = body.force_rescan;
        engine::run_index(&config)
    })
    .await?;
    Ok(Json(summary))
}

async fn prune(State(state): State<ServerState>) -> Result<Json<PruneSummary>, ApiError> {
    let summary = blocking(&state, Access::Write, |index| engine::run_prune(&index.store)).await?;
    Ok(Json(summary))
}

async fn store_info(State(state): State<ServerState>) -> Result<Json<StoreSummary>, ApiError> {
    let summary = blocking(&state, Access::Read, |index| {
        crate::index::get_store_info(&index.store)
    })
    .await?;
    Ok(Json(summary))
}
