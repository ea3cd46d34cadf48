use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use quill_core::sync::{ApplyResult, PullRequest, PullResponse, RemoteLedger, WireOperation};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::AppError;

const MAX_APPLY_OPERATIONS: usize = 1_000;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    ledger: Arc<Mutex<RemoteLedger>>,
}

impl AppState {
    pub fn from_config(config: Arc<ApiConfig>) -> Self {
        Self {
            config,
            ledger: Arc::new(Mutex::new(RemoteLedger::new())),
        }
    }

    fn ledger(&self) -> Result<MutexGuard<'_, RemoteLedger>, AppError> {
        self.ledger
            .lock()
            .map_err(|_| AppError::LedgerUnavailable)
    }
}

pub fn app_router(state: AppState) -> Router {
    let sync_routes = Router::new()
        .route("/sync/apply", post(apply_operations))
        .route("/sync/pull", post(pull_changes))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", sync_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    entries: usize,
    messages: usize,
}

async fn healthz(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let ledger = state.ledger()?;
    Ok(Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        entries: ledger.live_entry_count(),
        messages: ledger.live_message_count(),
    }))
}

async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = state.config.api_token.as_deref() {
        let token = extract_bearer_token(request.headers())?;
        if token != expected {
            return Err(AppError::Unauthorized("invalid bearer token"));
        }
    }
    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(AppError::Unauthorized("missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::Unauthorized("Authorization header is not valid UTF-8"))?;

    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AppError::Unauthorized("expected a Bearer token"))?;
    Ok(token)
}

async fn apply_operations(
    State(state): State<AppState>,
    Json(operations): Json<Vec<WireOperation>>,
) -> Result<Json<Vec<ApplyResult>>, AppError> {
    if operations.len() > MAX_APPLY_OPERATIONS {
        return Err(AppError::BatchTooLarge {
            count: operations.len(),
            max: MAX_APPLY_OPERATIONS,
        });
    }

    let results = state.ledger()?.apply(&operations);
    let rejected = results.iter().filter(|result| !result.success).count();
    tracing::info!(
        endpoint = "sync_apply",
        operations = operations.len(),
        rejected,
        "Applied sync operations"
    );
    Ok(Json(results))
}

async fn pull_changes(
    State(state): State<AppState>,
    Json(request): Json<PullRequest>,
) -> Result<Json<PullResponse>, AppError> {
    if request.owner_id.trim().is_empty() {
        return Err(AppError::invalid_pull("ownerId must not be empty"));
    }

    let response = state.ledger()?.pull(&request);
    tracing::info!(
        endpoint = "sync_pull",
        since = request.since,
        entries = response.entries.len(),
        messages = response.messages.len(),
        "Served sync pull"
    );
    Ok(Json(response))
}
