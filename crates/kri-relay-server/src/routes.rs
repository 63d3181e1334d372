//! HTTP surface: token-guarded JSON routes over the relay core, plus /health.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json as AxumJson, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use kri_relay::{ColumnOverrides, Relay, RelayError};

/// Header carrying the shared secret on every guarded route.
pub const TOKEN_HEADER: &str = "x-api-token";

/// Shared state handed to every handler.
pub struct AppState {
    pub relay: Relay,
    /// Without a configured token every guarded call is rejected.
    pub api_token: Option<String>,
}

/// Build the router. /health is mounted after the auth layer so it bypasses it.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/kri/by-id", post(handle_by_id))
        .route("/kri/search", post(handle_search))
        .route("/kri/session/reset", post(handle_reset))
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Relay listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}

// ─────────────────────── errors ───────────────────────

/// Failures rendered as `{ ok: false, kind, error }`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Relay(RelayError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Relay(RelayError::Transport { timed_out: true, .. }) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ApiError::Relay(
                RelayError::Transport { .. }
                | RelayError::RedirectLoop { .. }
                | RelayError::LoginFailed { .. },
            ) => StatusCode::BAD_GATEWAY,
            ApiError::Relay(RelayError::MissingCredentials | RelayError::InvalidUrl(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Relay(e) => e.kind(),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        ApiError::Relay(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = serde_json::json!({
            "ok": false,
            "kind": self.kind(),
        });
        match &self {
            ApiError::Unauthorized => body["error"] = "Unauthorized".into(),
            ApiError::BadRequest(message) => body["error"] = message.as_str().into(),
            ApiError::Relay(e) => {
                body["error"] = e.to_string().into();
                if let Some(step) = e.step() {
                    body["step"] = serde_json::json!(step);
                }
            }
        }
        (status, AxumJson(body)).into_response()
    }
}

// ─────────────────────── middleware ───────────────────────

async fn auth_layer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Response {
    let authorized = match &state.api_token {
        Some(expected) => headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|token| token == expected),
        None => false,
    };

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "Rejected request without a valid token");
        return ApiError::Unauthorized.into_response();
    }

    next.run(request).await
}

// ─────────────────────── handlers ───────────────────────

/// Researcher numbers arrive either as JSON strings or numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResearcherId {
    Text(String),
    Number(u64),
}

impl ResearcherId {
    fn normalized(&self) -> String {
        match self {
            ResearcherId::Text(s) => s.trim().to_string(),
            ResearcherId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ByIdRequest {
    researcher_id: Option<ResearcherId>,
    papers_columns: Option<String>,
    projects_columns: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    name: Option<String>,
    organization: Option<String>,
    columns: Option<String>,
}

async fn handle_health(State(state): State<Arc<AppState>>) -> AxumJson<serde_json::Value> {
    AxumJson(serde_json::json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "session": state.relay.session().state(),
    }))
}

async fn handle_by_id(
    State(state): State<Arc<AppState>>,
    body: Result<AxumJson<ByIdRequest>, JsonRejection>,
) -> Result<AxumJson<serde_json::Value>, ApiError> {
    let started = Instant::now();
    let AxumJson(req) = body?;

    let researcher_id = req
        .researcher_id
        .map(|id| id.normalized())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("researcherId is required".into()))?;

    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, %researcher_id, "Achievements lookup");

    let overrides = ColumnOverrides {
        papers: non_blank(req.papers_columns),
        projects: non_blank(req.projects_columns),
    };
    let out = state
        .relay
        .fetch_achievements(&researcher_id, &overrides)
        .await
        .inspect_err(|e| tracing::warn!(%request_id, kind = e.kind(), "Lookup failed: {e}"))?;

    let took_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        %request_id,
        papers = out.papers.records.len(),
        projects = out.projects.records.len(),
        took_ms,
        "Lookup finished"
    );

    Ok(AxumJson(serde_json::json!({
        "ok": true,
        "tookMs": took_ms,
        "researcherId": researcher_id,
        "papers": out.papers,
        "projects": out.projects,
    })))
}

async fn handle_search(
    State(state): State<Arc<AppState>>,
    body: Result<AxumJson<SearchRequest>, JsonRejection>,
) -> Result<AxumJson<serde_json::Value>, ApiError> {
    let started = Instant::now();
    let AxumJson(req) = body?;

    let name = non_blank(req.name)
        .ok_or_else(|| ApiError::BadRequest("name is required".into()))?;
    let organization = non_blank(req.organization);

    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, "Researcher search");

    let results = state
        .relay
        .search_researchers(&name, organization.as_deref(), req.columns.as_deref())
        .await
        .inspect_err(|e| tracing::warn!(%request_id, kind = e.kind(), "Search failed: {e}"))?;

    let took_ms = started.elapsed().as_millis() as u64;
    tracing::info!(%request_id, results = results.records.len(), took_ms, "Search finished");

    Ok(AxumJson(serde_json::json!({
        "ok": true,
        "tookMs": took_ms,
        "name": name,
        "organization": organization,
        "results": results,
    })))
}

async fn handle_reset(State(state): State<Arc<AppState>>) -> AxumJson<serde_json::Value> {
    state.relay.session().invalidate().await;
    AxumJson(serde_json::json!({
        "ok": true,
        "session": state.relay.session().state(),
    }))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
