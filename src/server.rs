//! HTTP server implementation using Axum.

use crate::consent::ConsentGate;
use crate::error::ApiError;
use crate::lifecycle::ShutdownHandle;
use crate::session::{CloseOutcome, SessionCoordinator};
use crate::target::TargetFile;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub target: Arc<TargetFile>,
    pub sessions: Arc<SessionCoordinator>,
    pub consent: ConsentGate,
    pub shutdown: ShutdownHandle,
}

// Request/Response types
#[derive(Deserialize)]
struct OpenQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileResponse {
    name: String,
    full_path: String,
    content: String,
    session_id: String,
}

#[derive(Deserialize)]
struct SaveRequest {
    content: String,
}

#[derive(Deserialize, Default)]
struct CloseRequest {
    #[serde(rename = "sessionId")]
    session_id: Option<serde_json::Value>,
}

impl CloseRequest {
    /// Falsy ids (`null`, `""`, `0`, `false`) count as missing. Any other
    /// non-string id keeps its JSON text, which never matches a minted id.
    fn session_id(&self) -> Option<String> {
        use serde_json::Value;
        match self.session_id.as_ref()? {
            Value::Null | Value::Bool(false) => None,
            Value::String(id) => Some(id.clone()),
            Value::Number(n) if n.as_f64() == Some(0.0) => None,
            other => Some(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct Ack {
    success: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    ignored: bool,
}

impl Ack {
    fn ok() -> Json<Self> {
        Json(Self {
            success: true,
            ignored: false,
        })
    }

    fn ignored() -> Json<Self> {
        Json(Self {
            success: false,
            ignored: true,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/file", get(open_file).post(save_file))
        .route("/api/security-consent", post(security_consent))
        .route("/api/close-session", post(close_session))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn run_server<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Starting HTTP server on {}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> &'static str {
    "OK"
}

async fn open_file(
    State(state): State<AppState>,
    Query(query): Query<OpenQuery>,
) -> Result<Json<FileResponse>, ApiError> {
    let session_id = state
        .sessions
        .open_session(query.session_id.as_deref())
        .await
        .map_err(|conflict| {
            ApiError::new(StatusCode::CONFLICT, conflict.to_string())
                .with_details("another editor tab already has this file open")
        })?;

    let content = match state.target.read().await {
        Ok(content) => content,
        Err(err) => {
            state.sessions.release(&session_id).await;
            error!(error = %err, "failed to read target file");
            return Err(ApiError::internal("Could not read file", err));
        }
    };

    Ok(Json(FileResponse {
        name: state.target.name().to_string(),
        full_path: state.target.path().display().to_string(),
        content,
        session_id,
    }))
}

async fn save_file(
    State(state): State<AppState>,
    payload: Result<Json<SaveRequest>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let Json(req) = payload.map_err(|rejection| {
        ApiError::new(StatusCode::BAD_REQUEST, "Invalid save request").with_details(rejection.body_text())
    })?;

    state.target.write(&req.content).await.map_err(|err| {
        error!(error = %err, "failed to save target file");
        ApiError::internal("Could not save file", err)
    })?;
    info!(bytes = req.content.len(), "file saved");
    Ok(Ack::ok())
}

async fn security_consent(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let cookie = state.consent.set_cookie_header(&headers).map_err(|err| {
        error!(error = %err, "failed to build security consent cookie");
        ApiError::internal("Could not persist security consent", err)
    })?;
    Ok(([cookie], Ack::ok()))
}

/// Accepts any content type, since unload beacons arrive as `text/plain`.
async fn close_session(State(state): State<AppState>, body: Bytes) -> Result<Json<Ack>, ApiError> {
    let req: CloseRequest = serde_json::from_slice(&body).unwrap_or_default();

    match state.sessions.close_session(req.session_id().as_deref()).await {
        CloseOutcome::MissingId => Err(ApiError::new(StatusCode::BAD_REQUEST, "Missing sessionId")),
        CloseOutcome::Ignored => Ok(Ack::ignored()),
        CloseOutcome::Closed { shutdown_after } => {
            state.shutdown.session_closed(shutdown_after);
            Ok(Ack::ok())
        }
    }
}
