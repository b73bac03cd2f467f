//! Push mode: HTTP listener for jobs sent by the management server

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use bulwark_core::{CommandResponse, Parameters, UNKNOWN_REQUEST_ID};

use crate::bridge::Bridge;
use crate::config::{AgentSession, PushSettings};
use crate::error::Result;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Body of `POST /execute`
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub module: String,
    pub action: String,
    #[serde(default)]
    pub params: Parameters,
}

#[derive(Clone)]
struct PushState {
    bridge: Bridge,
    session: watch::Receiver<AgentSession>,
}

impl PushState {
    /// Key in force for the current session
    fn api_key(&self) -> Option<String> {
        match &*self.session.borrow() {
            AgentSession::Push(settings) => Some(settings.api_key.clone()),
            _ => None,
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.api_key() else {
            return false;
        };
        headers
            .get(API_KEY_HEADER)
            .map(|v| constant_time_eq(v.as_bytes(), expected.as_bytes()))
            .unwrap_or(false)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Build the push-mode router
pub fn router(bridge: Bridge, session: watch::Receiver<AgentSession>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/execute", post(execute))
        .with_state(PushState { bridge, session })
        .layer(TraceLayer::new_for_http())
}

/// Listen on `settings.listen_addr` until `shutdown` resolves
///
/// In-flight requests are drained before returning.
pub async fn serve<F>(
    bridge: Bridge,
    settings: PushSettings,
    session: watch::Receiver<AgentSession>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(settings.listen_addr).await?;
    info!("Running in PUSH mode on {}", listener.local_addr()?);

    axum::serve(listener, router(bridge, session))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Push listener stopped");
    Ok(())
}

async fn health(State(state): State<PushState>) -> impl IntoResponse {
    let modules = state.bridge.module_names().await;
    let connected = modules.is_ok();

    Json(json!({
        "status": if connected { "healthy" } else { "degraded" },
        "rootd_connected": connected,
        "version": env!("CARGO_PKG_VERSION"),
        "modules": modules.unwrap_or_default(),
    }))
}

async fn execute(
    State(state): State<PushState>,
    headers: HeaderMap,
    body: std::result::Result<Json<ExecuteRequest>, JsonRejection>,
) -> impl IntoResponse {
    if !state.authorized(&headers) {
        warn!("Rejected unauthenticated push request");
        return (
            StatusCode::UNAUTHORIZED,
            Json(CommandResponse::failure(UNKNOWN_REQUEST_ID, "unauthorized")),
        );
    }

    let Json(job) = match body {
        Ok(job) => job,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(CommandResponse::failure(
                    UNKNOWN_REQUEST_ID,
                    format!("malformed request: {}", rejection.body_text()),
                )),
            );
        }
    };

    info!("Push command: {}/{}", job.module, job.action);
    match state
        .bridge
        .dispatch_one(&job.module, &job.action, job.params)
        .await
    {
        Ok(response) if response.is_success() => (StatusCode::OK, Json(response)),
        Ok(response) => (StatusCode::UNPROCESSABLE_ENTITY, Json(response)),
        Err(e) => {
            warn!("Daemon unavailable: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(CommandResponse::failure(UNKNOWN_REQUEST_ID, e.to_string())),
            )
        }
    }
}
