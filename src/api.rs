//! ==============================================================================
//! api.rs - local status and override api
//! ==============================================================================
//!
//! routes:
//!     GET  /health        liveness
//!     GET  /api/state     current NodeStatus snapshot
//!     POST /api/ac        {"status": bool, "source": "dashboard"}
//!     GET  /api/events    ?limit=N (default 50), audit events oldest first
//!
//! the api never touches the output pin or the database. requests are queued
//! to the control task as a Command and answered by it, in order, between
//! timer ticks. an override only succeeds once /labs/{id}/ac holds the new
//! state.
//!
//! ==============================================================================

use crate::domain::NodeStatus;
use crate::node::{Command, SharedStatus};
use crate::store::StoreError;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::CorsLayer;

const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 1000;
/// longer than one database timeout plus a sampling cycle
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

type Failure = (StatusCode, Json<Value>);

#[derive(Clone)]
pub struct ApiState {
    pub status: SharedStatus,
    pub commands: mpsc::Sender<Command>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/state", get(state_handler))
        .route("/api/ac", post(ac_handler))
        .route("/api/events", get(events_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bind: &str, state: ApiState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("[API] listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "SafeLabs Sensor Node" }))
}

async fn state_handler(State(state): State<ApiState>) -> Json<NodeStatus> {
    Json(state.status.read().await.clone())
}

#[derive(Deserialize)]
struct AcRequest {
    status: bool,
    #[serde(default)]
    source: Option<String>,
}

/// POST /api/ac
async fn ac_handler(State(state): State<ApiState>, Json(request): Json<AcRequest>) -> Result<Json<Value>, Failure> {
    let (reply, answer) = oneshot::channel();
    let command = Command::SetAc {
        on: request.status,
        source: request.source.unwrap_or_else(|| "API".to_string()),
        reply,
    };
    ask(&state, command, answer).await?;
    Ok(Json(json!({ "success": true, "state": request.status })))
}

#[derive(Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
}

/// GET /api/events
async fn events_handler(State(state): State<ApiState>, Query(query): Query<EventsQuery>) -> Result<Json<Value>, Failure> {
    let limit = match query.limit {
        None | Some(0) => DEFAULT_EVENT_LIMIT,
        Some(n) => n.min(MAX_EVENT_LIMIT),
    };
    let (reply, answer) = oneshot::channel();
    let events = ask(&state, Command::ListEvents { limit, reply }, answer).await?;

    let events: Vec<Value> = events
        .into_iter()
        .map(|(id, mut event)| {
            if let Value::Object(fields) = &mut event {
                fields.insert("id".to_string(), Value::String(id));
            }
            event
        })
        .collect();
    Ok(Json(json!({ "events": events })))
}

/// queue `command` and wait for the control task to answer it
async fn ask<T>(state: &ApiState, command: Command, answer: oneshot::Receiver<Result<T, StoreError>>) -> Result<T, Failure> {
    if let Err(e) = state.commands.try_send(command) {
        tracing::warn!("[API] request dropped: {}", e);
        return Err(failure(StatusCode::SERVICE_UNAVAILABLE, "control loop busy"));
    }
    match tokio::time::timeout(REPLY_TIMEOUT, answer).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(StoreError::NotReady))) => Err(failure(StatusCode::SERVICE_UNAVAILABLE, "database offline")),
        Ok(Ok(Err(e))) => Err(failure(StatusCode::BAD_GATEWAY, &e.to_string())),
        Ok(Err(_)) => Err(failure(StatusCode::INTERNAL_SERVER_ERROR, "control loop stopped")),
        Err(_) => Err(failure(StatusCode::GATEWAY_TIMEOUT, "control loop did not answer")),
    }
}

fn failure(status: StatusCode, error: &str) -> Failure {
    (status, Json(json!({ "success": false, "error": error })))
}
