//! HTTP and WebSocket transport over a [`MirrorHub`].

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use mirror_hub_core::{HubError, MirrorHub, MirrorKey, MirrorRecord, Node, SweepReport};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error};
use uuid::Uuid;

mod ws;

#[derive(Clone)]
pub struct ApiState {
    pub hub: Arc<MirrorHub>,
}

pub fn create_router(hub: Arc<MirrorHub>) -> Router {
    let state = ApiState { hub };
    Router::new()
        .route("/api/write", post(write))
        .route("/api/read", get(read))
        .route("/api/status", get(status))
        .route("/api/sync", post(sync_now))
        .route("/ws", get(ws_upgrade))
        .route("/health", get(|| async { "OK" }))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

const REQUEST_ID: &str = "x-request-id";

async fn request_id_middleware(mut req: axum::extract::Request, next: Next) -> Response {
    let Ok(request_id) = HeaderValue::from_str(&Uuid::new_v4().to_string()) else {
        return next.run(req).await;
    };
    req.headers_mut().insert(REQUEST_ID, request_id.clone());
    let mut response = next.run(req).await;
    response.headers_mut().insert(REQUEST_ID, request_id);
    response
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub struct ApiError(HubError);

impl From<HubError> for ApiError {
    fn from(e: HubError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            HubError::InvalidPath(e) => {
                debug!(path = %e.path, "rejected path");
                (StatusCode::BAD_REQUEST, "Invalid path structure".to_string())
            }
            HubError::LocalPersist(e) => {
                error!(error = %e, "local persist failed");
                (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[derive(Deserialize)]
pub struct WriteRequest {
    pub path: String,
    /// `null` or missing deletes the path.
    #[serde(default)]
    pub value: Value,
}

#[derive(Serialize, Deserialize)]
pub struct WriteResponse {
    pub success: bool,
}

async fn write(
    State(state): State<ApiState>,
    Json(req): Json<WriteRequest>,
) -> Result<Json<WriteResponse>, ApiError> {
    state
        .hub
        .gateway()
        .write(&req.path, Node::from_json(req.value))
        .await?;
    Ok(Json(WriteResponse { success: true }))
}

#[derive(Deserialize)]
struct ReadQuery {
    path: String,
}

#[derive(Serialize, Deserialize)]
pub struct MirrorView {
    pub path: MirrorKey,
    pub data: Value,
    pub dirty: bool,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl From<MirrorRecord> for MirrorView {
    fn from(record: MirrorRecord) -> Self {
        Self {
            data: record.document.to_json(),
            path: record.key,
            dirty: record.dirty,
            revision: record.revision,
            updated_at: record.updated_at,
        }
    }
}

async fn read(
    State(state): State<ApiState>,
    Query(q): Query<ReadQuery>,
) -> Result<Json<MirrorView>, ApiError> {
    let record = state.hub.gateway().read(&q.path).await?;
    Ok(Json(record.into()))
}

#[derive(Serialize, Deserialize)]
pub struct MirrorStatus {
    pub path: MirrorKey,
    pub dirty: bool,
    pub revision: u64,
    pub synced_revision: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    pub mirrors: Vec<MirrorStatus>,
    pub dirty: usize,
}

async fn status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, ApiError> {
    let records = state.hub.gateway().status().await?;
    let mirrors: Vec<_> = records
        .into_iter()
        .map(|r| MirrorStatus {
            path: r.key,
            dirty: r.dirty,
            revision: r.revision,
            synced_revision: r.synced_revision,
            updated_at: r.updated_at,
        })
        .collect();
    let dirty = mirrors.iter().filter(|m| m.dirty).count();
    Ok(Json(StatusResponse { mirrors, dirty }))
}

async fn sync_now(State(state): State<ApiState>) -> Json<SweepReport> {
    Json(state.hub.sync_now().await)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket: WebSocket| async move {
        ws::handle_socket(socket, state.hub).await;
    })
}
