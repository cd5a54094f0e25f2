//! HTTP surface
//!
//! Serves resources by id with byte-range support, and lets a local player
//! report and read playback status.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::stream::{resolve_range_request, RangeResponse};
use crate::swarm::{ResourceId, SwarmEngine, SwarmError};
use crate::sync::{MediaClock, PlaybackReconciler, PlaybackStatus, Role};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn SwarmEngine>,
    pub reconciler: Arc<PlaybackReconciler>,
    pub clock: Arc<dyn MediaClock>,
    pub metadata_timeout: Duration,
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/watch/magnet/{id}", get(handle_watch))
        .route("/api/status", get(handle_get_status).post(handle_post_status))
        .with_state(state)
}

/// Serve the router on `addr` until the task is dropped
pub async fn serve(
    addr: &str,
    state: AppState,
) -> Result<(SocketAddr, JoinHandle<()>), SwarmError> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!("HTTP server listening on http://{}", local_addr);

    let app = router(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });
    Ok((local_addr, handle))
}

impl IntoResponse for RangeResponse {
    fn into_response(self) -> Response {
        let body = match self.body {
            Some(stream) => Body::from_stream(stream),
            None => Body::empty(),
        };
        (self.status, self.headers, body).into_response()
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

impl IntoResponse for SwarmError {
    fn into_response(self) -> Response {
        let status = match &self {
            SwarmError::InvalidResourceId(_) | SwarmError::ResourceNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SwarmError::MetadataTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, self.to_string())
    }
}

/// GET/HEAD /watch/magnet/{id}
async fn handle_watch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Result<RangeResponse, SwarmError> {
    let id: ResourceId = id.parse()?;
    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    debug!("{} resource {} range {:?}", method, id, range);

    resolve_range_request(
        state.engine.as_ref(),
        &id,
        &method,
        range,
        state.metadata_timeout,
    )
    .await
}

/// GET /api/status: local playback status
async fn handle_get_status(State(state): State<AppState>) -> Json<PlaybackStatus> {
    Json(state.clock.status())
}

/// POST /api/status: local play/pause/seek on the authority
async fn handle_post_status(
    State(state): State<AppState>,
    Json(status): Json<PlaybackStatus>,
) -> Response {
    if state.reconciler.role() != Role::Authority {
        return error_response(
            StatusCode::CONFLICT,
            "only the authority can set playback status".to_string(),
        );
    }
    if !status.current_time.is_finite() || status.current_time < 0.0 {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("invalid currentTime {}", status.current_time),
        );
    }

    state.clock.seek(status.current_time);
    state.clock.set_paused(status.paused);

    match state.reconciler.originate_status(state.clock.status()) {
        Some(message) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "id": message.id })),
        )
            .into_response(),
        None => error_response(
            StatusCode::CONFLICT,
            "only the authority can set playback status".to_string(),
        ),
    }
}
