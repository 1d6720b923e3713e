//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::error;

use crate::app::AppState;
use crate::bus;
use crate::game::{CaptureError, GamePhase};
use crate::store::{Player, PlayerId, StoreError, Tile};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::ServerMsg;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - CLIENT_ORIGIN is comma-separated, unset allows any origin
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origins
        .iter()
        .filter_map(|s| s.parse::<header::HeaderValue>().ok())
        .collect();

    let allow_origin = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed_origins)
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/tiles", get(tiles_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .route("/capture", post(capture_handler))
        .route("/cooldown/:user_id", get(cooldown_handler))
        .route("/register", post(register_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    connections: usize,
    phase: GamePhase,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        connections: state.hub.connection_count().await,
        phase: state.latch.phase(),
    })
}

// ============================================================================
// Board endpoints
// ============================================================================

async fn tiles_handler(State(state): State<AppState>) -> Result<Json<Vec<Tile>>, AppError> {
    let tiles = state.store.list_tiles().await?;
    Ok(Json(tiles))
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct LeaderboardEntry {
    user_id: PlayerId,
    name: String,
    color: String,
    count: usize,
}

/// Players owning at least one tile, most tiles first
async fn leaderboard_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    let mut counts = state.store.aggregate_ownership().await?;
    counts.retain(|c| c.count > 0);
    counts.sort_by(|a, b| b.count.cmp(&a.count));

    Ok(Json(
        counts
            .into_iter()
            .map(|c| LeaderboardEntry {
                user_id: c.player.id,
                name: c.player.name,
                color: c.player.color,
                count: c.count,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptureRequest {
    tile_id: i32,
    user_id: PlayerId,
}

/// Same protocol as the WebSocket `capture` message, with the error reported
async fn capture_handler(
    State(state): State<AppState>,
    Json(req): Json<CaptureRequest>,
) -> Result<Json<Tile>, AppError> {
    let tile = state.capture.capture(req.tile_id, &req.user_id).await?;

    let update = ServerMsg::tile_update(&tile);
    if let Err(e) = bus::publish_msg(state.bus.as_ref(), &update).await {
        error!(tile_id = tile.id, error = %e, "Failed to publish tile update");
    }

    Ok(Json(tile))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CooldownResponse {
    user_id: PlayerId,
    remaining_ms: u64,
}

async fn cooldown_handler(
    State(state): State<AppState>,
    Path(user_id): Path<PlayerId>,
) -> Json<CooldownResponse> {
    let remaining = state.capture.remaining_cooldown(&user_id);
    Json(CooldownResponse {
        user_id,
        remaining_ms: remaining.as_millis() as u64,
    })
}

async fn register_handler(
    State(state): State<AppState>,
    Json(player): Json<Player>,
) -> Result<StatusCode, AppError> {
    if player.id.trim().is_empty() {
        return Err(AppError::BadRequest("id must not be empty".to_string()));
    }
    state.store.register_player(player).await?;
    Ok(StatusCode::CREATED)
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::TileNotFound(_) => AppError::NotFound(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<CaptureError> for AppError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::CooldownActive { .. } => AppError::TooManyRequests(e.to_string()),
            CaptureError::AlreadyClaimed { .. } => AppError::Conflict(e.to_string()),
            CaptureError::Store(store) => store.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
