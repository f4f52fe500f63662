//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::require_admin;
use crate::sim::roster::{MatchCategory, RosterMember, Tactics};
use crate::store::{FinishReason, MatchRecord, MatchStatus, StoreError};
use crate::util::time::uptime_secs;
use crate::ws::handler::spectate_handler;
use crate::ws::protocol::ServerMsg;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/matches/:id", get(match_handler))
        .route("/matches/:id/live", get(spectate_handler));

    // Admin routes (API key required when configured)
    let admin_routes = Router::new()
        .route("/matches", post(schedule_handler))
        .route("/matches/:id/terminate", post(terminate_handler))
        .route("/teams/:id/starters", put(starters_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(CompressionLayer::new())
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
    running_matches: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        running_matches: state.engine.running(),
    })
}

// ============================================================================
// Match endpoints
// ============================================================================

#[derive(Deserialize)]
struct ScheduleRequest {
    side_a_team: Uuid,
    side_b_team: Uuid,
    category: MatchCategory,
    /// Defaults to now, picked up by the next scheduler scan
    #[serde(default)]
    scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    tactics_a: Tactics,
    #[serde(default)]
    tactics_b: Tactics,
}

async fn schedule_handler(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<MatchView>), AppError> {
    if req.side_a_team == req.side_b_team {
        return Err(AppError::BadRequest(
            "A team cannot play itself".to_string(),
        ));
    }
    for tactics in [&req.tactics_a, &req.tactics_b] {
        tactics
            .validate()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
    }

    let record = MatchRecord::scheduled(
        req.side_a_team,
        req.side_b_team,
        req.category,
        req.scheduled_at.unwrap_or_else(Utc::now),
    )
    .with_tactics(req.tactics_a, req.tactics_b);

    let record = state.store.insert_scheduled(record).await?;
    info!(match_id = %record.id, scheduled_at = %record.scheduled_at, "Match scheduled");

    Ok((StatusCode::CREATED, Json(MatchView::new(record, None))))
}

/// Persisted match plus the live view while it is running
#[derive(Serialize)]
struct MatchView {
    id: Uuid,
    status: MatchStatus,
    category: MatchCategory,
    scheduled_at: DateTime<Utc>,
    side_a_team: Uuid,
    side_b_team: Uuid,
    score: Option<[u8; 2]>,
    winner_team: Option<Uuid>,
    finish_reason: Option<FinishReason>,
    finished_at: Option<DateTime<Utc>>,
    live: Option<ServerMsg>,
}

impl MatchView {
    fn new(record: MatchRecord, live: Option<ServerMsg>) -> Self {
        Self {
            id: record.id,
            status: record.status,
            category: record.category,
            scheduled_at: record.scheduled_at,
            side_a_team: record.side_a_team,
            side_b_team: record.side_b_team,
            score: record.score,
            winner_team: record.winner_team,
            finish_reason: record.finish_reason,
            finished_at: record.finished_at,
            live,
        }
    }
}

async fn match_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchView>, AppError> {
    let record = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Match {} not found", id)))?;

    Ok(Json(MatchView::new(record, state.engine.live_update(id))))
}

#[derive(Serialize)]
struct TerminateResponse {
    status: &'static str,
    message: String,
}

async fn terminate_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<TerminateResponse>), AppError> {
    if !state.engine.terminate(id) {
        return Err(AppError::NotFound(format!("Match {} is not running", id)));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(TerminateResponse {
            status: "terminating",
            message: "Match ends on the next tick".to_string(),
        }),
    ))
}

// ============================================================================
// Roster endpoints
// ============================================================================

async fn starters_handler(
    State(state): State<AppState>,
    Path(team_id): Path<Uuid>,
    Json(starters): Json<Vec<RosterMember>>,
) -> Result<StatusCode, AppError> {
    let count = starters.len();
    state.rosters.put_starters(team_id, starters).await?;
    info!(team_id = %team_id, count, "Starters updated");
    Ok(StatusCode::NO_CONTENT)
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

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => AppError::NotFound(format!("Match {} not found", id)),
            StoreError::TooManyStarters(_) => AppError::BadRequest(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
