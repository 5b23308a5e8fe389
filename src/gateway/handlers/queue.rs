//! Matchmaking queue handlers (join, leave, probe).

use std::sync::Arc;

use axum::{Extension, Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, JoinQueueRequest, ok};
use crate::matchmaker::{JoinQueueCmd, QueueReceipt, ScanReport};
use crate::models::MatchDuration;
use crate::user_auth::AuthenticatedUser;

#[derive(Debug, Serialize, ToSchema)]
pub struct LeaveResponse {
    pub removed: bool,
}

/// Join the duel matchmaking queue
///
/// POST /api/v1/duel/queue/join
///
/// Validates the caller can cover entry fee + safety fee, inserts the queue
/// entry, and kicks an immediate scan.
#[utoipa::path(
    post,
    path = "/api/v1/duel/queue/join",
    request_body = JoinQueueRequest,
    responses(
        (status = 200, description = "Queued for matchmaking", content_type = "application/json"),
        (status = 400, description = "Invalid stake or insufficient credits"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Queue"
)]
pub async fn join_queue(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<JoinQueueRequest>,
) -> ApiResult<QueueReceipt> {
    let duration = MatchDuration::try_from(req.duration).map_err(ApiError::bad_request)?;
    let receipt = state
        .matchmaker
        .join(JoinQueueCmd {
            user_id: user.user_id,
            stance_type: req.stance_type,
            persona_label: req.persona_label,
            ping_ms: req.ping_ms,
            entry_fee: req.entry_fee,
            safety_belt: req.safety_belt,
            duration,
        })
        .map_err(ApiError::from)?;
    // Non-blocking: pairing latency never holds up the join response.
    state.matchmaker.kick();
    ok(receipt)
}

/// Leave the duel matchmaking queue
///
/// POST /api/v1/duel/queue/leave
#[utoipa::path(
    post,
    path = "/api/v1/duel/queue/leave",
    responses(
        (status = 200, description = "Entry removed if present", content_type = "application/json"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Queue"
)]
pub async fn leave_queue(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<LeaveResponse> {
    let removed = state.matchmaker.leave(&user.user_id);
    ok(LeaveResponse { removed })
}

/// Force an immediate matchmaking scan
///
/// POST /api/v1/duel/queue/check
///
/// Clients probe this after waiting to trigger the AI-opponent fallback.
#[utoipa::path(
    post,
    path = "/api/v1/duel/queue/check",
    responses(
        (status = 200, description = "Scan executed", content_type = "application/json"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Queue"
)]
pub async fn check_matchmaking(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<ScanReport> {
    state.realtime.heartbeat(&user.user_id);
    let report = state.matchmaker.scan().await.map_err(ApiError::from)?;
    ok(report)
}
