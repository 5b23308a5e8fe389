//! Match play handlers (answers, readiness, finalize, snapshot).

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Serialize;
use utoipa::ToSchema;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, SubmitAnswerRequest, ok};
use crate::coordinator::{SubmitAnswerCmd, SubmitOutcome};
use crate::models::Match;
use crate::user_auth::AuthenticatedUser;

#[derive(Debug, Serialize, ToSchema)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
}

/// Submit one answer (or the too-slow marker)
///
/// POST /api/v1/duel/matches/answer
///
/// The optional `ai_user_id` proxies the bot's answers in AI matches; the
/// server validates it carries the bot prefix.
#[utoipa::path(
    post,
    path = "/api/v1/duel/matches/answer",
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Submission recorded (or absorbed as a duplicate)", content_type = "application/json"),
        (status = 400, description = "Out-of-order submission, spoofed question, or bad participant"),
        (status = 404, description = "Match or question not found"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Duel"
)]
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<SubmitAnswerRequest>,
) -> ApiResult<SubmitOutcome> {
    state.realtime.heartbeat(&user.user_id);
    let outcome = state
        .coordinator
        .submit_answer(SubmitAnswerCmd {
            match_id: req.match_id,
            caller_id: user.user_id,
            ai_user_id: req.ai_user_id,
            question_id: req.question_id,
            question_order: req.question_order,
            answer_index: req.answer_index,
            client_timestamp: req.timestamp,
            time_elapsed_ms: req.time_elapsed,
        })
        .await
        .map_err(ApiError::from)?;
    ok(outcome)
}

/// Client readiness marker
///
/// POST /api/v1/duel/matches/{match_id}/start
#[utoipa::path(
    post,
    path = "/api/v1/duel/matches/{match_id}/start",
    params(("match_id" = String, Path, description = "Match ID")),
    responses(
        (status = 200, description = "Match is running", content_type = "application/json"),
        (status = 400, description = "Not a participant or match not startable"),
        (status = 404, description = "Match not found"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Duel"
)]
pub async fn start_match(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(match_id): Path<String>,
) -> ApiResult<Match> {
    let started = state
        .coordinator
        .start_match(&match_id, &user.user_id)
        .await
        .map_err(ApiError::from)?;
    ok(started)
}

/// Finalize a match (first caller wins; later calls observe the result)
///
/// POST /api/v1/duel/matches/{match_id}/finalize
#[utoipa::path(
    post,
    path = "/api/v1/duel/matches/{match_id}/finalize",
    params(("match_id" = String, Path, description = "Match ID")),
    responses(
        (status = 200, description = "Terminal match state", content_type = "application/json"),
        (status = 400, description = "Not a participant"),
        (status = 404, description = "Match not found"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Duel"
)]
pub async fn finalize_match(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(match_id): Path<String>,
) -> ApiResult<Match> {
    let settled = state
        .coordinator
        .finalize(&match_id, &user.user_id)
        .await
        .map_err(ApiError::from)?;
    ok(settled)
}

/// Direct match snapshot read
///
/// GET /api/v1/duel/matches/{match_id}
///
/// The client's fallback when the settlement result does not arrive on the
/// real-time channel within its timeout.
#[utoipa::path(
    get,
    path = "/api/v1/duel/matches/{match_id}",
    params(("match_id" = String, Path, description = "Match ID")),
    responses(
        (status = 200, description = "Committed match snapshot", content_type = "application/json"),
        (status = 400, description = "Not a participant"),
        (status = 404, description = "Match not found"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Duel"
)]
pub async fn get_match(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(match_id): Path<String>,
) -> ApiResult<Match> {
    let snapshot = state
        .coordinator
        .snapshot(&match_id)
        .await
        .map_err(ApiError::from)?;
    if snapshot.player_key_of(&user.user_id).is_none() {
        return ApiError::bad_request("caller did not play this match").into_err();
    }
    ok(snapshot)
}

/// Presence heartbeat
///
/// POST /api/v1/duel/presence/heartbeat
#[utoipa::path(
    post,
    path = "/api/v1/duel/presence/heartbeat",
    responses(
        (status = 200, description = "Heartbeat recorded", content_type = "application/json"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Duel"
)]
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<HeartbeatResponse> {
    state.realtime.heartbeat(&user.user_id);
    ok(HeartbeatResponse { acknowledged: true })
}
