//! Admin handlers: question pool and sequence store management.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};

use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, PopulateQuestionsRequest, SequencePickQuery, ValidateQuestionsRequest, ok,
};
use crate::models::{MatchDuration, QuestionSequence};
use crate::question_pool::{
    BatchReport, QuestionStats, QuestionValidation, SequenceStats,
};

/// Bulk-upload questions into the pool
///
/// POST /api/v1/admin/duel/questions/populate
#[utoipa::path(
    post,
    path = "/api/v1/admin/duel/questions/populate",
    responses(
        (status = 200, description = "Batch written", content_type = "application/json"),
        (status = 400, description = "A question failed structural validation"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn populate_questions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PopulateQuestionsRequest>,
) -> ApiResult<BatchReport> {
    let report = state
        .pool
        .upload_question_batch(req.questions)
        .map_err(ApiError::from)?;
    ok(report)
}

/// Dry-run structural validation of questions
///
/// POST /api/v1/admin/duel/questions/validate
#[utoipa::path(
    post,
    path = "/api/v1/admin/duel/questions/validate",
    responses(
        (status = 200, description = "Per-question validation report", content_type = "application/json"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn validate_questions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateQuestionsRequest>,
) -> ApiResult<Vec<QuestionValidation>> {
    ok(state.pool.validate_questions(&req.questions))
}

/// Rebuild the twelve canonical sequences
///
/// POST /api/v1/admin/duel/sequences/generate
#[utoipa::path(
    post,
    path = "/api/v1/admin/duel/sequences/generate",
    responses(
        (status = 200, description = "Generated sequence ids", content_type = "application/json"),
        (status = 400, description = "Question pool is empty"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn generate_sequences(State(state): State<Arc<AppState>>) -> ApiResult<Vec<String>> {
    let ids = state.pool.generate_sequences().map_err(ApiError::from)?;
    ok(ids)
}

/// Question pool statistics
///
/// GET /api/v1/admin/duel/questions/stats
#[utoipa::path(
    get,
    path = "/api/v1/admin/duel/questions/stats",
    responses(
        (status = 200, description = "Counts by difficulty and category", content_type = "application/json"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn question_stats(State(state): State<Arc<AppState>>) -> ApiResult<QuestionStats> {
    ok(state.pool.question_stats())
}

/// Sequence store statistics
///
/// GET /api/v1/admin/duel/sequences/stats
#[utoipa::path(
    get,
    path = "/api/v1/admin/duel/sequences/stats",
    responses(
        (status = 200, description = "Counts by duration and strategy", content_type = "application/json"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn sequence_stats(State(state): State<Arc<AppState>>) -> ApiResult<SequenceStats> {
    ok(state.pool.sequence_stats())
}

/// Pick a random sequence for a duration (inspection aid)
///
/// GET /api/v1/admin/duel/sequences/pick?duration=30
#[utoipa::path(
    get,
    path = "/api/v1/admin/duel/sequences/pick",
    params(("duration" = u32, Query, description = "Match duration in seconds (30 or 45)")),
    responses(
        (status = 200, description = "A sequence matching the duration", content_type = "application/json"),
        (status = 400, description = "Invalid duration"),
        (status = 404, description = "No sequences generated yet"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn pick_sequence(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SequencePickQuery>,
) -> ApiResult<QuestionSequence> {
    let duration = MatchDuration::try_from(query.duration).map_err(ApiError::bad_request)?;
    let sequence_id = state.pool.pick_random(duration).map_err(ApiError::from)?;
    let sequence = state
        .pool
        .get_sequence(&sequence_id)
        .map_err(ApiError::from)?;
    ok(sequence)
}
