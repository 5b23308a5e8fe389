//! Credit account handlers (balance, history, direct mutations).

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State},
};

use super::super::state::AppState;
use super::super::types::{
    AmountRequest, ApiError, ApiResult, HistoryQuery, RefundRequest, ok,
};
use crate::ledger::{CreditAccount, LedgerEvent};
use crate::user_auth::AuthenticatedUser;

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Get the caller's credit account
///
/// GET /api/v1/duel/credits
///
/// Creates the account with the initial grant on first contact.
#[utoipa::path(
    get,
    path = "/api/v1/duel/credits",
    responses(
        (status = 200, description = "Credit account snapshot", content_type = "application/json"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Credits"
)]
pub async fn get_credits(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<CreditAccount> {
    ok(state.ledger.get_or_init(&user.user_id))
}

/// Get the caller's ledger history, newest first
///
/// GET /api/v1/duel/credits/history?limit=50
#[utoipa::path(
    get,
    path = "/api/v1/duel/credits/history",
    params(
        ("limit" = Option<usize>, Query, description = "Maximum events to return (default 50)")
    ),
    responses(
        (status = 200, description = "Ledger events, newest first", content_type = "application/json"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Credits"
)]
pub async fn get_credit_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<LedgerEvent>> {
    state.ledger.get_or_init(&user.user_id);
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let history = state
        .ledger
        .history(&user.user_id, limit)
        .map_err(ApiError::from)?;
    ok(history)
}

/// Deposit credits
///
/// POST /api/v1/duel/credits/add
#[utoipa::path(
    post,
    path = "/api/v1/duel/credits/add",
    request_body = AmountRequest,
    responses(
        (status = 200, description = "Updated account", content_type = "application/json"),
        (status = 400, description = "Invalid amount"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Credits"
)]
pub async fn add_credits(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<CreditAccount> {
    let account = state
        .ledger
        .deposit(&user.user_id, req.amount)
        .map_err(ApiError::from)?;
    ok(account)
}

/// Withdraw credits
///
/// POST /api/v1/duel/credits/withdraw
#[utoipa::path(
    post,
    path = "/api/v1/duel/credits/withdraw",
    request_body = AmountRequest,
    responses(
        (status = 200, description = "Updated account", content_type = "application/json"),
        (status = 400, description = "Invalid amount or insufficient credits"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Credits"
)]
pub async fn withdraw_credits(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<CreditAccount> {
    let account = state
        .ledger
        .withdraw(&user.user_id, req.amount)
        .map_err(ApiError::from)?;
    ok(account)
}

/// Manual refund against a match the caller played
///
/// POST /api/v1/duel/credits/refund
#[utoipa::path(
    post,
    path = "/api/v1/duel/credits/refund",
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Updated account", content_type = "application/json"),
        (status = 400, description = "Caller did not play this match"),
        (status = 404, description = "Match not found"),
        (status = 401, description = "Unauthenticated")
    ),
    security(("bearer_auth" = [])),
    tag = "Credits"
)]
pub async fn refund_credits(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<RefundRequest>,
) -> ApiResult<CreditAccount> {
    let snapshot = state
        .coordinator
        .snapshot(&req.match_id)
        .await
        .map_err(ApiError::from)?;
    if snapshot.player_key_of(&user.user_id).is_none() {
        return ApiError::bad_request("caller did not play this match").into_err();
    }
    let account = state
        .ledger
        .release(&user.user_id, req.amount, &req.match_id)
        .map_err(ApiError::from)?;
    ok(account)
}
