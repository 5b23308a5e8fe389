//! Dev-only token endpoint.
//!
//! [SECURITY] Compiled only with the `mock-api` feature. Production builds
//! MUST use `--no-default-features` to exclude this; the real issuer is the
//! external auth provider.

use std::sync::Arc;

use axum::{Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, DevTokenRequest, ok};

#[derive(Debug, Serialize, ToSchema)]
pub struct DevTokenResponse {
    pub token: String,
}

const DEV_TOKEN_TTL_SECS: i64 = 24 * 3600;

/// Issue a signed bearer token for any user id
///
/// POST /internal/mock/token
pub async fn issue_dev_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DevTokenRequest>,
) -> ApiResult<DevTokenResponse> {
    let token = state
        .auth
        .issue_token(&req.user_id, DEV_TOKEN_TTL_SECS)
        .map_err(ApiError::from)?;
    ok(DevTokenResponse { token })
}
