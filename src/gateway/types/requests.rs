//! Request DTOs for the duel RPC surface.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::models::Question;

#[derive(Debug, Deserialize, ToSchema)]
pub struct JoinQueueRequest {
    pub stance_type: String,
    #[serde(default)]
    pub persona_label: String,
    pub ping_ms: u32,
    pub entry_fee: u64,
    #[serde(default)]
    pub safety_belt: bool,
    /// 30 or 45 seconds.
    pub duration: u32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AmountRequest {
    pub amount: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundRequest {
    pub match_id: String,
    pub amount: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitAnswerRequest {
    pub match_id: String,
    pub question_id: String,
    pub question_order: u32,
    /// `0..=3` for a real answer, `-1` for the too-slow marker.
    pub answer_index: i32,
    /// Client wall clock at submission; informational only.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Milliseconds from match start.
    pub time_elapsed: u64,
    /// Proxy submission for the bot side of the caller's AI match.
    #[serde(default)]
    pub ai_user_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PopulateQuestionsRequest {
    pub questions: Vec<Question>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateQuestionsRequest {
    pub questions: Vec<Question>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SequencePickQuery {
    /// 30 or 45 seconds.
    pub duration: u32,
}

#[cfg(feature = "mock-api")]
#[derive(Debug, Deserialize, ToSchema)]
pub struct DevTokenRequest {
    pub user_id: String,
}
