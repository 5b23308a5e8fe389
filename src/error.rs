//! Unified error taxonomy for the duel core.
//!
//! Every component (ledger, question pool, matchmaker, coordinator,
//! settlement) surfaces one of these outcomes. The gateway maps them onto
//! HTTP status / error-code pairs in one place.
//!
//! Propagation policy:
//! - `ConcurrencyConflict` is retryable; components that place credit holds
//!   retry a bounded number of times before surfacing it.
//! - Anti-cheat failures never propagate as errors: they cancel the match
//!   with a refund, which clients observe via the match snapshot.
//! - Late duplicate answer submissions are absorbed silently (idempotent).

use thiserror::Error;

use crate::core_types::UserId;

#[derive(Error, Debug)]
pub enum DuelError {
    #[error("missing caller identity")]
    Unauthenticated,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("credit account missing for user {0}")]
    AccountMissing(UserId),

    #[error("concurrent modification, retry")]
    ConcurrencyConflict,
}

impl DuelError {
    /// Shorthand for `InvalidArgument` with a formatted message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Shorthand for `NotFound` with a formatted message.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether a bounded retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict)
    }
}

pub type DuelResult<T> = Result<T, DuelError>;
