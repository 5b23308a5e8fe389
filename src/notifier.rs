//! Outbound notification seam.
//!
//! The email notifier is an external collaborator; the core only knows this
//! trait. The settlement engine fires it after a match reaches a terminal
//! state and ignores failures - notification is best-effort and never blocks
//! or reorders settlement effects.

use async_trait::async_trait;

use crate::models::Match;

#[async_trait]
pub trait SettlementNotifier: Send + Sync {
    async fn match_settled(&self, settled: &Match);

    async fn match_cancelled(&self, cancelled: &Match, reason: &str);
}

/// Default notifier: structured log lines only.
pub struct LogNotifier;

#[async_trait]
impl SettlementNotifier for LogNotifier {
    async fn match_settled(&self, settled: &Match) {
        tracing::info!(
            match_id = %settled.match_id,
            winner = ?settled.result.winner,
            score_a = settled.result.score_a,
            score_b = settled.result.score_b,
            "match settled"
        );
    }

    async fn match_cancelled(&self, cancelled: &Match, reason: &str) {
        tracing::info!(
            match_id = %cancelled.match_id,
            reason,
            "match cancelled"
        );
    }
}
