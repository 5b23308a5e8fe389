//! Settlement engine - the authoritative replay of a match.
//!
//! Settlement never trusts the running score snapshots on the match
//! document: it recomputes both scores from the append-only gameplay event
//! log, validates the log with reaction-time heuristics, and only then
//! applies credit effects. Anti-cheat prefers false negatives over false
//! positives - a failed validation voids the match and refunds both sides
//! rather than punishing anyone.
//!
//! # Payout policy
//! - victory_reward = fee_A + fee_B, system-issued.
//! - Winner: full hold released, then a reward tops the total up to the
//!   victory reward. The winner's safety-belt fee is therefore retained,
//!   never refunded.
//! - Loser: loss = ceil(fee/2) with a safety belt, the whole fee without.
//!   The unlost entry portion of the hold is released; the loss is recorded
//!   with a deduct (the balance already moved at hold time); the belt fee is
//!   retained.
//! - Both retained belt fees accrue to the monthly platform revenue bucket
//!   on non-draw outcomes; a draw releases both holds in full.
//! - AI participants hold nothing and are skipped throughout.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::config::DuelConfig;
use crate::core_types::is_ai_user;
use crate::error::{DuelError, DuelResult};
use crate::ledger::CreditLedger;
use crate::match_store::MatchStore;
use crate::models::{GameplayEvent, Match, MatchStatus, MatchWinner, PlayerKey};
use crate::notifier::SettlementNotifier;
use crate::realtime::RealtimeHub;

/// Audit note written when the reaction-time heuristic fires.
pub const ANTICHEAT_SPEED_NOTE: &str = "Anti-cheat: Suspicious answer speed";
/// Audit note written when the event log is not in timestamp order.
pub const ANTICHEAT_ORDER_NOTE: &str = "Anti-cheat: Event log out of order";

// ============================================================
// PLATFORM REVENUE
// ============================================================

/// Monthly platform revenue accounting, keyed by `YYYY-MM`.
#[derive(Debug, Clone, Serialize)]
pub struct RevenueBucket {
    pub period: String,
    pub matches: u64,
    pub safety_fees_collected: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================
// ENGINE
// ============================================================

pub struct SettlementEngine {
    store: Arc<MatchStore>,
    ledger: Arc<CreditLedger>,
    realtime: Arc<RealtimeHub>,
    notifier: Arc<dyn SettlementNotifier>,
    revenue: DashMap<String, RevenueBucket>,
    config: Arc<DuelConfig>,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<MatchStore>,
        ledger: Arc<CreditLedger>,
        realtime: Arc<RealtimeHub>,
        notifier: Arc<dyn SettlementNotifier>,
        config: Arc<DuelConfig>,
    ) -> Self {
        Self {
            store,
            ledger,
            realtime,
            notifier,
            revenue: DashMap::new(),
            config,
        }
    }

    /// Settle a match from its event log. Safe to invoke repeatedly: once
    /// the status has left {ready, in_progress}, later calls observe the
    /// terminal (or settling) state and change nothing.
    pub async fn settle(&self, match_id: &str) -> DuelResult<Match> {
        let handle = self
            .store
            .get(match_id)
            .ok_or_else(|| DuelError::not_found(format!("match {match_id}")))?;
        let mut m = handle.lock().await;

        if !m.status.accepts_answers() {
            // Already settling, finished, or cancelled - observable effects
            // happen exactly once.
            return Ok(m.clone());
        }
        m.status = MatchStatus::Settling;

        let events = self.store.events(match_id);
        let replay = first_submission_per_slot(&events);

        // Reaction-time analysis runs only when both players are human.
        if !m.audit.is_ai_opponent {
            if let Some(note) = detect_violation(&replay, &self.config) {
                tracing::warn!(match_id, note, "anti-cheat violation, cancelling");
                return self.cancel_locked(&mut m, note).await;
            }
        }

        let (score_a, score_b) = replay_scores(&m, &replay);
        let winner = match score_a.cmp(&score_b) {
            std::cmp::Ordering::Greater => MatchWinner::A,
            std::cmp::Ordering::Less => MatchWinner::B,
            std::cmp::Ordering::Equal => MatchWinner::Draw,
        };

        let victory_reward = m.entry_a.fee + m.entry_b.fee;
        let mut deductions = (0u64, 0u64);
        match winner {
            MatchWinner::Draw => {
                for key in [PlayerKey::A, PlayerKey::B] {
                    self.release_full_hold(&m, key)?;
                }
            }
            MatchWinner::A | MatchWinner::B => {
                let w_key = if winner == MatchWinner::A {
                    PlayerKey::A
                } else {
                    PlayerKey::B
                };
                self.pay_winner(&m, w_key, victory_reward)?;
                let loss = self.charge_loser(&m, w_key.other())?;
                match w_key.other() {
                    PlayerKey::A => deductions.0 = loss,
                    PlayerKey::B => deductions.1 = loss,
                }
            }
        }

        let now = Utc::now();
        let safety_fees = if winner == MatchWinner::Draw {
            0
        } else {
            m.entry_a.safety_fee + m.entry_b.safety_fee
        };
        self.accrue_revenue(&period_of(now), safety_fees);

        m.result.winner = Some(winner);
        m.result.score_a = score_a;
        m.result.score_b = score_b;
        m.result.victory_reward = victory_reward;
        m.result.deduction_a = deductions.0;
        m.result.deduction_b = deductions.1;
        m.result.settled_at = Some(now);
        m.status = MatchStatus::Finished;
        m.note("settled");

        self.realtime.remove_match(match_id);
        self.notifier.match_settled(&m).await;
        tracing::info!(
            match_id,
            ?winner,
            score_a,
            score_b,
            victory_reward,
            "match settled"
        );
        Ok(m.clone())
    }

    /// Void a match and make both sides whole. Used by anti-cheat failures,
    /// the matchmaker's duplicate cleanup, and expiry garbage collection.
    pub async fn cancel(&self, match_id: &str, reason: &str) -> DuelResult<Match> {
        let handle = self
            .store
            .get(match_id)
            .ok_or_else(|| DuelError::not_found(format!("match {match_id}")))?;
        let mut m = handle.lock().await;
        if m.status.is_terminal() {
            return Ok(m.clone());
        }
        self.cancel_locked(&mut m, reason).await
    }

    /// Cancellation body, invoked with the match lock held.
    async fn cancel_locked(&self, m: &mut Match, reason: &str) -> DuelResult<Match> {
        for key in [PlayerKey::A, PlayerKey::B] {
            self.release_full_hold(m, key)?;
        }
        m.status = MatchStatus::Cancelled;
        m.note(reason.to_string());
        self.realtime.remove_match(&m.match_id);
        self.notifier.match_cancelled(m, reason).await;
        tracing::info!(match_id = %m.match_id, reason, "match cancelled with refund");
        Ok(m.clone())
    }

    /// Monthly bucket snapshot.
    pub fn revenue_bucket(&self, period: &str) -> Option<RevenueBucket> {
        self.revenue.get(period).map(|b| b.clone())
    }

    // --------------------------------------------------------
    // Credit effects
    // --------------------------------------------------------

    fn release_full_hold(&self, m: &Match, key: PlayerKey) -> DuelResult<()> {
        let user_id = &m.slot(key).user_id;
        let hold = m.hold(key);
        if hold == 0 || is_ai_user(user_id) {
            return Ok(());
        }
        self.ledger.release(user_id, hold, &m.match_id)?;
        Ok(())
    }

    fn pay_winner(&self, m: &Match, key: PlayerKey, victory_reward: u64) -> DuelResult<()> {
        let user_id = &m.slot(key).user_id;
        if is_ai_user(user_id) {
            return Ok(());
        }
        let hold = m.hold(key);
        if hold > 0 {
            self.ledger.release(user_id, hold, &m.match_id)?;
        }
        let extra = victory_reward.saturating_sub(hold);
        if extra > 0 {
            self.ledger.reward(user_id, extra, &m.match_id)?;
        }
        Ok(())
    }

    /// Returns the recorded loss.
    fn charge_loser(&self, m: &Match, key: PlayerKey) -> DuelResult<u64> {
        let user_id = &m.slot(key).user_id;
        if is_ai_user(user_id) {
            return Ok(0);
        }
        let entry = m.entry(key);
        let loss = if entry.safety_belt {
            entry.fee.div_ceil(2)
        } else {
            entry.fee
        };
        // The unlost entry portion goes back; loss and belt fee stay out.
        let refund = entry.fee - loss;
        if refund > 0 {
            self.ledger.release(user_id, refund, &m.match_id)?;
        }
        if loss > 0 {
            self.ledger
                .deduct(user_id, loss, &m.match_id, "match lost")?;
        }
        Ok(loss)
    }

    fn accrue_revenue(&self, period: &str, safety_fees: u64) {
        let now = Utc::now();
        let mut bucket = self
            .revenue
            .entry(period.to_string())
            .or_insert_with(|| RevenueBucket {
                period: period.to_string(),
                matches: 0,
                safety_fees_collected: 0,
                created_at: now,
                updated_at: now,
            });
        bucket.matches += 1;
        bucket.safety_fees_collected += safety_fees;
        bucket.updated_at = now;
    }
}

/// `YYYY-MM` period key for a settlement instant.
pub fn period_of(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

// ============================================================
// EVENT REPLAY
// ============================================================

/// Keep only the first event per (player, question_order). Reconnecting
/// clients may resubmit past answers, which records extra events without
/// touching the answers array; those extras count neither toward scores nor
/// toward the reaction-time ratio.
fn first_submission_per_slot(events: &[GameplayEvent]) -> Vec<&GameplayEvent> {
    let mut seen: FxHashSet<(&str, u32)> = FxHashSet::default();
    events
        .iter()
        .filter(|e| seen.insert((e.player_id.as_str(), e.question_order)))
        .collect()
}

/// Deterministic score recomputation: too-slow markers contribute nothing,
/// real answers score +1 correct / -2 wrong.
fn replay_scores(m: &Match, replay: &[&GameplayEvent]) -> (i32, i32) {
    let mut score_a = 0i32;
    let mut score_b = 0i32;
    for event in replay {
        if event.is_too_slow() {
            continue;
        }
        let delta = if event.is_correct { 1 } else { -2 };
        match m.player_key_of(&event.player_id) {
            Some(PlayerKey::A) => score_a += delta,
            Some(PlayerKey::B) => score_b += delta,
            None => {
                tracing::warn!(
                    match_id = %m.match_id,
                    player_id = %event.player_id,
                    "event from non-participant skipped in replay"
                );
            }
        }
    }
    (score_a, score_b)
}

/// Reaction-time heuristics over the deduplicated replay, in commit order.
/// Returns the audit note of the first violation found.
fn detect_violation(replay: &[&GameplayEvent], config: &DuelConfig) -> Option<&'static str> {
    // Server timestamps must be non-decreasing in commit order.
    for pair in replay.windows(2) {
        if pair[1].timestamp < pair[0].timestamp {
            return Some(ANTICHEAT_ORDER_NOTE);
        }
    }

    if replay.is_empty() {
        return None;
    }

    // Correct answers landing under the human reaction floor, measured from
    // the previous event by either player.
    let mut too_fast: FxHashMap<&str, usize> = FxHashMap::default();
    for pair in replay.windows(2) {
        let (prev, event) = (pair[0], pair[1]);
        if event.is_too_slow() || !event.is_correct {
            continue;
        }
        let gap_ms = (event.timestamp - prev.timestamp).num_milliseconds();
        if gap_ms < config.min_human_reaction_ms {
            *too_fast.entry(event.player_id.as_str()).or_insert(0) += 1;
        }
    }

    let total = replay.len() as f64;
    for (player, count) in too_fast {
        let ratio = count as f64 / total;
        if ratio > config.too_fast_ratio_threshold {
            tracing::warn!(player, count, total, ratio, "too-fast-correct ratio exceeded");
            return Some(ANTICHEAT_SPEED_NOTE);
        }
    }
    None
}

// ============================================================
// TESTS
// ============================================================
