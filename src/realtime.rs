//! Real-time publication hub.
//!
//! The authoritative state lives in the transactional stores; this hub is
//! the non-transactional fast path. It carries exactly three signals:
//!
//! - the per-match [`MatchIndex`] projection (`active_matches/{match_id}`),
//!   a monotonically non-decreasing question index both clients follow,
//! - the per-user pending-match signal (`pending_match/{user_id}`),
//! - presence heartbeats (`presence/{user_id}`) used by best-effort cleanup.
//!
//! Index publication is last-writer-wins on a watch channel; that is sound
//! because writes are monotonic (the next index is only written after the
//! per-question barrier passes) and subscribers may skip to the latest value.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};

use crate::core_types::{MatchId, UserId};
use crate::models::{MatchIndex, PendingMatchSignal};

/// Pending-match subscription sender type.
pub type PendingSender = mpsc::UnboundedSender<PendingMatchSignal>;

/// Unique subscription identifier.
pub type SubscriptionId = u64;

/// Concurrent registry of real-time channels.
///
/// Supports multiple pending-match subscriptions per user (e.g., two open
/// tabs); match-index subscribers share one watch channel per match.
pub struct RealtimeHub {
    /// match_id -> index projection channel
    match_channels: DashMap<MatchId, watch::Sender<MatchIndex>>,
    /// user_id -> list of (subscription_id, sender)
    pending: DashMap<UserId, Vec<(SubscriptionId, PendingSender)>>,
    /// user_id -> last heartbeat
    presence: DashMap<UserId, DateTime<Utc>>,
    next_sub_id: AtomicU64,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self {
            match_channels: DashMap::new(),
            pending: DashMap::new(),
            presence: DashMap::new(),
            next_sub_id: AtomicU64::new(1),
        }
    }

    // --------------------------------------------------------
    // Match index projection
    // --------------------------------------------------------

    /// Create the index channel for a new match, starting at index 0.
    pub fn register_match(&self, match_id: &str) {
        let (tx, _rx) = watch::channel(MatchIndex {
            current_question_index: 0,
            last_updated: Utc::now(),
        });
        self.match_channels.insert(match_id.to_string(), tx);
    }

    /// Publish a new question index. Writes are monotonic: a stale or equal
    /// index is dropped, so replayed barrier completions cannot move the
    /// projection backwards.
    pub fn publish_index(&self, match_id: &str, index: u32) {
        let Some(tx) = self.match_channels.get(match_id) else {
            tracing::warn!(match_id, index, "index publish for unregistered match");
            return;
        };
        let advanced = tx.send_if_modified(|cur| {
            if index > cur.current_question_index {
                cur.current_question_index = index;
                cur.last_updated = Utc::now();
                true
            } else {
                false
            }
        });
        if advanced {
            tracing::debug!(match_id, index, "match index advanced");
        }
    }

    /// Subscribe to the index projection. The receiver immediately holds the
    /// latest value, so late subscribers catch up without replay.
    pub fn subscribe_match(&self, match_id: &str) -> Option<watch::Receiver<MatchIndex>> {
        self.match_channels.get(match_id).map(|tx| tx.subscribe())
    }

    /// Latest published index, if the match is registered.
    pub fn current_index(&self, match_id: &str) -> Option<u32> {
        self.match_channels
            .get(match_id)
            .map(|tx| tx.borrow().current_question_index)
    }

    /// Drop the channel once a match reaches a terminal state.
    pub fn remove_match(&self, match_id: &str) {
        self.match_channels.remove(match_id);
    }

    // --------------------------------------------------------
    // Pending-match signals
    // --------------------------------------------------------

    /// Register a pending-match subscription for a user.
    pub fn subscribe_pending(
        &self,
        user_id: &str,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<PendingMatchSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub_id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        self.pending
            .entry(user_id.to_string())
            .or_default()
            .push((sub_id, tx));
        (sub_id, rx)
    }

    /// Remove one subscription; cleans up the user entry when empty.
    pub fn unsubscribe_pending(&self, user_id: &str, sub_id: SubscriptionId) {
        if let Some(mut subs) = self.pending.get_mut(user_id) {
            subs.retain(|(id, _)| *id != sub_id);
            if subs.is_empty() {
                drop(subs);
                self.pending.remove(user_id);
            }
        }
    }

    /// Fan a pending-match signal out to all of a user's subscriptions.
    /// Dead receivers are dropped on the spot.
    pub fn notify_pending(&self, user_id: &str, signal: PendingMatchSignal) {
        if let Some(mut subs) = self.pending.get_mut(user_id) {
            subs.retain(|(_, tx)| tx.send(signal.clone()).is_ok());
            tracing::debug!(
                user_id,
                match_id = %signal.match_id,
                recipients = subs.len(),
                "pending match signal sent"
            );
        }
    }

    // --------------------------------------------------------
    // Presence
    // --------------------------------------------------------

    pub fn heartbeat(&self, user_id: &str) {
        self.presence.insert(user_id.to_string(), Utc::now());
    }

    pub fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.presence.get(user_id).map(|ts| *ts)
    }

    /// Mark a user gone immediately (disconnect hook).
    pub fn clear_presence(&self, user_id: &str) {
        self.presence.remove(user_id);
    }

    #[cfg(test)]
    pub(crate) fn backdate_heartbeat(&self, user_id: &str, by_ms: i64) {
        if let Some(mut ts) = self.presence.get_mut(user_id) {
            *ts = *ts - Duration::milliseconds(by_ms);
        }
    }

    /// Drop presence records with no heartbeat since the cutoff and return
    /// the affected users so callers can run their disconnect hooks.
    pub fn sweep_stale(&self, stale_after_ms: i64, now: DateTime<Utc>) -> Vec<UserId> {
        let cutoff = now - Duration::milliseconds(stale_after_ms);
        let stale: Vec<UserId> = self
            .presence
            .iter()
            .filter(|entry| *entry.value() < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        for user_id in &stale {
            self.presence.remove(user_id);
        }
        stale
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchDuration, PlayerSlot};

    fn signal(match_id: &str) -> PendingMatchSignal {
        PendingMatchSignal {
            match_id: match_id.to_string(),
            opponent: PlayerSlot {
                user_id: "u2".to_string(),
                stance_type: "conservative".to_string(),
                persona_label: "rival".to_string(),
                ping_ms: 30,
            },
            duration: MatchDuration::S30,
            is_ai_opponent: false,
        }
    }

    #[test]
    fn test_index_starts_at_zero_and_is_monotonic() {
        let hub = RealtimeHub::new();
        hub.register_match("m1");
        assert_eq!(hub.current_index("m1"), Some(0));

        hub.publish_index("m1", 1);
        hub.publish_index("m1", 3);
        // Stale writes are dropped
        hub.publish_index("m1", 2);
        hub.publish_index("m1", 3);
        assert_eq!(hub.current_index("m1"), Some(3));
    }

    #[test]
    fn test_subscriber_sees_latest_without_replay() {
        let hub = RealtimeHub::new();
        hub.register_match("m1");
        hub.publish_index("m1", 1);
        hub.publish_index("m1", 2);

        // Late subscriber skips straight to the latest value.
        let rx = hub.subscribe_match("m1").unwrap();
        assert_eq!(rx.borrow().current_question_index, 2);
    }

    #[test]
    fn test_unregistered_match() {
        let hub = RealtimeHub::new();
        hub.publish_index("ghost", 1);
        assert_eq!(hub.current_index("ghost"), None);
        assert!(hub.subscribe_match("ghost").is_none());
    }

    #[tokio::test]
    async fn test_pending_fanout_and_unsubscribe() {
        let hub = RealtimeHub::new();
        let (id1, mut rx1) = hub.subscribe_pending("u1");
        let (_id2, mut rx2) = hub.subscribe_pending("u1");

        hub.notify_pending("u1", signal("m1"));
        assert_eq!(rx1.recv().await.unwrap().match_id, "m1");
        assert_eq!(rx2.recv().await.unwrap().match_id, "m1");

        hub.unsubscribe_pending("u1", id1);
        hub.notify_pending("u1", signal("m2"));
        assert_eq!(rx2.recv().await.unwrap().match_id, "m2");
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn test_presence_sweep() {
        let hub = RealtimeHub::new();
        hub.heartbeat("fresh");
        hub.presence
            .insert("stale".to_string(), Utc::now() - Duration::minutes(20));

        let swept = hub.sweep_stale(900_000, Utc::now());
        assert_eq!(swept, vec!["stale".to_string()]);
        assert!(hub.last_seen("stale").is_none());
        assert!(hub.last_seen("fresh").is_some());

        // Idempotent: second sweep finds nothing
        assert!(hub.sweep_stale(900_000, Utc::now()).is_empty());
    }
}
