//! Match document store.
//!
//! Each match is a single-writer region: one async mutex per document
//! serializes every mutation (answer submissions, settlement, cancellation),
//! while readers clone committed snapshots. Gameplay events live in a
//! sibling append-only log per match; appends happen under the match lock,
//! so the log order is the commit order.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::core_types::MatchId;
use crate::models::{GameplayEvent, Match, MatchStatus};

/// Shared handle to one match document.
pub type MatchHandle = Arc<Mutex<Match>>;

#[derive(Default)]
pub struct MatchStore {
    matches: DashMap<MatchId, MatchHandle>,
    events: DashMap<MatchId, Arc<RwLock<Vec<GameplayEvent>>>>,
}

impl MatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created match and its empty event log.
    pub fn insert(&self, m: Match) -> MatchHandle {
        let match_id = m.match_id.clone();
        let handle: MatchHandle = Arc::new(Mutex::new(m));
        self.matches.insert(match_id.clone(), Arc::clone(&handle));
        self.events
            .insert(match_id, Arc::new(RwLock::new(Vec::new())));
        handle
    }

    pub fn get(&self, match_id: &str) -> Option<MatchHandle> {
        self.matches.get(match_id).map(|h| Arc::clone(&h))
    }

    /// Committed snapshot of one match.
    pub async fn snapshot(&self, match_id: &str) -> Option<Match> {
        let handle = self.get(match_id)?;
        let guard = handle.lock().await;
        Some(guard.clone())
    }

    /// Append one gameplay event. Callers must hold the match lock so the
    /// log order equals the commit order.
    pub fn append_event(&self, match_id: &str, event: GameplayEvent) {
        if let Some(log) = self.events.get(match_id) {
            log.write().expect("event log poisoned").push(event);
        } else {
            tracing::warn!(match_id, "event append for unknown match");
        }
    }

    /// The full event log in commit order.
    pub fn events(&self, match_id: &str) -> Vec<GameplayEvent> {
        self.events
            .get(match_id)
            .map(|log| log.read().expect("event log poisoned").clone())
            .unwrap_or_default()
    }

    /// Find a non-terminal match containing exactly this unordered pair of
    /// participants. Used by the matchmaker's anti-duplicate check.
    pub async fn find_active_for_pair(&self, user_a: &str, user_b: &str) -> Option<Match> {
        let handles: Vec<MatchHandle> = self
            .matches
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handle in handles {
            let guard = handle.lock().await;
            if matches!(guard.status, MatchStatus::Ready | MatchStatus::InProgress) {
                let ids = &guard.participant_ids;
                let is_pair = (ids[0] == user_a && ids[1] == user_b)
                    || (ids[0] == user_b && ids[1] == user_a);
                if is_pair {
                    return Some(guard.clone());
                }
            }
        }
        None
    }

    /// Non-terminal matches created before the cutoff, for garbage
    /// collection.
    pub async fn active_older_than(&self, cutoff: DateTime<Utc>) -> Vec<MatchId> {
        let handles: Vec<MatchHandle> = self
            .matches
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut expired = Vec::new();
        for handle in handles {
            let guard = handle.lock().await;
            if !guard.status.is_terminal() && guard.created_at < cutoff {
                expired.push(guard.match_id.clone());
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        EntryTerms, MatchAudit, MatchDuration, MatchResult, PlayerSlot,
    };

    pub(crate) fn test_match(match_id: &str, user_a: &str, user_b: &str) -> Match {
        let slot = |user: &str, stance: &str| PlayerSlot {
            user_id: user.to_string(),
            stance_type: stance.to_string(),
            persona_label: "tester".to_string(),
            ping_ms: 40,
        };
        let terms = EntryTerms {
            fee: 10,
            safety_belt: false,
            safety_fee: 0,
        };
        Match {
            match_id: match_id.to_string(),
            status: MatchStatus::Ready,
            duration: MatchDuration::S30,
            participant_ids: [user_a.to_string(), user_b.to_string()],
            player_a: slot(user_a, "progressive"),
            player_b: slot(user_b, "conservative"),
            entry_a: terms,
            entry_b: terms,
            hold_a: 10,
            hold_b: 10,
            sequence_id: "seq".to_string(),
            answers_a: Vec::new(),
            answers_b: Vec::new(),
            result: MatchResult::default(),
            audit: MatchAudit::default(),
            created_at: Utc::now(),
            started_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_snapshot() {
        let store = MatchStore::new();
        store.insert(test_match("m1", "u1", "u2"));

        let snap = store.snapshot("m1").await.unwrap();
        assert_eq!(snap.match_id, "m1");
        assert!(store.snapshot("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_find_active_for_pair_unordered() {
        let store = MatchStore::new();
        store.insert(test_match("m1", "u1", "u2"));

        assert!(store.find_active_for_pair("u1", "u2").await.is_some());
        assert!(store.find_active_for_pair("u2", "u1").await.is_some());
        assert!(store.find_active_for_pair("u1", "u3").await.is_none());
    }

    #[tokio::test]
    async fn test_find_active_skips_terminal() {
        let store = MatchStore::new();
        let handle = store.insert(test_match("m1", "u1", "u2"));
        handle.lock().await.status = MatchStatus::Cancelled;

        assert!(store.find_active_for_pair("u1", "u2").await.is_none());
    }

    #[tokio::test]
    async fn test_active_older_than() {
        let store = MatchStore::new();
        let handle = store.insert(test_match("old", "u1", "u2"));
        handle.lock().await.created_at = Utc::now() - chrono::Duration::minutes(20);
        store.insert(test_match("fresh", "u3", "u4"));

        let cutoff = Utc::now() - chrono::Duration::minutes(15);
        let expired = store.active_older_than(cutoff).await;
        assert_eq!(expired, vec!["old".to_string()]);
    }
}
