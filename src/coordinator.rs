//! Match coordinator - owner of per-match live state.
//!
//! Synchronizes the two clients through a single authoritative signal, the
//! current question index, while recording the complete gameplay event log
//! for settlement.
//!
//! # Per-question barrier
//! For each index `k` both players submit exactly one record - a real answer
//! or the too-slow marker (`answer_index = -1`). Only when both arrays cover
//! `k` does the coordinator publish `k + 1` on the real-time channel, which
//! is what moves both clients forward. Making "next question" a server-driven
//! event eliminates drift between browsers with different latencies.
//!
//! # Submission ordering
//! Human matches enforce strict in-order play: a submission must target the
//! next unanswered slot of the submitting player, and may not run ahead of
//! the barrier. Late network duplicates are absorbed idempotently - the
//! gameplay event is still recorded (settlement wants the full log) but the
//! answers array and scores never change. AI-opponent matches skip the
//! barrier machinery entirely; the client drives local progression and
//! proxies the bot's answers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core_types::{MatchId, QuestionId, UserId, is_ai_user};
use crate::error::{DuelError, DuelResult};
use crate::match_store::MatchStore;
use crate::models::{
    AnswerRecord, GameplayEvent, Match, MatchStatus, PlayerKey, TOO_SLOW_ANSWER_INDEX,
};
use crate::question_pool::QuestionPool;
use crate::realtime::RealtimeHub;
use crate::settlement::SettlementEngine;

/// One answer submission, as received from the gateway.
#[derive(Debug, Clone)]
pub struct SubmitAnswerCmd {
    pub match_id: MatchId,
    /// Authenticated caller.
    pub caller_id: UserId,
    /// When set, the caller proxies an answer for the bot side of its own
    /// AI match. Must carry the bot prefix.
    pub ai_user_id: Option<UserId>,
    pub question_id: QuestionId,
    pub question_order: u32,
    pub answer_index: i32,
    /// Client wall clock at submission; informational only. The server
    /// stamps the authoritative timestamp itself.
    pub client_timestamp: Option<DateTime<Utc>>,
    pub time_elapsed_ms: u64,
}

/// Result of one submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub match_id: MatchId,
    pub player: PlayerKey,
    pub question_order: u32,
    pub is_correct: bool,
    /// True when the submission was a late duplicate and changed nothing.
    pub duplicate: bool,
    pub score_a: i32,
    pub score_b: i32,
    /// Barrier index published by this submission, if it completed one.
    pub advanced_to: Option<u32>,
}

pub struct MatchCoordinator {
    store: Arc<MatchStore>,
    pool: Arc<QuestionPool>,
    realtime: Arc<RealtimeHub>,
    settlement: Arc<SettlementEngine>,
}

impl MatchCoordinator {
    pub fn new(
        store: Arc<MatchStore>,
        pool: Arc<QuestionPool>,
        realtime: Arc<RealtimeHub>,
        settlement: Arc<SettlementEngine>,
    ) -> Self {
        Self {
            store,
            pool,
            realtime,
            settlement,
        }
    }

    /// Client readiness marker: moves a ready match into play.
    pub async fn start_match(&self, match_id: &str, caller_id: &str) -> DuelResult<Match> {
        let handle = self
            .store
            .get(match_id)
            .ok_or_else(|| DuelError::not_found(format!("match {match_id}")))?;
        let mut m = handle.lock().await;
        m.player_key_of(caller_id)
            .ok_or_else(|| DuelError::invalid("caller is not a participant"))?;
        match m.status {
            MatchStatus::Ready => {
                m.status = MatchStatus::InProgress;
                m.started_at = Some(Utc::now());
                tracing::info!(match_id, caller_id, "match started");
            }
            MatchStatus::InProgress => {} // second client, already running
            _ => {
                return Err(DuelError::invalid(format!(
                    "match {match_id} is no longer startable"
                )));
            }
        }
        Ok(m.clone())
    }

    /// Record one answer submission in a single per-match transaction.
    pub async fn submit_answer(&self, cmd: SubmitAnswerCmd) -> DuelResult<SubmitOutcome> {
        if !(TOO_SLOW_ANSWER_INDEX..=3).contains(&cmd.answer_index) {
            return Err(DuelError::invalid(format!(
                "answer_index must be -1..=3, got {}",
                cmd.answer_index
            )));
        }

        // Resolve who this submission is for. A proxied AI answer must name
        // a bot id; spoofing a human id through this path is rejected.
        let player_id = match &cmd.ai_user_id {
            Some(ai_id) => {
                if !is_ai_user(ai_id) {
                    return Err(DuelError::invalid("ai_user_id must be a bot id"));
                }
                ai_id.clone()
            }
            None => cmd.caller_id.clone(),
        };

        let handle = self
            .store
            .get(&cmd.match_id)
            .ok_or_else(|| DuelError::not_found(format!("match {}", cmd.match_id)))?;
        let mut m = handle.lock().await;

        if cmd.ai_user_id.is_some() {
            if !m.audit.is_ai_opponent {
                return Err(DuelError::invalid(
                    "ai_user_id is only valid in AI-opponent matches",
                ));
            }
            if m.player_key_of(&cmd.caller_id).is_none() {
                return Err(DuelError::invalid("caller is not a participant"));
            }
        }
        let key = m
            .player_key_of(&player_id)
            .ok_or_else(|| DuelError::invalid("player is not a participant"))?;

        if !m.status.accepts_answers() {
            return Err(DuelError::invalid(format!(
                "match {} no longer accepts answers",
                cmd.match_id
            )));
        }

        // Verify the submitted question is really the sequence entry at this
        // order - defense against question spoofing.
        let sequence = self.pool.get_sequence(&m.sequence_id)?;
        let item = sequence
            .questions
            .get(cmd.question_order as usize)
            .ok_or_else(|| {
                DuelError::invalid(format!(
                    "question_order {} beyond sequence length {}",
                    cmd.question_order,
                    sequence.questions.len()
                ))
            })?;
        if item.question_id != cmd.question_id {
            return Err(DuelError::invalid(
                "question does not match the sequence at this order",
            ));
        }
        let question = self.pool.get_question(&cmd.question_id)?;

        // First submission doubles as the readiness marker.
        if m.status == MatchStatus::Ready {
            m.status = MatchStatus::InProgress;
            m.started_at = Some(Utc::now());
        }

        let is_marker = cmd.answer_index == TOO_SLOW_ANSWER_INDEX;
        let is_correct = !is_marker && cmd.answer_index == question.correct_index as i32;

        let submitted = m.answers(key).len() as u32;
        if cmd.question_order < submitted {
            // Late network duplicate: settlement wants the event, but the
            // answers array and scores stay untouched.
            let now = Utc::now();
            self.append_event(&m, &cmd, &player_id, is_correct, now);
            tracing::debug!(
                match_id = %cmd.match_id,
                %player_id,
                question_order = cmd.question_order,
                "late duplicate submission absorbed"
            );
            return Ok(SubmitOutcome {
                match_id: cmd.match_id.clone(),
                player: key,
                question_order: cmd.question_order,
                is_correct,
                duplicate: true,
                score_a: m.result.score_a,
                score_b: m.result.score_b,
                advanced_to: None,
            });
        }
        if cmd.question_order > submitted {
            return Err(DuelError::invalid(format!(
                "question_order {} skips ahead of {}",
                cmd.question_order, submitted
            )));
        }
        if !m.audit.is_ai_opponent {
            // Strict in-order play may not outrun the barrier: the invariant
            // |len(A) - len(B)| <= 1 holds because a player ahead of its
            // opponent must wait for the index to advance.
            let opponent_submitted = m.answers(key.other()).len() as u32;
            if submitted > opponent_submitted {
                return Err(DuelError::invalid(
                    "cannot answer past the current question barrier",
                ));
            }
        }

        let delta = if is_marker {
            0
        } else if is_correct {
            1
        } else {
            -2
        };
        match key {
            PlayerKey::A => m.result.score_a += delta,
            PlayerKey::B => m.result.score_b += delta,
        }

        let now = Utc::now();
        self.append_event(&m, &cmd, &player_id, is_correct, now);
        m.answers_mut(key).push(AnswerRecord {
            question_id: cmd.question_id.clone(),
            question_order: cmd.question_order,
            answer_index: cmd.answer_index,
            is_correct,
            timestamp: now,
            time_elapsed_ms: cmd.time_elapsed_ms,
        });
        m.audit.version += 1;

        // Barrier: both players covered index k, publish k + 1. AI matches
        // skip publication - the client drives local progression there.
        let k = cmd.question_order;
        let advanced_to = if !m.audit.is_ai_opponent
            && m.answers_a.len() as u32 > k
            && m.answers_b.len() as u32 > k
        {
            self.realtime.publish_index(&cmd.match_id, k + 1);
            Some(k + 1)
        } else {
            None
        };

        Ok(SubmitOutcome {
            match_id: cmd.match_id.clone(),
            player: key,
            question_order: k,
            is_correct,
            duplicate: false,
            score_a: m.result.score_a,
            score_b: m.result.score_b,
            advanced_to,
        })
    }

    /// Finalize a match: first caller wins, later calls observe the result.
    pub async fn finalize(&self, match_id: &str, caller_id: &str) -> DuelResult<Match> {
        {
            let handle = self
                .store
                .get(match_id)
                .ok_or_else(|| DuelError::not_found(format!("match {match_id}")))?;
            let m = handle.lock().await;
            if m.player_key_of(caller_id).is_none() {
                return Err(DuelError::invalid("caller is not a participant"));
            }
            // Lock released before settlement re-acquires it.
        }
        self.settlement.settle(match_id).await
    }

    /// Committed snapshot read; the client's timeout fallback.
    pub async fn snapshot(&self, match_id: &str) -> DuelResult<Match> {
        self.store
            .snapshot(match_id)
            .await
            .ok_or_else(|| DuelError::not_found(format!("match {match_id}")))
    }

    fn append_event(
        &self,
        m: &Match,
        cmd: &SubmitAnswerCmd,
        player_id: &str,
        is_correct: bool,
        now: DateTime<Utc>,
    ) {
        if let Some(client_ts) = cmd.client_timestamp {
            let skew_ms = (now - client_ts).num_milliseconds();
            tracing::trace!(match_id = %cmd.match_id, %player_id, skew_ms, "client clock skew");
        }
        self.store.append_event(
            &cmd.match_id,
            GameplayEvent {
                event_id: Uuid::new_v4().to_string(),
                question_id: cmd.question_id.clone(),
                question_order: cmd.question_order,
                player_id: player_id.to_string(),
                answer_index: cmd.answer_index,
                is_correct,
                timestamp: now,
                time_elapsed_ms: cmd.time_elapsed_ms,
                score_a_after: m.result.score_a,
                score_b_after: m.result.score_b,
            },
        );
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuelConfig;
    use crate::ledger::CreditLedger;
    use crate::models::{
        Difficulty, EntryTerms, MatchAudit, MatchDuration, MatchResult, PlayerSlot, Question,
        QuestionChoice,
    };
    use crate::notifier::LogNotifier;

    struct Fixture {
        coordinator: MatchCoordinator,
        store: Arc<MatchStore>,
        pool: Arc<QuestionPool>,
        realtime: Arc<RealtimeHub>,
        ledger: Arc<CreditLedger>,
    }

    fn question(id: &str) -> Question {
        let choices = (0..4)
            .map(|i| QuestionChoice {
                image_url: format!("https://img.test/{id}/{i}.png"),
                is_correct: i == 2,
            })
            .collect();
        Question {
            question_id: id.to_string(),
            stem: format!("stem {id}"),
            category: "politics".to_string(),
            difficulty: Difficulty::Medium,
            choices,
            correct_index: 2,
        }
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MatchStore::new());
        let pool = Arc::new(QuestionPool::new());
        let realtime = Arc::new(RealtimeHub::new());
        let ledger = Arc::new(CreditLedger::new(100));
        let settlement = Arc::new(SettlementEngine::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&realtime),
            Arc::new(LogNotifier),
            Arc::new(DuelConfig::default()),
        ));
        let coordinator = MatchCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&pool),
            Arc::clone(&realtime),
            settlement,
        );

        pool.upload_question_batch((0..8).map(|i| question(&format!("q{i}"))).collect())
            .unwrap();
        pool.generate_sequences().unwrap();

        Fixture {
            coordinator,
            store,
            pool,
            realtime,
            ledger,
        }
    }

    /// Stage a ready match referencing a generated 30s sequence, with holds
    /// mirrored into the ledger the way the matchmaker places them.
    fn stage_match(fx: &Fixture, match_id: &str, ai_opponent: bool) -> String {
        let sequence_id = fx.pool.pick_random(MatchDuration::S30).unwrap();
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
        let user_b = if ai_opponent { "ai_bot_9" } else { "u_b" };

        fx.ledger.get_or_init("u_a");
        fx.ledger.hold("u_a", 10, match_id).unwrap();
        let hold_b = if ai_opponent {
            0
        } else {
            fx.ledger.get_or_init("u_b");
            fx.ledger.hold("u_b", 10, match_id).unwrap();
            10
        };

        fx.store.insert(Match {
            match_id: match_id.to_string(),
            status: MatchStatus::Ready,
            duration: MatchDuration::S30,
            participant_ids: ["u_a".to_string(), user_b.to_string()],
            player_a: slot("u_a", "progressive"),
            player_b: slot(user_b, "conservative"),
            entry_a: terms,
            entry_b: terms,
            hold_a: 10,
            hold_b,
            sequence_id: sequence_id.clone(),
            answers_a: Vec::new(),
            answers_b: Vec::new(),
            result: MatchResult::default(),
            audit: MatchAudit {
                is_ai_opponent: ai_opponent,
                ..Default::default()
            },
            created_at: Utc::now(),
            started_at: None,
        });
        fx.realtime.register_match(match_id);
        sequence_id
    }

    fn cmd(
        fx: &Fixture,
        sequence_id: &str,
        match_id: &str,
        caller: &str,
        order: u32,
        answer_index: i32,
    ) -> SubmitAnswerCmd {
        let seq = fx.pool.get_sequence(sequence_id).unwrap();
        SubmitAnswerCmd {
            match_id: match_id.to_string(),
            caller_id: caller.to_string(),
            ai_user_id: None,
            question_id: seq.questions[order as usize].question_id.clone(),
            question_order: order,
            answer_index,
            client_timestamp: None,
            time_elapsed_ms: 1000 + order as u64 * 900,
        }
    }

    #[tokio::test]
    async fn test_in_order_submission_scores_and_advances() {
        let fx = fixture();
        let seq = stage_match(&fx, "m1", false);

        // Correct answer (+1) from A; match leaves ready on first submit.
        let out = fx
            .coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_a", 0, 2))
            .await
            .unwrap();
        assert!(out.is_correct);
        assert_eq!(out.score_a, 1);
        assert_eq!(out.advanced_to, None);
        assert_eq!(
            fx.store.snapshot("m1").await.unwrap().status,
            MatchStatus::InProgress
        );

        // Wrong answer (-2) from B completes the barrier for index 0.
        let out = fx
            .coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_b", 0, 0))
            .await
            .unwrap();
        assert!(!out.is_correct);
        assert_eq!(out.score_b, -2);
        assert_eq!(out.advanced_to, Some(1));
        assert_eq!(fx.realtime.current_index("m1"), Some(1));
    }

    #[tokio::test]
    async fn test_too_slow_marker_scores_zero_and_advances() {
        let fx = fixture();
        let seq = stage_match(&fx, "m1", false);

        fx.coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_a", 0, 2))
            .await
            .unwrap();
        let out = fx
            .coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_b", 0, TOO_SLOW_ANSWER_INDEX))
            .await
            .unwrap();
        assert!(!out.is_correct);
        assert_eq!(out.score_b, 0);
        assert_eq!(out.advanced_to, Some(1));
    }

    #[tokio::test]
    async fn test_late_duplicate_is_absorbed() {
        let fx = fixture();
        let seq = stage_match(&fx, "m1", false);

        fx.coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_a", 0, 2))
            .await
            .unwrap();
        fx.coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_b", 0, 2))
            .await
            .unwrap();

        // Same (player, order) again: event recorded, nothing else moves.
        let out = fx
            .coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_a", 0, 2))
            .await
            .unwrap();
        assert!(out.duplicate);
        assert_eq!(out.advanced_to, None);

        let snap = fx.store.snapshot("m1").await.unwrap();
        assert_eq!(snap.answers_a.len(), 1);
        assert_eq!(snap.result.score_a, 1);
        assert_eq!(fx.store.events("m1").len(), 3);
    }

    #[tokio::test]
    async fn test_skip_ahead_rejected() {
        let fx = fixture();
        let seq = stage_match(&fx, "m1", false);

        // Jumping straight to order 1 with nothing submitted.
        let err = fx
            .coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_a", 1, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, DuelError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_cannot_outrun_barrier() {
        let fx = fixture();
        let seq = stage_match(&fx, "m1", false);

        fx.coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_a", 0, 2))
            .await
            .unwrap();
        // A's next in-order submission still must wait for B.
        let err = fx
            .coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_a", 1, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, DuelError::InvalidArgument(_)));

        // Once B covers index 0, A's order-1 submission is accepted.
        fx.coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_b", 0, 2))
            .await
            .unwrap();
        fx.coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_a", 1, 2))
            .await
            .unwrap();

        let snap = fx.store.snapshot("m1").await.unwrap();
        assert_eq!(snap.answers_a.len(), 2);
        assert_eq!(snap.answers_b.len(), 1);
    }

    #[tokio::test]
    async fn test_question_spoofing_rejected() {
        let fx = fixture();
        let seq = stage_match(&fx, "m1", false);

        let mut bad = cmd(&fx, &seq, "m1", "u_a", 0, 2);
        bad.question_id = "q_not_in_sequence".to_string();
        let err = fx.coordinator.submit_answer(bad).await.unwrap_err();
        assert!(matches!(err, DuelError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_non_participant_rejected() {
        let fx = fixture();
        let seq = stage_match(&fx, "m1", false);

        let err = fx
            .coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "intruder", 0, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, DuelError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_answer_index_range() {
        let fx = fixture();
        let seq = stage_match(&fx, "m1", false);

        let mut bad = cmd(&fx, &seq, "m1", "u_a", 0, 2);
        bad.answer_index = 4;
        assert!(fx.coordinator.submit_answer(bad).await.is_err());

        let mut bad = cmd(&fx, &seq, "m1", "u_a", 0, 2);
        bad.answer_index = -2;
        assert!(fx.coordinator.submit_answer(bad).await.is_err());
    }

    #[tokio::test]
    async fn test_ai_proxy_flow() {
        let fx = fixture();
        let seq = stage_match(&fx, "m_ai", true);

        // The human proxies the bot's answer through ai_user_id.
        let mut proxied = cmd(&fx, &seq, "m_ai", "u_a", 0, 0);
        proxied.ai_user_id = Some("ai_bot_9".to_string());
        let out = fx.coordinator.submit_answer(proxied).await.unwrap();
        assert_eq!(out.player, PlayerKey::B);
        assert_eq!(out.score_b, -2);

        // The human plays its own slot without waiting on any barrier, and
        // no index is ever published for AI matches.
        fx.coordinator
            .submit_answer(cmd(&fx, &seq, "m_ai", "u_a", 0, 2))
            .await
            .unwrap();
        let out = fx
            .coordinator
            .submit_answer(cmd(&fx, &seq, "m_ai", "u_a", 1, 2))
            .await
            .unwrap();
        assert_eq!(out.advanced_to, None);
        assert_eq!(fx.realtime.current_index("m_ai"), Some(0));
    }

    #[tokio::test]
    async fn test_ai_proxy_requires_bot_id() {
        let fx = fixture();
        let seq = stage_match(&fx, "m_ai", true);

        let mut spoofed = cmd(&fx, &seq, "m_ai", "u_a", 0, 2);
        spoofed.ai_user_id = Some("u_b".to_string());
        let err = fx.coordinator.submit_answer(spoofed).await.unwrap_err();
        assert!(matches!(err, DuelError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_ai_proxy_rejected_in_human_match() {
        let fx = fixture();
        let seq = stage_match(&fx, "m1", false);

        let mut proxied = cmd(&fx, &seq, "m1", "u_a", 0, 2);
        proxied.ai_user_id = Some("ai_bot_9".to_string());
        let err = fx.coordinator.submit_answer(proxied).await.unwrap_err();
        assert!(matches!(err, DuelError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_finalize_and_reject_after_settling() {
        let fx = fixture();
        let seq = stage_match(&fx, "m1", false);

        fx.coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_a", 0, 2))
            .await
            .unwrap();
        fx.coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_b", 0, TOO_SLOW_ANSWER_INDEX))
            .await
            .unwrap();

        assert!(matches!(
            fx.coordinator.finalize("m1", "intruder").await.unwrap_err(),
            DuelError::InvalidArgument(_)
        ));

        let settled = fx.coordinator.finalize("m1", "u_a").await.unwrap();
        assert_eq!(settled.status, MatchStatus::Finished);

        // Terminal match no longer accepts answers.
        let err = fx
            .coordinator
            .submit_answer(cmd(&fx, &seq, "m1", "u_a", 1, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, DuelError::InvalidArgument(_)));

        // Double finalize observes the same terminal state.
        let again = fx.coordinator.finalize("m1", "u_b").await.unwrap();
        assert_eq!(again.status, MatchStatus::Finished);
        assert_eq!(again.result.winner, settled.result.winner);
    }

    #[tokio::test]
    async fn test_start_match_marker() {
        let fx = fixture();
        stage_match(&fx, "m1", false);

        let started = fx.coordinator.start_match("m1", "u_a").await.unwrap();
        assert_eq!(started.status, MatchStatus::InProgress);
        assert!(started.started_at.is_some());

        // Second client's marker is a no-op.
        let again = fx.coordinator.start_match("m1", "u_b").await.unwrap();
        assert_eq!(again.status, MatchStatus::InProgress);

        assert!(fx.coordinator.start_match("m1", "intruder").await.is_err());
    }
}
