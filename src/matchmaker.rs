//! Matchmaker - queue maintenance, pair selection, match creation.
//!
//! The queue is a short-lived per-user key-value region. A scheduler rescans
//! it on a fixed cadence; joins additionally kick an immediate scan to keep
//! latency low. Pairing follows one inviolable order per pair:
//!
//! 1. mark both entries matched (in the scan's local set),
//! 2. remove both queue entries,
//! 3. check for an existing active match of the same pair,
//! 4. place the credit holds,
//! 5. pick a sequence and write the match document.
//!
//! Removing the entries before any side effect is what prevents a concurrent
//! scan from pairing one of them again. Entries that linger past the AI wait
//! threshold are promoted to a synthesized bot opponent instead.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use rand::seq::SliceRandom;
use rustc_hash::FxHashSet;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::DuelConfig;
use crate::core_types::{AI_BOT_PREFIX, MatchId, UserId};
use crate::error::{DuelError, DuelResult};
use crate::ledger::CreditLedger;
use crate::match_store::MatchStore;
use crate::models::{
    EntryTerms, Match, MatchAudit, MatchDuration, MatchResult, MatchStatus, PendingMatchSignal,
    PlayerSlot, QueueEntry,
};
use crate::question_pool::QuestionPool;
use crate::realtime::RealtimeHub;
use crate::settlement::SettlementEngine;

/// Audit note used when a stale duplicate is cancelled in favor of a newer
/// match for the same pair.
pub const DUPLICATE_MATCH_NOTE: &str = "Duplicate match superseded";
/// Audit note used by expiry garbage collection.
pub const MATCH_EXPIRED_NOTE: &str = "Match expired";

/// Queue join request, identity injected by the gateway.
#[derive(Debug, Clone)]
pub struct JoinQueueCmd {
    pub user_id: UserId,
    pub stance_type: String,
    pub persona_label: String,
    pub ping_ms: u32,
    pub entry_fee: u64,
    pub safety_belt: bool,
    pub duration: MatchDuration,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueReceipt {
    pub queue_id: UserId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanReport {
    pub paired: usize,
    pub ai_matches: usize,
    pub reused: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CleanupReport {
    pub expired_entries: usize,
    pub stale_presence: usize,
    pub expired_matches: usize,
}

pub struct Matchmaker {
    queue: DashMap<UserId, QueueEntry>,
    ledger: Arc<CreditLedger>,
    pool: Arc<QuestionPool>,
    store: Arc<MatchStore>,
    realtime: Arc<RealtimeHub>,
    settlement: Arc<SettlementEngine>,
    config: Arc<DuelConfig>,
    /// Serializes scans; a kicked scan and a scheduled scan never interleave.
    scan_gate: Mutex<()>,
}

impl Matchmaker {
    pub fn new(
        ledger: Arc<CreditLedger>,
        pool: Arc<QuestionPool>,
        store: Arc<MatchStore>,
        realtime: Arc<RealtimeHub>,
        settlement: Arc<SettlementEngine>,
        config: Arc<DuelConfig>,
    ) -> Self {
        Self {
            queue: DashMap::new(),
            ledger,
            pool,
            store,
            realtime,
            settlement,
            config,
            scan_gate: Mutex::new(()),
        }
    }

    // --------------------------------------------------------
    // Queue membership
    // --------------------------------------------------------

    /// Insert (or refresh) the caller's queue entry. Validates the stake up
    /// front so the UI can block entry on insufficient funds.
    pub fn join(&self, cmd: JoinQueueCmd) -> DuelResult<QueueReceipt> {
        if cmd.entry_fee == 0 {
            return Err(DuelError::invalid("entry_fee must be positive"));
        }
        if cmd.stance_type.trim().is_empty() {
            return Err(DuelError::invalid("stance_type must not be empty"));
        }
        if cmd.safety_belt && cmd.entry_fee < self.config.safety_belt_min_fee {
            return Err(DuelError::invalid(format!(
                "safety belt requires an entry fee of at least {}",
                self.config.safety_belt_min_fee
            )));
        }

        let safety_fee = self.config.safety_fee(cmd.safety_belt);
        let stake = cmd.entry_fee + safety_fee;
        let account = self.ledger.get_or_init(&cmd.user_id);
        if account.balance < stake {
            return Err(DuelError::InsufficientFunds {
                required: stake,
                available: account.balance,
            });
        }

        let now = Utc::now();
        let entry = QueueEntry {
            user_id: cmd.user_id.clone(),
            stance_type: cmd.stance_type,
            persona_label: cmd.persona_label,
            ping_ms: cmd.ping_ms,
            entry_fee: cmd.entry_fee,
            safety_belt: cmd.safety_belt,
            safety_fee,
            duration: cmd.duration,
            joined_at: now,
            expires_at: now + Duration::milliseconds(self.config.queue_ttl_ms),
        };
        let receipt = QueueReceipt {
            queue_id: entry.user_id.clone(),
            expires_at: entry.expires_at,
        };
        self.queue.insert(cmd.user_id.clone(), entry);
        self.realtime.heartbeat(&cmd.user_id);
        tracing::info!(user_id = %cmd.user_id, stake, "joined duel queue");
        Ok(receipt)
    }

    /// Remove the caller's entry; no-op when absent.
    pub fn leave(&self, user_id: &str) -> bool {
        let removed = self.queue.remove(user_id).is_some();
        if removed {
            tracing::info!(user_id, "left duel queue");
        }
        removed
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Fire-and-forget scan kick; join handlers call this so queue inserts
    /// never wait on pairing I/O.
    pub fn kick(self: &Arc<Self>) {
        let mm = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = mm.scan().await {
                tracing::error!(error = %e, "kicked queue scan failed");
            }
        });
    }

    // --------------------------------------------------------
    // Scanning & pairing
    // --------------------------------------------------------

    /// One matchmaking pass: pair compatible entries in join order, then
    /// promote entries past the AI wait threshold.
    pub async fn scan(&self) -> DuelResult<ScanReport> {
        let _gate = self.scan_gate.lock().await;
        let now = Utc::now();

        let mut entries: Vec<QueueEntry> = self
            .queue
            .iter()
            .filter(|e| !e.is_expired(now))
            .map(|e| e.clone())
            .collect();
        entries.sort_by_key(|e| e.joined_at);

        let mut matched: FxHashSet<UserId> = FxHashSet::default();
        let mut pairs: Vec<(QueueEntry, QueueEntry)> = Vec::new();
        for i in 0..entries.len() {
            if matched.contains(&entries[i].user_id) {
                continue;
            }
            for j in (i + 1)..entries.len() {
                if matched.contains(&entries[j].user_id) {
                    continue;
                }
                if self.compatible(&entries[i], &entries[j]) {
                    matched.insert(entries[i].user_id.clone());
                    matched.insert(entries[j].user_id.clone());
                    pairs.push((entries[i].clone(), entries[j].clone()));
                    break;
                }
            }
        }

        let mut report = ScanReport::default();
        for (a, b) in pairs {
            match self.create_pair_match(a, b).await {
                Ok(PairOutcome::Created(_)) => report.paired += 1,
                Ok(PairOutcome::Reused(_)) => report.reused += 1,
                Ok(PairOutcome::Skipped) => {}
                Err(e) => tracing::warn!(error = %e, "pair creation failed"),
            }
        }

        // AI fallback for entries that kept waiting through this pass.
        let ai_wait = Duration::milliseconds(self.config.ai_opponent_wait_ms);
        for entry in entries {
            if matched.contains(&entry.user_id) {
                continue;
            }
            if now - entry.joined_at < ai_wait {
                continue;
            }
            match self.create_ai_match(entry).await {
                Ok(Some(_)) => report.ai_matches += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "ai match creation failed"),
            }
        }

        Ok(report)
    }

    /// Compatibility predicate: opposing stances, equal duration, tight ping
    /// and fee bands.
    fn compatible(&self, x: &QueueEntry, y: &QueueEntry) -> bool {
        x.stance_type != y.stance_type
            && x.duration == y.duration
            && x.ping_ms.abs_diff(y.ping_ms) <= self.config.max_ping_diff_ms
            && x.entry_fee.abs_diff(y.entry_fee) <= self.config.max_fee_diff_units
    }

    async fn create_pair_match(&self, a: QueueEntry, b: QueueEntry) -> DuelResult<PairOutcome> {
        // Remove both queue entries before any side effect. A concurrent
        // scan that already consumed one of them wins; we restore the other.
        if self.queue.remove(&a.user_id).is_none() {
            return Ok(PairOutcome::Skipped);
        }
        if self.queue.remove(&b.user_id).is_none() {
            self.queue.insert(a.user_id.clone(), a);
            return Ok(PairOutcome::Skipped);
        }

        // A page reload can leave a stale match from a racing scan. A match
        // nobody answered in yet is superseded; one with answers is reused.
        if let Some(existing) = self
            .store
            .find_active_for_pair(&a.user_id, &b.user_id)
            .await
        {
            if existing.answers_a.is_empty() && existing.answers_b.is_empty() {
                self.settlement
                    .cancel(&existing.match_id, DUPLICATE_MATCH_NOTE)
                    .await?;
            } else {
                tracing::info!(
                    match_id = %existing.match_id,
                    "reusing in-flight match for pair"
                );
                self.announce(&existing);
                return Ok(PairOutcome::Reused(existing.match_id));
            }
        }

        let match_id = Uuid::new_v4().to_string();

        if let Err(e) = self.hold_with_retry(&a.user_id, a.total_stake(), &match_id) {
            // The losing side's entry is restored; the failing user rejoins
            // after topping up.
            tracing::warn!(user_id = %a.user_id, error = %e, "hold failed, pair aborted");
            self.queue.insert(b.user_id.clone(), b);
            return Err(e);
        }
        if let Err(e) = self.hold_with_retry(&b.user_id, b.total_stake(), &match_id) {
            tracing::warn!(user_id = %b.user_id, error = %e, "hold failed, pair aborted");
            self.ledger.release(&a.user_id, a.total_stake(), &match_id)?;
            self.queue.insert(a.user_id.clone(), a);
            return Err(e);
        }

        let sequence_id = match self.pool.pick_random(a.duration) {
            Ok(id) => id,
            Err(e) => {
                self.ledger.release(&a.user_id, a.total_stake(), &match_id)?;
                self.ledger.release(&b.user_id, b.total_stake(), &match_id)?;
                self.queue.insert(a.user_id.clone(), a);
                self.queue.insert(b.user_id.clone(), b);
                return Err(e);
            }
        };

        let hold_a = a.total_stake();
        let hold_b = b.total_stake();
        let m = build_match(&match_id, sequence_id, a, b, hold_a, hold_b, false);
        self.store.insert(m.clone());
        self.realtime.register_match(&match_id);
        self.announce(&m);
        tracing::info!(%match_id, player_a = %m.player_a.user_id, player_b = %m.player_b.user_id, "match created");
        Ok(PairOutcome::Created(match_id))
    }

    /// Promote a lingering entry to a bot match. Only the human side holds
    /// credits.
    async fn create_ai_match(&self, entry: QueueEntry) -> DuelResult<Option<MatchId>> {
        if self.queue.remove(&entry.user_id).is_none() {
            return Ok(None);
        }

        let bot = self.synthesize_opponent(&entry);
        let match_id = Uuid::new_v4().to_string();

        if let Err(e) = self.hold_with_retry(&entry.user_id, entry.total_stake(), &match_id) {
            tracing::warn!(user_id = %entry.user_id, error = %e, "hold failed, ai match aborted");
            return Err(e);
        }
        let sequence_id = match self.pool.pick_random(entry.duration) {
            Ok(id) => id,
            Err(e) => {
                self.ledger
                    .release(&entry.user_id, entry.total_stake(), &match_id)?;
                self.queue.insert(entry.user_id.clone(), entry);
                return Err(e);
            }
        };

        let hold_a = entry.total_stake();
        let bot_entry = QueueEntry {
            user_id: bot.user_id.clone(),
            stance_type: bot.stance_type.clone(),
            persona_label: bot.persona_label.clone(),
            ping_ms: bot.ping_ms,
            entry_fee: entry.entry_fee,
            safety_belt: false,
            safety_fee: 0,
            duration: entry.duration,
            joined_at: Utc::now(),
            expires_at: Utc::now(),
        };
        let m = build_match(&match_id, sequence_id, entry, bot_entry, hold_a, 0, true);
        self.store.insert(m.clone());
        self.realtime.register_match(&match_id);
        self.announce(&m);
        tracing::info!(%match_id, player = %m.player_a.user_id, bot = %m.player_b.user_id, "ai match created");
        Ok(Some(match_id))
    }

    /// A bot with a randomly selected opposing stance and a ping near the
    /// waiting user's.
    fn synthesize_opponent(&self, entry: &QueueEntry) -> PlayerSlot {
        let mut rng = rand::thread_rng();
        let stance = self
            .config
            .stance_types
            .iter()
            .filter(|s| **s != entry.stance_type)
            .collect::<Vec<_>>()
            .choose(&mut rng)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("anti_{}", entry.stance_type));
        let jitter = rng.gen_range(0..=10);
        let ping_ms = if rng.gen_bool(0.5) {
            entry.ping_ms.saturating_sub(jitter)
        } else {
            entry.ping_ms + jitter
        };
        PlayerSlot {
            user_id: format!("{AI_BOT_PREFIX}{}", Uuid::new_v4().simple()),
            stance_type: stance,
            persona_label: "AI Opponent".to_string(),
            ping_ms,
        }
    }

    fn hold_with_retry(&self, user_id: &str, amount: u64, match_id: &str) -> DuelResult<()> {
        let mut attempts = 0;
        loop {
            match self.ledger.hold(user_id, amount, match_id) {
                Ok(_) => return Ok(()),
                Err(e) if e.is_retryable() && attempts < self.config.hold_retry_limit => {
                    attempts += 1;
                    tracing::debug!(user_id, attempts, "retrying hold after conflict");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Publish the pending-match signal to both human participants.
    fn announce(&self, m: &Match) {
        for (me, opponent) in [(&m.player_a, &m.player_b), (&m.player_b, &m.player_a)] {
            if crate::core_types::is_ai_user(&me.user_id) {
                continue;
            }
            self.realtime.notify_pending(
                &me.user_id,
                PendingMatchSignal {
                    match_id: m.match_id.clone(),
                    opponent: opponent.clone(),
                    duration: m.duration,
                    is_ai_opponent: m.audit.is_ai_opponent,
                },
            );
        }
    }

    // --------------------------------------------------------
    // Cleanup
    // --------------------------------------------------------

    /// Garbage collection sweep: expired queue entries, stale presence
    /// records (best-effort disconnect hook), and over-deadline matches.
    /// Rerunning on an already-clean state is a no-op.
    pub async fn cleanup(&self) -> CleanupReport {
        let now = Utc::now();
        let mut report = CleanupReport::default();

        let expired: Vec<UserId> = self
            .queue
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.user_id.clone())
            .collect();
        for user_id in expired {
            if self.queue.remove(&user_id).is_some() {
                report.expired_entries += 1;
                tracing::info!(%user_id, "expired queue entry removed");
            }
        }

        for user_id in self.realtime.sweep_stale(self.config.presence_stale_ms, now) {
            report.stale_presence += 1;
            if self.queue.remove(&user_id).is_some() {
                tracing::info!(%user_id, "queue entry removed for stale presence");
            }
        }

        let cutoff = now - Duration::milliseconds(self.config.match_expiry_ms);
        for match_id in self.store.active_older_than(cutoff).await {
            match self.settlement.cancel(&match_id, MATCH_EXPIRED_NOTE).await {
                Ok(_) => report.expired_matches += 1,
                Err(e) => tracing::warn!(%match_id, error = %e, "expired match cancel failed"),
            }
        }

        report
    }

    // --------------------------------------------------------
    // Scheduler loops
    // --------------------------------------------------------

    /// Scheduled rescans. Runs until the process exits.
    pub async fn run_scan_loop(self: Arc<Self>) {
        let mut tick =
            tokio::time::interval(std::time::Duration::from_millis(self.config.scan_interval_ms));
        tracing::info!(
            interval_ms = self.config.scan_interval_ms,
            "matchmaking scheduler started"
        );
        loop {
            tick.tick().await;
            if let Err(e) = self.scan().await {
                tracing::error!(error = %e, "scheduled queue scan failed");
            }
        }
    }

    /// Longer-cadence cleanup sweeps.
    pub async fn run_cleanup_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(std::time::Duration::from_millis(
            self.config.cleanup_interval_ms,
        ));
        loop {
            tick.tick().await;
            let report = self.cleanup().await;
            if report.expired_entries + report.stale_presence + report.expired_matches > 0 {
                tracing::info!(?report, "cleanup sweep");
            }
        }
    }

    #[cfg(test)]
    fn backdate_entry(&self, user_id: &str, by_ms: i64) {
        if let Some(mut entry) = self.queue.get_mut(user_id) {
            entry.joined_at = entry.joined_at - Duration::milliseconds(by_ms);
        }
    }

    #[cfg(test)]
    fn expire_entry(&self, user_id: &str) {
        if let Some(mut entry) = self.queue.get_mut(user_id) {
            entry.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

enum PairOutcome {
    Created(MatchId),
    Reused(MatchId),
    Skipped,
}

#[allow(clippy::too_many_arguments)]
fn build_match(
    match_id: &str,
    sequence_id: String,
    a: QueueEntry,
    b: QueueEntry,
    hold_a: u64,
    hold_b: u64,
    is_ai_opponent: bool,
) -> Match {
    Match {
        match_id: match_id.to_string(),
        status: MatchStatus::Ready,
        duration: a.duration,
        participant_ids: [a.user_id.clone(), b.user_id.clone()],
        player_a: PlayerSlot {
            user_id: a.user_id,
            stance_type: a.stance_type,
            persona_label: a.persona_label,
            ping_ms: a.ping_ms,
        },
        player_b: PlayerSlot {
            user_id: b.user_id,
            stance_type: b.stance_type,
            persona_label: b.persona_label,
            ping_ms: b.ping_ms,
        },
        entry_a: EntryTerms {
            fee: a.entry_fee,
            safety_belt: a.safety_belt,
            safety_fee: a.safety_fee,
        },
        entry_b: EntryTerms {
            fee: b.entry_fee,
            safety_belt: b.safety_belt,
            safety_fee: b.safety_fee,
        },
        hold_a,
        hold_b,
        sequence_id,
        answers_a: Vec::new(),
        answers_b: Vec::new(),
        result: MatchResult::default(),
        audit: MatchAudit {
            version: 0,
            notes: Vec::new(),
            is_ai_opponent,
        },
        created_at: Utc::now(),
        started_at: None,
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::is_ai_user;
    use crate::models::{Difficulty, Question, QuestionChoice};
    use crate::notifier::LogNotifier;

    struct Fixture {
        mm: Arc<Matchmaker>,
        ledger: Arc<CreditLedger>,
        store: Arc<MatchStore>,
        realtime: Arc<RealtimeHub>,
    }

    fn question(id: &str) -> Question {
        let choices = (0..4)
            .map(|i| QuestionChoice {
                image_url: format!("https://img.test/{id}/{i}.png"),
                is_correct: i == 0,
            })
            .collect();
        Question {
            question_id: id.to_string(),
            stem: format!("stem {id}"),
            category: "politics".to_string(),
            difficulty: Difficulty::Easy,
            choices,
            correct_index: 0,
        }
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(CreditLedger::new(100));
        let pool = Arc::new(QuestionPool::new());
        pool.upload_question_batch((0..6).map(|i| question(&format!("q{i}"))).collect())
            .unwrap();
        pool.generate_sequences().unwrap();

        let store = Arc::new(MatchStore::new());
        let realtime = Arc::new(RealtimeHub::new());
        let settlement = Arc::new(SettlementEngine::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&realtime),
            Arc::new(LogNotifier),
            Arc::new(DuelConfig::default()),
        ));
        let mm = Arc::new(Matchmaker::new(
            Arc::clone(&ledger),
            pool,
            Arc::clone(&store),
            Arc::clone(&realtime),
            settlement,
            Arc::new(DuelConfig::default()),
        ));
        Fixture {
            mm,
            ledger,
            store,
            realtime,
        }
    }

    fn join_cmd(user: &str, stance: &str) -> JoinQueueCmd {
        JoinQueueCmd {
            user_id: user.to_string(),
            stance_type: stance.to_string(),
            persona_label: "tester".to_string(),
            ping_ms: 40,
            entry_fee: 10,
            safety_belt: false,
            duration: MatchDuration::S30,
        }
    }

    #[tokio::test]
    async fn test_join_and_pair() {
        let fx = fixture();
        fx.mm.join(join_cmd("u1", "progressive")).unwrap();
        let (_, mut rx1) = fx.realtime.subscribe_pending("u1");
        let (_, mut rx2) = fx.realtime.subscribe_pending("u2");
        fx.mm.join(join_cmd("u2", "conservative")).unwrap();

        let report = fx.mm.scan().await.unwrap();
        assert_eq!(report.paired, 1);
        assert_eq!(fx.mm.queue_len(), 0);
        assert_eq!(fx.store.len(), 1);

        // Both humans hold their stake.
        assert_eq!(fx.ledger.account("u1").unwrap().balance, 90);
        assert_eq!(fx.ledger.account("u2").unwrap().balance, 90);

        // Both got the pending-match signal; earlier join is slot A.
        let s1 = rx1.recv().await.unwrap();
        let s2 = rx2.recv().await.unwrap();
        assert_eq!(s1.match_id, s2.match_id);
        assert_eq!(s1.opponent.user_id, "u2");
        assert!(!s1.is_ai_opponent);

        // The index channel exists and starts at zero.
        assert_eq!(fx.realtime.current_index(&s1.match_id), Some(0));

        let snap = fx.store.snapshot(&s1.match_id).await.unwrap();
        assert_eq!(snap.status, MatchStatus::Ready);
        assert_eq!(snap.player_a.user_id, "u1");
        assert_eq!(snap.hold_a, 10);
        assert_eq!(snap.hold_b, 10);
    }

    #[tokio::test]
    async fn test_same_stance_never_pairs() {
        let fx = fixture();
        fx.mm.join(join_cmd("u1", "progressive")).unwrap();
        fx.mm.join(join_cmd("u2", "progressive")).unwrap();

        let report = fx.mm.scan().await.unwrap();
        assert_eq!(report.paired, 0);
        assert_eq!(fx.mm.queue_len(), 2);
    }

    #[tokio::test]
    async fn test_ping_boundary() {
        let fx = fixture();
        let mut a = join_cmd("u1", "progressive");
        a.ping_ms = 100;
        let mut b = join_cmd("u2", "conservative");
        b.ping_ms = 161; // diff 61: out of band
        fx.mm.join(a).unwrap();
        fx.mm.join(b).unwrap();
        assert_eq!(fx.mm.scan().await.unwrap().paired, 0);

        let mut c = join_cmd("u3", "conservative");
        c.ping_ms = 160; // diff 60 against u1: allowed
        fx.mm.join(c).unwrap();
        assert_eq!(fx.mm.scan().await.unwrap().paired, 1);
    }

    #[tokio::test]
    async fn test_fee_boundary() {
        let fx = fixture();
        let mut a = join_cmd("u1", "progressive");
        a.entry_fee = 10;
        let mut b = join_cmd("u2", "conservative");
        b.entry_fee = 12; // diff 2: out of band
        fx.mm.join(a).unwrap();
        fx.mm.join(b).unwrap();
        assert_eq!(fx.mm.scan().await.unwrap().paired, 0);

        let mut c = join_cmd("u3", "conservative");
        c.entry_fee = 11; // diff 1 against u1: allowed
        fx.mm.join(c).unwrap();
        assert_eq!(fx.mm.scan().await.unwrap().paired, 1);
    }

    #[tokio::test]
    async fn test_duration_must_match() {
        let fx = fixture();
        let mut b = join_cmd("u2", "conservative");
        b.duration = MatchDuration::S45;
        fx.mm.join(join_cmd("u1", "progressive")).unwrap();
        fx.mm.join(b).unwrap();
        assert_eq!(fx.mm.scan().await.unwrap().paired, 0);
    }

    #[tokio::test]
    async fn test_safety_belt_fee_threshold() {
        let fx = fixture();
        let mut cmd = join_cmd("u1", "progressive");
        cmd.safety_belt = true;
        cmd.entry_fee = 17;
        assert!(matches!(
            fx.mm.join(cmd).unwrap_err(),
            DuelError::InvalidArgument(_)
        ));

        let mut cmd = join_cmd("u1", "progressive");
        cmd.safety_belt = true;
        cmd.entry_fee = 18;
        let receipt = fx.mm.join(cmd);
        assert!(receipt.is_ok());
    }

    #[tokio::test]
    async fn test_join_requires_funds() {
        let fx = fixture();
        let mut cmd = join_cmd("whale", "progressive");
        cmd.entry_fee = 101; // initial grant is 100
        assert!(matches!(
            fx.mm.join(cmd).unwrap_err(),
            DuelError::InsufficientFunds { .. }
        ));
    }

    #[tokio::test]
    async fn test_leave_queue() {
        let fx = fixture();
        fx.mm.join(join_cmd("u1", "progressive")).unwrap();
        assert!(fx.mm.leave("u1"));
        assert!(!fx.mm.leave("u1"));
        assert_eq!(fx.mm.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_ai_fallback_after_wait() {
        let fx = fixture();
        let (_, mut rx) = fx.realtime.subscribe_pending("u1");
        fx.mm.join(join_cmd("u1", "progressive")).unwrap();

        // Fresh entry: no promotion yet.
        assert_eq!(fx.mm.scan().await.unwrap().ai_matches, 0);

        fx.mm.backdate_entry("u1", 31_000);
        let report = fx.mm.scan().await.unwrap();
        assert_eq!(report.ai_matches, 1);
        assert_eq!(fx.mm.queue_len(), 0);

        let signal = rx.recv().await.unwrap();
        assert!(signal.is_ai_opponent);
        let m = fx.store.snapshot(&signal.match_id).await.unwrap();
        assert!(m.audit.is_ai_opponent);
        assert!(is_ai_user(&m.player_b.user_id));
        assert_ne!(m.player_b.stance_type, m.player_a.stance_type);
        assert!(m.player_b.ping_ms.abs_diff(m.player_a.ping_ms) <= 10);
        // Only the human holds credits.
        assert_eq!(m.hold_a, 10);
        assert_eq!(m.hold_b, 0);
        assert_eq!(fx.ledger.account("u1").unwrap().balance, 90);
    }

    #[tokio::test]
    async fn test_duplicate_zero_answer_match_superseded() {
        let fx = fixture();
        fx.mm.join(join_cmd("u1", "progressive")).unwrap();
        fx.mm.join(join_cmd("u2", "conservative")).unwrap();
        fx.mm.scan().await.unwrap();
        let first = fx.store.find_active_for_pair("u1", "u2").await.unwrap();

        // Page reload: both rejoin while the zero-answer match lingers.
        fx.mm.join(join_cmd("u1", "progressive")).unwrap();
        fx.mm.join(join_cmd("u2", "conservative")).unwrap();
        let report = fx.mm.scan().await.unwrap();
        assert_eq!(report.paired, 1);

        let old = fx.store.snapshot(&first.match_id).await.unwrap();
        assert_eq!(old.status, MatchStatus::Cancelled);
        assert!(old.audit.notes.iter().any(|n| n == DUPLICATE_MATCH_NOTE));

        // Exactly one active match per pair; stakes held exactly once.
        let active = fx.store.find_active_for_pair("u1", "u2").await.unwrap();
        assert_ne!(active.match_id, first.match_id);
        assert_eq!(fx.ledger.account("u1").unwrap().balance, 90);
        assert_eq!(fx.ledger.account("u2").unwrap().balance, 90);
    }

    #[tokio::test]
    async fn test_duplicate_answered_match_reused() {
        let fx = fixture();
        fx.mm.join(join_cmd("u1", "progressive")).unwrap();
        fx.mm.join(join_cmd("u2", "conservative")).unwrap();
        fx.mm.scan().await.unwrap();
        let first = fx.store.find_active_for_pair("u1", "u2").await.unwrap();

        // Someone already answered: the match is live, reuse it.
        {
            let handle = fx.store.get(&first.match_id).unwrap();
            let mut m = handle.lock().await;
            m.answers_a.push(crate::models::AnswerRecord {
                question_id: "q0".to_string(),
                question_order: 0,
                answer_index: 0,
                is_correct: true,
                timestamp: Utc::now(),
                time_elapsed_ms: 900,
            });
        }

        fx.mm.join(join_cmd("u1", "progressive")).unwrap();
        fx.mm.join(join_cmd("u2", "conservative")).unwrap();
        let report = fx.mm.scan().await.unwrap();
        assert_eq!(report.paired, 0);
        assert_eq!(report.reused, 1);

        let active = fx.store.find_active_for_pair("u1", "u2").await.unwrap();
        assert_eq!(active.match_id, first.match_id);
        // No second hold was placed.
        assert_eq!(fx.ledger.account("u1").unwrap().balance, 90);
    }

    #[tokio::test]
    async fn test_hold_failure_restores_other_entry() {
        let fx = fixture();
        fx.mm.join(join_cmd("u1", "progressive")).unwrap();
        fx.mm.join(join_cmd("u2", "conservative")).unwrap();

        // u1's funds vanish between join and scan.
        fx.ledger.withdraw("u1", 95).unwrap();

        let report = fx.mm.scan().await.unwrap();
        assert_eq!(report.paired, 0);
        // u2 is back in the queue; u1 must rejoin after topping up.
        assert_eq!(fx.mm.queue_len(), 1);
        assert!(fx.mm.queue.contains_key("u2"));
        // No dangling hold on u2.
        assert_eq!(fx.ledger.account("u2").unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let fx = fixture();
        fx.mm.join(join_cmd("u1", "progressive")).unwrap();
        fx.mm.expire_entry("u1");

        let report = fx.mm.cleanup().await;
        assert_eq!(report.expired_entries, 1);
        assert_eq!(fx.mm.queue_len(), 0);

        let report = fx.mm.cleanup().await;
        assert_eq!(report.expired_entries, 0);
    }

    #[tokio::test]
    async fn test_expired_entries_skipped_by_scan() {
        let fx = fixture();
        fx.mm.join(join_cmd("u1", "progressive")).unwrap();
        fx.mm.join(join_cmd("u2", "conservative")).unwrap();
        fx.mm.expire_entry("u1");

        let report = fx.mm.scan().await.unwrap();
        assert_eq!(report.paired, 0);
    }

    #[tokio::test]
    async fn test_stale_presence_removes_queue_entry() {
        let fx = fixture();
        fx.mm.join(join_cmd("u1", "progressive")).unwrap();
        // Backdate the heartbeat written by join.
        fx.realtime.heartbeat("u1");
        fx.realtime.backdate_heartbeat("u1", 16 * 60 * 1000);

        let report = fx.mm.cleanup().await;
        assert_eq!(report.stale_presence, 1);
        assert_eq!(fx.mm.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_expired_match_garbage_collected() {
        let fx = fixture();
        fx.mm.join(join_cmd("u1", "progressive")).unwrap();
        fx.mm.join(join_cmd("u2", "conservative")).unwrap();
        fx.mm.scan().await.unwrap();

        let m = fx.store.find_active_for_pair("u1", "u2").await.unwrap();
        {
            let handle = fx.store.get(&m.match_id).unwrap();
            handle.lock().await.created_at = Utc::now() - Duration::minutes(20);
        }

        let report = fx.mm.cleanup().await;
        assert_eq!(report.expired_matches, 1);
        let snap = fx.store.snapshot(&m.match_id).await.unwrap();
        assert_eq!(snap.status, MatchStatus::Cancelled);
        // Refunded.
        assert_eq!(fx.ledger.account("u1").unwrap().balance, 100);
        assert_eq!(fx.ledger.account("u2").unwrap().balance, 100);

        // Second sweep: nothing left to collect.
        assert_eq!(fx.mm.cleanup().await.expired_matches, 0);
    }
}
