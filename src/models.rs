//! Domain model: questions, sequences, queue entries, matches, events.
//!
//! These are the documents the components own and exchange. Ownership is
//! strict: the matchmaker mutates queue entries, the coordinator mutates
//! match state and gameplay events, the ledger owns credit accounts. Types
//! here are plain data; all behavior lives in the owning component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::core_types::{EventId, MatchId, QuestionId, SequenceId, UserId, is_ai_user};

/// Sentinel answer index for a too-slow submission.
///
/// Both players always submit one record per question; a client that learned
/// it was beaten to the punch forfeits with this marker so the per-question
/// barrier can advance without a separate channel.
pub const TOO_SLOW_ANSWER_INDEX: i32 = -1;

/// Number of image choices per question, with stable indices `0..=3`.
pub const CHOICES_PER_QUESTION: usize = 4;

// ============================================================
// QUESTIONS & SEQUENCES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "EASY",
            Self::Medium => "MEDIUM",
            Self::Hard => "HARD",
        }
    }
}

/// One of the four image choices of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QuestionChoice {
    pub image_url: String,
    pub is_correct: bool,
}

/// An immutable picture-trivia question.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Question {
    pub question_id: QuestionId,
    pub stem: String,
    pub category: String,
    pub difficulty: Difficulty,
    /// Exactly four choices; indices are stable and wire-visible.
    pub choices: Vec<QuestionChoice>,
    pub correct_index: u8,
}

/// Difficulty curve of a pre-assembled sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SequenceStrategy {
    Flat,
    Ascending,
    Descending,
}

impl SequenceStrategy {
    pub const ALL: [SequenceStrategy; 3] = [
        SequenceStrategy::Flat,
        SequenceStrategy::Ascending,
        SequenceStrategy::Descending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "FLAT",
            Self::Ascending => "ASCENDING",
            Self::Descending => "DESCENDING",
        }
    }

    /// Difficulty mix (easy, medium, hard) in percent.
    pub fn mix(&self) -> (u32, u32, u32) {
        match self {
            Self::Flat => (30, 40, 30),
            Self::Ascending => (40, 40, 20),
            Self::Descending => (20, 40, 40),
        }
    }
}

/// Match length. Also fixes the pre-assembled sequence length, which is a
/// buffer beyond the maximum answerable count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum MatchDuration {
    S30,
    S45,
}

impl MatchDuration {
    pub const ALL: [MatchDuration; 2] = [MatchDuration::S30, MatchDuration::S45];

    #[inline]
    pub fn secs(&self) -> u32 {
        match self {
            Self::S30 => 30,
            Self::S45 => 45,
        }
    }

    /// Pre-assembled sequence length for this duration.
    #[inline]
    pub fn sequence_len(&self) -> usize {
        match self {
            Self::S30 => 40,
            Self::S45 => 60,
        }
    }
}

impl TryFrom<u32> for MatchDuration {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            30 => Ok(Self::S30),
            45 => Ok(Self::S45),
            other => Err(format!("duration must be 30 or 45, got {other}")),
        }
    }
}

impl From<MatchDuration> for u32 {
    fn from(value: MatchDuration) -> Self {
        value.secs()
    }
}

/// One slot of a pre-assembled sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceItem {
    pub question_id: QuestionId,
    pub order: u32,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequenceMetadata {
    pub easy_count: u32,
    pub medium_count: u32,
    pub hard_count: u32,
    /// Repeats within a sequence are permitted so the target length is
    /// always reachable from a small pool.
    pub allows_repeats: bool,
}

/// A pre-assembled, immutable ordered list of question references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSequence {
    pub sequence_id: SequenceId,
    pub duration: MatchDuration,
    pub strategy: SequenceStrategy,
    pub questions: Vec<SequenceItem>,
    pub metadata: SequenceMetadata,
    pub created_at: DateTime<Utc>,
}

// ============================================================
// MATCHMAKING QUEUE
// ============================================================

/// A live matchmaking queue entry, keyed by user id.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub user_id: UserId,
    pub stance_type: String,
    pub persona_label: String,
    pub ping_ms: u32,
    pub entry_fee: u64,
    pub safety_belt: bool,
    pub safety_fee: u64,
    pub duration: MatchDuration,
    pub joined_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Total units the ledger must hold for this entry.
    #[inline]
    pub fn total_stake(&self) -> u64 {
        self.entry_fee + self.safety_fee
    }

    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ============================================================
// MATCH
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Ready,
    InProgress,
    Settling,
    Finished,
    Cancelled,
}

impl MatchStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }

    /// Whether answer submissions are still accepted.
    #[inline]
    pub fn accepts_answers(&self) -> bool {
        matches!(self, Self::Ready | Self::InProgress)
    }
}

/// The two participant slots of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlayerKey {
    A,
    B,
}

impl PlayerKey {
    #[inline]
    pub fn other(&self) -> PlayerKey {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchWinner {
    A,
    B,
    Draw,
}

/// Identity and connection profile of one player slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSlot {
    pub user_id: UserId,
    pub stance_type: String,
    pub persona_label: String,
    pub ping_ms: u32,
}

/// Stake terms one player entered with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EntryTerms {
    pub fee: u64,
    pub safety_belt: bool,
    pub safety_fee: u64,
}

impl EntryTerms {
    /// Units the ledger holds for these terms.
    #[inline]
    pub fn stake(&self) -> u64 {
        self.fee + self.safety_fee
    }
}

/// One per-question submission recorded in a player's answer array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    pub question_order: u32,
    /// `0..=3` for a real answer, `-1` for the too-slow marker.
    pub answer_index: i32,
    pub is_correct: bool,
    pub timestamp: DateTime<Utc>,
    pub time_elapsed_ms: u64,
}

impl AnswerRecord {
    #[inline]
    pub fn is_too_slow(&self) -> bool {
        self.answer_index == TOO_SLOW_ANSWER_INDEX
    }
}

/// Settlement outcome, populated when the match reaches a terminal state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchResult {
    pub winner: Option<MatchWinner>,
    pub score_a: i32,
    pub score_b: i32,
    pub victory_reward: u64,
    pub deduction_a: u64,
    pub deduction_b: u64,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Audit trail kept on the match document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchAudit {
    pub version: u32,
    pub notes: Vec<String>,
    pub is_ai_opponent: bool,
}

/// The per-match live state document.
///
/// Single-writer region: all mutations go through the coordinator (and the
/// settlement engine it invokes) under the per-match lock.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub match_id: MatchId,
    pub status: MatchStatus,
    pub duration: MatchDuration,
    pub participant_ids: [UserId; 2],
    pub player_a: PlayerSlot,
    pub player_b: PlayerSlot,
    pub entry_a: EntryTerms,
    pub entry_b: EntryTerms,
    /// Units currently held in the ledger per player; zero for AI slots.
    pub hold_a: u64,
    pub hold_b: u64,
    pub sequence_id: SequenceId,
    pub answers_a: Vec<AnswerRecord>,
    pub answers_b: Vec<AnswerRecord>,
    pub result: MatchResult,
    pub audit: MatchAudit,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl Match {
    /// Which slot a user occupies, if any.
    pub fn player_key_of(&self, user_id: &str) -> Option<PlayerKey> {
        if self.player_a.user_id == user_id {
            Some(PlayerKey::A)
        } else if self.player_b.user_id == user_id {
            Some(PlayerKey::B)
        } else {
            None
        }
    }

    pub fn slot(&self, key: PlayerKey) -> &PlayerSlot {
        match key {
            PlayerKey::A => &self.player_a,
            PlayerKey::B => &self.player_b,
        }
    }

    pub fn entry(&self, key: PlayerKey) -> &EntryTerms {
        match key {
            PlayerKey::A => &self.entry_a,
            PlayerKey::B => &self.entry_b,
        }
    }

    pub fn hold(&self, key: PlayerKey) -> u64 {
        match key {
            PlayerKey::A => self.hold_a,
            PlayerKey::B => self.hold_b,
        }
    }

    pub fn answers(&self, key: PlayerKey) -> &Vec<AnswerRecord> {
        match key {
            PlayerKey::A => &self.answers_a,
            PlayerKey::B => &self.answers_b,
        }
    }

    pub fn answers_mut(&mut self, key: PlayerKey) -> &mut Vec<AnswerRecord> {
        match key {
            PlayerKey::A => &mut self.answers_a,
            PlayerKey::B => &mut self.answers_b,
        }
    }

    /// Whether the given user id is the synthesized AI side of this match.
    pub fn is_ai_slot(&self, user_id: &str) -> bool {
        self.audit.is_ai_opponent && is_ai_user(user_id)
    }

    /// Append an audit note and bump the document version.
    pub fn note(&mut self, note: impl Into<String>) {
        self.audit.notes.push(note.into());
        self.audit.version += 1;
    }
}

// ============================================================
// GAMEPLAY EVENTS & REAL-TIME PROJECTION
// ============================================================

/// Append-only record of one answer submission, stamped with the server
/// clock. Settlement replays these; the running scores on the match document
/// are only a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GameplayEvent {
    pub event_id: EventId,
    pub question_id: QuestionId,
    pub question_order: u32,
    pub player_id: UserId,
    pub answer_index: i32,
    pub is_correct: bool,
    /// Server timestamp, authoritative for fast/slow arbitration.
    pub timestamp: DateTime<Utc>,
    /// Milliseconds from match start as reported by the client.
    pub time_elapsed_ms: u64,
    pub score_a_after: i32,
    pub score_b_after: i32,
}

impl GameplayEvent {
    #[inline]
    pub fn is_too_slow(&self) -> bool {
        self.answer_index == TOO_SLOW_ANSWER_INDEX
    }
}

/// Minimal real-time projection published per match. The sole
/// synchronization signal between the two clients; everything else is
/// reconciled at settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchIndex {
    pub current_question_index: u32,
    pub last_updated: DateTime<Utc>,
}

/// Per-user signal that a match was created for them.
#[derive(Debug, Clone, Serialize)]
pub struct PendingMatchSignal {
    pub match_id: MatchId,
    pub opponent: PlayerSlot,
    pub duration: MatchDuration,
    pub is_ai_opponent: bool,
}
