//! Core types used throughout the system
//!
//! These are fundamental identifier aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// User ID - globally unique identifier for a player.
///
/// # Constraints:
/// - **Immutable**: assigned by the external auth provider, never changes
/// - **Opaque**: the core never parses it, with one exception — AI opponents
///   carry the [`AI_BOT_PREFIX`] so credit accounting can skip them
pub type UserId = String;

/// Match ID - unique within the system (UUID v4, rendered as a string)
pub type MatchId = String;

/// Question ID - unique within the question pool
pub type QuestionId = String;

/// Sequence ID - unique within the sequence store
pub type SequenceId = String;

/// Ledger / gameplay event ID
pub type EventId = String;

/// Sequence number for per-account event ordering
pub type SeqNum = u64;

/// Prefix that marks a synthesized AI opponent.
///
/// AI players never hold credits; every settlement path checks this prefix
/// before touching the ledger.
pub const AI_BOT_PREFIX: &str = "ai_bot_";

/// Whether a user id denotes a synthesized AI opponent.
#[inline]
pub fn is_ai_user(user_id: &str) -> bool {
    user_id.starts_with(AI_BOT_PREFIX)
}
