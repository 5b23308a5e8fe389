//! Duel Arena - real-time head-to-head picture-trivia duels
//!
//! Two players with opposing political stances race through a synchronized
//! question sequence for credit stakes held by a server-authoritative ledger.
//!
//! # Modules
//!
//! - [`core_types`] - Core identifier aliases (UserId, MatchId, etc.)
//! - [`config`] - Gameplay and server configuration
//! - [`models`] - Domain documents (questions, queue entries, matches, events)
//! - [`error`] - Unified error taxonomy
//! - [`ledger`] - Credit accounts with an immutable event history
//! - [`question_pool`] - Question catalog and pre-assembled sequences
//! - [`match_store`] - Per-match single-writer document store
//! - [`matchmaker`] - Queue, pair selection, AI fallback
//! - [`coordinator`] - Per-question barrier and answer recording
//! - [`settlement`] - Authoritative replay, anti-cheat, payouts
//! - [`realtime`] - Match-index projection and pending-match signals
//! - [`notifier`] - Outbound notification seam
//! - [`user_auth`] - JWT verification for the external auth provider
//! - [`gateway`] - Axum HTTP/WebSocket surface

// Core types - must be first!
pub mod core_types;

// Configuration
pub mod config;

// Duel components
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod match_store;
pub mod matchmaker;
pub mod models;
pub mod notifier;
pub mod question_pool;
pub mod realtime;
pub mod settlement;

// Transport
pub mod gateway;
pub mod user_auth;

// Convenient re-exports at crate root
pub use config::{AppConfig, DuelConfig, Settings};
pub use coordinator::{MatchCoordinator, SubmitAnswerCmd, SubmitOutcome};
pub use core_types::{EventId, MatchId, QuestionId, SequenceId, UserId};
pub use error::{DuelError, DuelResult};
pub use ledger::{CreditAccount, CreditLedger, LedgerEvent, LedgerEventType};
pub use match_store::MatchStore;
pub use matchmaker::{JoinQueueCmd, Matchmaker, QueueReceipt};
pub use models::{Match, MatchDuration, MatchStatus, MatchWinner, Question, QuestionSequence};
pub use notifier::{LogNotifier, SettlementNotifier};
pub use question_pool::QuestionPool;
pub use realtime::RealtimeHub;
pub use settlement::SettlementEngine;
