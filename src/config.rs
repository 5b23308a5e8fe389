//! Configuration types and loaders
//!
//! Two layers of configuration:
//! - [`DuelConfig`] - gameplay/matchmaking tuning knobs. These are tuning
//!   parameters, not contracts; defaults encode the production values.
//! - [`AppConfig`] - server process settings (bind address, logging, auth).
//!
//! Both deserialize from a single YAML file; a missing file falls back to
//! defaults so the binary runs out of the box.

use std::path::Path;

use serde::Deserialize;

/// Gameplay and matchmaking configuration.
///
/// | Knob | Default | Used by |
/// |------|---------|---------|
/// | `max_ping_diff_ms` | 60 | matchmaker compatibility |
/// | `max_fee_diff_units` | 1 | matchmaker compatibility |
/// | `queue_ttl_ms` | 300_000 | queue entry expiry |
/// | `ai_opponent_wait_ms` | 30_000 | AI fallback promotion |
/// | `safety_belt_cost` | 5 | queue join / settlement |
/// | `safety_belt_min_fee` | 18 | queue join validation |
/// | `initial_grant` | 100 | ledger account creation |
/// | `min_human_reaction_ms` | 100 | anti-cheat |
/// | `too_fast_ratio_threshold` | 0.30 | anti-cheat |
/// | `presence_stale_ms` | 900_000 | cleanup sweep |
/// | `match_expiry_ms` | 900_000 | cleanup sweep |
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DuelConfig {
    pub max_ping_diff_ms: u32,
    pub max_fee_diff_units: u64,
    pub queue_ttl_ms: i64,
    pub ai_opponent_wait_ms: i64,
    pub safety_belt_cost: u64,
    pub safety_belt_min_fee: u64,
    pub initial_grant: u64,
    pub min_human_reaction_ms: i64,
    pub too_fast_ratio_threshold: f64,
    pub presence_stale_ms: i64,
    pub match_expiry_ms: i64,
    /// Queue rescan cadence for the matchmaking scheduler.
    pub scan_interval_ms: u64,
    /// Cleanup sweep cadence (longer than the scan cadence).
    pub cleanup_interval_ms: u64,
    /// Bound on ledger hold retries when a conflict is reported.
    pub hold_retry_limit: u32,
    /// Stance labels the AI synthesizer may pick an opposing stance from.
    pub stance_types: Vec<String>,
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            max_ping_diff_ms: 60,
            max_fee_diff_units: 1,
            queue_ttl_ms: 300_000,
            ai_opponent_wait_ms: 30_000,
            safety_belt_cost: 5,
            safety_belt_min_fee: 18,
            initial_grant: 100,
            min_human_reaction_ms: 100,
            too_fast_ratio_threshold: 0.30,
            presence_stale_ms: 900_000,
            match_expiry_ms: 900_000,
            scan_interval_ms: 3_000,
            cleanup_interval_ms: 60_000,
            hold_retry_limit: 3,
            stance_types: vec![
                "progressive".to_string(),
                "conservative".to_string(),
                "moderate".to_string(),
                "libertarian".to_string(),
            ],
        }
    }
}

impl DuelConfig {
    /// Safety fee owed at join time for the given election.
    #[inline]
    pub fn safety_fee(&self, safety_belt: bool) -> u64 {
        if safety_belt { self.safety_belt_cost } else { 0 }
    }
}

/// Server process configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub log_dir: String,
    pub log_file: String,
    /// "hourly", "daily", or anything else for a single never-rotated file.
    pub rotation: String,
    pub log_level: String,
    pub use_json: bool,
    /// Secret the external auth provider signs bearer tokens with.
    pub jwt_secret: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_dir: "logs".to_string(),
            log_file: "duel_arena.log".to_string(),
            rotation: "daily".to_string(),
            log_level: "info".to_string(),
            use_json: false,
            jwt_secret: "dev-secret-change-me".to_string(),
        }
    }
}

/// Combined on-disk configuration file layout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: AppConfig,
    pub duel: DuelConfig,
}

impl Settings {
    /// Load settings from a YAML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&raw)?;
        Ok(settings)
    }
}
