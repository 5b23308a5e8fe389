//! Duel Arena server binary.
//!
//! Wires the core components together and serves the gateway:
//!
//! ```text
//! ┌────────┐   ┌────────────┐   ┌─────────────┐   ┌────────────┐
//! │ Config │──▶│ Components │──▶│ Schedulers  │──▶│  Gateway   │
//! │ (YAML) │   │ (ledger..) │   │ (scan, gc)  │   │ (axum/ws)  │
//! └────────┘   └────────────┘   └─────────────┘   └────────────┘
//! ```

use std::sync::Arc;

use duel_arena::config::Settings;
use duel_arena::coordinator::MatchCoordinator;
use duel_arena::gateway::{self, state::AppState};
use duel_arena::ledger::CreditLedger;
use duel_arena::logging::init_logging;
use duel_arena::match_store::MatchStore;
use duel_arena::matchmaker::Matchmaker;
use duel_arena::notifier::LogNotifier;
use duel_arena::question_pool::QuestionPool;
use duel_arena::realtime::RealtimeHub;
use duel_arena::settlement::SettlementEngine;
use duel_arena::user_auth::AuthService;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let settings = Settings::load(&config_path)?;

    let _log_guard = init_logging(&settings.app);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        config = %config_path,
        "duel arena starting"
    );

    let config = Arc::new(settings.duel.clone());
    let ledger = Arc::new(CreditLedger::new(config.initial_grant));
    let pool = Arc::new(QuestionPool::new());
    let store = Arc::new(MatchStore::new());
    let realtime = Arc::new(RealtimeHub::new());
    let settlement = Arc::new(SettlementEngine::new(
        Arc::clone(&store),
        Arc::clone(&ledger),
        Arc::clone(&realtime),
        Arc::new(LogNotifier),
        Arc::clone(&config),
    ));
    let matchmaker = Arc::new(Matchmaker::new(
        Arc::clone(&ledger),
        Arc::clone(&pool),
        Arc::clone(&store),
        Arc::clone(&realtime),
        Arc::clone(&settlement),
        Arc::clone(&config),
    ));
    let coordinator = Arc::new(MatchCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&pool),
        Arc::clone(&realtime),
        Arc::clone(&settlement),
    ));
    let auth = Arc::new(AuthService::new(settings.app.jwt_secret.clone()));

    // Background schedulers: queue rescans and garbage collection.
    tokio::spawn(Arc::clone(&matchmaker).run_scan_loop());
    tokio::spawn(Arc::clone(&matchmaker).run_cleanup_loop());

    let state = Arc::new(AppState::new(
        ledger,
        pool,
        store,
        matchmaker,
        coordinator,
        settlement,
        realtime,
        auth,
        config,
    ));

    gateway::run_server(&settings.app.host, settings.app.port, state).await;
    Ok(())
}
