use std::sync::Arc;

use crate::config::DuelConfig;
use crate::coordinator::MatchCoordinator;
use crate::ledger::CreditLedger;
use crate::match_store::MatchStore;
use crate::matchmaker::Matchmaker;
use crate::question_pool::QuestionPool;
use crate::realtime::RealtimeHub;
use crate::settlement::SettlementEngine;
use crate::user_auth::AuthService;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<CreditLedger>,
    pub pool: Arc<QuestionPool>,
    pub store: Arc<MatchStore>,
    pub matchmaker: Arc<Matchmaker>,
    pub coordinator: Arc<MatchCoordinator>,
    pub settlement: Arc<SettlementEngine>,
    pub realtime: Arc<RealtimeHub>,
    pub auth: Arc<AuthService>,
    pub config: Arc<DuelConfig>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<CreditLedger>,
        pool: Arc<QuestionPool>,
        store: Arc<MatchStore>,
        matchmaker: Arc<Matchmaker>,
        coordinator: Arc<MatchCoordinator>,
        settlement: Arc<SettlementEngine>,
        realtime: Arc<RealtimeHub>,
        auth: Arc<AuthService>,
        config: Arc<DuelConfig>,
    ) -> Self {
        Self {
            ledger,
            pool,
            store,
            matchmaker,
            coordinator,
            settlement,
            realtime,
            auth,
            config,
        }
    }
}
