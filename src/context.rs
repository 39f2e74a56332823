use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::affix::{AffixExtractor, SqliteModifierTable};
use crate::api::ApiState;
use crate::collector::{LifecycleTracker, Orchestrator, PollingService};
use crate::config::Config;
use crate::currency::{CachedRateSource, CurrencyConverter, RateRefresher};
use crate::db::{self, ListingStore};
use crate::error::Result;
use crate::trade::{HttpTradeClient, TradeApi};

/// Every long-lived component, built once at start-up.
pub struct AppContext {
    cfg: Config,
    pool: sqlx::SqlitePool,
    store: ListingStore,
    orchestrator: Arc<Orchestrator>,
    refresher: Option<RateRefresher>,
    rate_task: Option<JoinHandle<()>>,
}

impl AppContext {
    pub async fn init(cfg: Config) -> Result<Self> {
        let pool = db::connect(&cfg.db_path).await?;
        let api = Arc::new(HttpTradeClient::new(&cfg)?);
        Self::with_parts(cfg, pool, api).await
    }

    /// Build on an already-migrated pool and a given marketplace client.
    pub async fn with_parts(cfg: Config, pool: sqlx::SqlitePool, api: Arc<dyn TradeApi>) -> Result<Self> {
        let store = ListingStore::new(pool.clone());

        let crashed = store.incomplete_runs().await?;
        for run in &crashed {
            warn!(run_id = %run.id, started_at = run.started_at, "Run {} never completed; the process likely died mid-cycle", run.id);
        }

        let rates = Arc::new(CachedRateSource::new());
        let refresher = RateRefresher::new(cfg.clone(), Arc::clone(&rates), store.clone())?;
        let warmed = refresher.warm_from_store().await?;
        info!(currencies = warmed, "Exchange-rate cache warmed with {warmed} persisted rates");

        let extractor = AffixExtractor::new(Arc::new(SqliteModifierTable::new(pool.clone(), cfg.game)));
        let converter = CurrencyConverter::new(rates);
        let poller = PollingService::new(cfg.clone(), api, extractor, converter, store.clone());
        let tracker = LifecycleTracker::new(store.clone(), cfg.league.clone(), cfg.game);
        let orchestrator = Arc::new(Orchestrator::new(cfg.clone(), poller, tracker, store.clone()));

        Ok(Self {
            cfg,
            pool,
            store,
            orchestrator,
            refresher: Some(refresher),
            rate_task: None,
        })
    }

    /// Spawn the rate refresher and start the polling loop (if enabled).
    pub async fn start(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            self.rate_task = Some(tokio::spawn(refresher.run()));
        }
        if !self.orchestrator.start().await {
            info!(enabled = self.cfg.enabled, "Polling loop not started");
        }
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            orchestrator: Arc::clone(&self.orchestrator),
            store: self.store.clone(),
            league: self.cfg.league.clone(),
            game: self.cfg.game,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub async fn shutdown(self) {
        self.orchestrator.stop().await;
        if let Some(task) = self.rate_task {
            task.abort();
        }
        self.pool.close().await;
        info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testing::FakeTradeApi;
    use crate::config::test_config;
    use crate::db::test_pool;

    #[tokio::test]
    async fn init_tolerates_crashed_runs_and_warm_rates() {
        let pool = test_pool().await;
        let store = ListingStore::new(pool.clone());
        store.insert_run("crashed", 1).await.unwrap();
        store.save_rates(&[("Divine Orb".to_string(), 140.0)], 1).await.unwrap();

        let ctx = AppContext::with_parts(test_config(), pool, Arc::new(FakeTradeApi::new()))
            .await
            .unwrap();
        let status = ctx.orchestrator().get_status();
        assert!(!status.running);
        assert_eq!(status.cycles_completed, 0);
        // Crashed runs are reported, never rewritten.
        assert_eq!(store.incomplete_runs().await.unwrap().len(), 1);
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn start_and_shutdown() {
        let mut cfg = test_config();
        // Nothing listens here; the refresher just logs its failure.
        cfg.rates_api_url = "http://127.0.0.1:9".to_string();
        let mut ctx = AppContext::with_parts(cfg, test_pool().await, Arc::new(FakeTradeApi::new()))
            .await
            .unwrap();

        ctx.start().await;
        assert!(ctx.orchestrator().get_status().running);
        let state = ctx.api_state();
        assert_eq!(state.league, "Standard");
        ctx.shutdown().await;
        assert!(!state.orchestrator.get_status().running);
    }
}
