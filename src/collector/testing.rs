//! In-process fakes shared by the collector tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::affix::{AffixExtractor, SqliteModifierTable};
use crate::collector::poller::PollingService;
use crate::config::test_config;
use crate::currency::{CachedRateSource, CurrencyConverter};
use crate::db::{seed_mod, test_pool, ListingStore};
use crate::error::{AppError, Result};
use crate::trade::messages::{raw_listing_json, RawListing, SearchRequest, SearchResponse};
use crate::trade::TradeApi;

#[derive(Default)]
struct FakeState {
    templates: HashMap<String, Vec<serde_json::Value>>,
    failing_search: HashSet<String>,
    fetch_batches: Vec<usize>,
    search_gate: Option<Arc<Notify>>,
}

/// Marketplace fake: one search id per template, listings served from memory.
#[derive(Clone, Default)]
pub struct FakeTradeApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTradeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(self, template: &str, listings: Vec<serde_json::Value>) -> Self {
        self.set_template(template, listings);
        self
    }

    pub fn set_template(&self, template: &str, listings: Vec<serde_json::Value>) {
        self.state.lock().unwrap().templates.insert(template.to_string(), listings);
    }

    pub fn failing_search(self, template: &str) -> Self {
        self.state.lock().unwrap().failing_search.insert(template.to_string());
        self
    }

    /// Every search waits for one `notify_one` on `gate` before answering.
    pub fn with_search_gate(self, gate: Arc<Notify>) -> Self {
        self.state.lock().unwrap().search_gate = Some(gate);
        self
    }

    pub fn fetch_batch_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().fetch_batches.clone()
    }
}

#[async_trait]
impl TradeApi for FakeTradeApi {
    async fn search(&self, _league: &str, query: &SearchRequest) -> Result<SearchResponse> {
        let gate = self.state.lock().unwrap().search_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let state = self.state.lock().unwrap();
        let template = &query.query.base_type;
        if state.failing_search.contains(template) {
            return Err(AppError::TradeApi { status: 503, body: "search unavailable".to_string() });
        }
        let result: Vec<String> = state
            .templates
            .get(template)
            .map(|ls| ls.iter().filter_map(|l| l["id"].as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        Ok(SearchResponse { id: template.clone(), total: result.len() as u64, result })
    }

    async fn fetch(&self, search_id: &str, ids: &[String]) -> Result<Vec<RawListing>> {
        let mut state = self.state.lock().unwrap();
        state.fetch_batches.push(ids.len());
        let listings = state.templates.get(search_id).cloned().unwrap_or_default();
        let mut out = Vec::new();
        for id in ids {
            if let Some(v) = listings.iter().find(|l| l["id"].as_str() == Some(id.as_str())) {
                out.extend(RawListing::from_entry(v.clone()));
            }
        }
        Ok(out)
    }
}

pub fn listing(id: &str, amount: f64, currency: &str) -> serde_json::Value {
    raw_listing_json(id, serde_json::json!(amount), currency)
}

/// A polling service over an in-memory database seeded with life tiers and a
/// divine rate of 150 chaos.
pub async fn service(api: FakeTradeApi, templates: &[&str]) -> (PollingService, ListingStore) {
    let pool = test_pool().await;
    seed_mod(&pool, "life_t1", "poe1", "+(70-79) to maximum Life", "T1", 70.0, 79.0, 1).await;
    seed_mod(&pool, "life_t2", "poe1", "+(60-69) to maximum Life", "T2", 60.0, 69.0, 1).await;

    let mut cfg = test_config();
    cfg.templates = templates.iter().map(|t| t.to_string()).collect();

    let rates = CachedRateSource::new();
    rates.set("Divine Orb", 150.0);

    let store = ListingStore::new(pool.clone());
    let poller = PollingService::new(
        cfg.clone(),
        Arc::new(api),
        AffixExtractor::new(Arc::new(SqliteModifierTable::new(pool, cfg.game))),
        CurrencyConverter::new(Arc::new(rates)),
        store.clone(),
    )
    .with_request_delay(Duration::ZERO);
    (poller, store)
}
