use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::clock::now_ns;
use crate::config::{Config, HTTP_TIMEOUT_SECS, NS_PER_SEC, RATE_REFRESH_INTERVAL_SECS};
use crate::db::ListingStore;
use crate::error::{AppError, Result};

/// Chaos value of one unit of a currency, keyed by display name.
pub trait RateSource: Send + Sync {
    fn rate(&self, currency_name: &str) -> Option<f64>;
}

/// In-memory rate table. Written by `RateRefresher`, read by the converter.
#[derive(Default)]
pub struct CachedRateSource {
    rates: DashMap<String, f64>,
}

impl CachedRateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, chaos_per_unit: f64) {
        self.rates.insert(name.to_string(), chaos_per_unit);
    }
}

impl RateSource for CachedRateSource {
    fn rate(&self, currency_name: &str) -> Option<f64> {
        self.rates.get(currency_name).map(|r| *r.value())
    }
}

#[derive(Debug, Deserialize)]
struct OverviewResponse {
    #[serde(default)]
    lines: Vec<OverviewLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverviewLine {
    currency_type_name: String,
    chaos_equivalent: Option<f64>,
}

/// Keeps `CachedRateSource` current from the exchange-rate API and mirrors
/// it into `currency_rates` so restarts can price listings immediately.
pub struct RateRefresher {
    cfg: Config,
    cache: Arc<CachedRateSource>,
    store: ListingStore,
    client: reqwest::Client,
}

impl RateRefresher {
    pub fn new(cfg: Config, cache: Arc<CachedRateSource>, store: ListingStore) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(cfg.user_agent.clone())
            .build()?;
        Ok(Self { cfg, cache, store, client })
    }

    /// Load the last persisted rates into the cache.
    pub async fn warm_from_store(&self) -> Result<usize> {
        let rows = self.store.load_rates().await?;
        for row in &rows {
            self.cache.set(&row.name, row.chaos_per_unit);
        }
        if let Some(oldest) = rows.iter().map(|r| r.updated_at).min() {
            let age_mins = now_ns().saturating_sub(oldest) / NS_PER_SEC / 60;
            debug!(currencies = rows.len(), age_mins, "Loaded persisted rates; oldest is {age_mins}m old");
        }
        Ok(rows.len())
    }

    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(RATE_REFRESH_INTERVAL_SECS));

        loop {
            ticker.tick().await;
            if let Err(e) = self.refresh().await {
                error!("Exchange rate refresh failed: {e}");
            }
        }
    }

    pub async fn refresh(&self) -> Result<usize> {
        let url = format!("{}/api/data/currencyoverview", self.cfg.rates_api_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .query(&[("league", self.cfg.league.as_str()), ("type", "Currency")])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Rates(format!("{url} returned {status}")));
        }
        let overview: OverviewResponse = resp.json().await?;

        let mut fresh = Vec::with_capacity(overview.lines.len());
        for line in overview.lines {
            match line.chaos_equivalent {
                Some(rate) if rate > 0.0 => fresh.push((line.currency_type_name, rate)),
                _ => warn!(currency = %line.currency_type_name, "Skipping currency without a positive rate"),
            }
        }

        for (name, rate) in &fresh {
            self.cache.set(name, *rate);
        }
        self.store.save_rates(&fresh, now_ns()).await?;

        info!(
            league = %self.cfg.league,
            currencies = fresh.len(),
            "Exchange rates refreshed: {} currencies",
            fresh.len()
        );
        Ok(fresh.len())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::test_config;
    use crate::db::test_pool;

    #[test]
    fn cache_lookup_is_exact() {
        let cache = CachedRateSource::new();
        cache.set("Divine Orb", 150.0);
        assert_eq!(cache.rate("Divine Orb"), Some(150.0));
        assert_eq!(cache.rate("divine orb"), None);
    }

    #[tokio::test]
    async fn refresh_fills_cache_and_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/data/currencyoverview"))
            .and(query_param("league", "Standard"))
            .and(query_param("type", "Currency"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "lines": [
                    { "currencyTypeName": "Divine Orb", "chaosEquivalent": 152.5 },
                    { "currencyTypeName": "Broken Orb", "chaosEquivalent": 0.0 },
                    { "currencyTypeName": "Mystery Orb" }
                ]
            })))
            .mount(&server)
            .await;

        let mut cfg = test_config();
        cfg.rates_api_url = server.uri();
        let cache = Arc::new(CachedRateSource::new());
        let store = ListingStore::new(test_pool().await);
        let refresher = RateRefresher::new(cfg, Arc::clone(&cache), store.clone()).unwrap();

        assert_eq!(refresher.refresh().await.unwrap(), 1);
        assert_eq!(cache.rate("Divine Orb"), Some(152.5));
        assert_eq!(cache.rate("Broken Orb"), None);

        let warm_cache = Arc::new(CachedRateSource::new());
        let warm = RateRefresher::new(test_config(), Arc::clone(&warm_cache), store).unwrap();
        assert_eq!(warm.warm_from_store().await.unwrap(), 1);
        assert_eq!(warm_cache.rate("Divine Orb"), Some(152.5));
    }

    #[tokio::test]
    async fn refresh_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut cfg = test_config();
        cfg.rates_api_url = server.uri();
        let refresher =
            RateRefresher::new(cfg, Arc::new(CachedRateSource::new()), ListingStore::new(test_pool().await)).unwrap();
        assert!(matches!(refresher.refresh().await, Err(AppError::Rates(_))));
    }
}
