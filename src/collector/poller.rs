use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::affix::AffixExtractor;
use crate::clock::now_ns;
use crate::config::{Config, FETCH_BATCH_SIZE, HEALTH_GAP_FACTOR, MARKETPLACE_REQUEST_DELAY_MS};
use crate::currency::CurrencyConverter;
use crate::db::ListingStore;
use crate::error::Result;
use crate::trade::messages::{RawListing, SearchRequest};
use crate::trade::TradeApi;
use crate::types::{ListingRecord, RunStats};

/// Listing ids observed during a cycle, deduplicated, in first-seen order.
#[derive(Debug, Default)]
struct SeenIds {
    order: Vec<String>,
    set: HashSet<String>,
}

impl SeenIds {
    fn insert(&mut self, id: &str) {
        if self.set.insert(id.to_string()) {
            self.order.push(id.to_string());
        }
    }
}

/// Runs one collection pass over every configured template.
pub struct PollingService {
    cfg: Config,
    api: Arc<dyn TradeApi>,
    extractor: AffixExtractor,
    converter: CurrencyConverter,
    store: ListingStore,
    request_delay: Duration,
}

impl PollingService {
    pub fn new(
        cfg: Config,
        api: Arc<dyn TradeApi>,
        extractor: AffixExtractor,
        converter: CurrencyConverter,
        store: ListingStore,
    ) -> Self {
        Self {
            cfg,
            api,
            extractor,
            converter,
            store,
            request_delay: Duration::from_millis(MARKETPLACE_REQUEST_DELAY_MS),
        }
    }

    /// Override the pause between marketplace calls.
    #[cfg(test)]
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub async fn poll_once(&self) -> (RunStats, Vec<String>) {
        self.poll_once_at(now_ns()).await
    }

    /// One pass stamped with `now`. Never fails: template errors land in the stats.
    pub async fn poll_once_at(&self, now: i64) -> (RunStats, Vec<String>) {
        self.check_health(now).await;

        let mut stats = RunStats::default();
        let mut seen = SeenIds::default();

        for (idx, template) in self.cfg.templates.iter().enumerate() {
            if idx > 0 {
                self.pace().await;
            }
            let before = stats.listings_fetched;
            match self.poll_template(template, now, &mut stats, &mut seen).await {
                Ok(kept) => info!(
                    template = %template,
                    fetched = stats.listings_fetched - before,
                    kept,
                    "Template '{template}' polled: {} fetched, {kept} kept",
                    stats.listings_fetched - before,
                ),
                Err(e) => {
                    error!(template = %template, "Template '{template}' failed: {e}");
                    stats.record_error(format!("{template}: {e}"));
                }
            }
        }

        (stats, seen.order)
    }

    /// Search one template and process its results batch by batch.
    /// Each batch commits on its own, so rows stored before a failure stay stored.
    async fn poll_template(
        &self,
        template: &str,
        now: i64,
        stats: &mut RunStats,
        seen: &mut SeenIds,
    ) -> Result<u64> {
        let search = self
            .api
            .search(&self.cfg.league, &SearchRequest::online_base_type(template))
            .await?;

        let reported = search.total;
        let ids: Vec<String> = search
            .result
            .into_iter()
            .take(self.cfg.max_results_per_template)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        if reported > ids.len() as u64 {
            debug!(
                template,
                reported,
                sampled = ids.len(),
                "Result ceiling reached for '{template}'"
            );
        }

        let mut kept = 0u64;
        for chunk in ids.chunks(FETCH_BATCH_SIZE) {
            self.pace().await;
            let raw = self.api.fetch(&search.id, chunk).await?;
            stats.listings_fetched += raw.len() as u64;
            for listing in &raw {
                seen.insert(&listing.id);
            }

            let records = self.normalize_batch(raw).await?;
            let outcome = self.store.upsert_batch(&records, now).await?;
            stats.listings_new += outcome.inserted;
            stats.listings_updated += outcome.updated;
            kept += records.len() as u64;
        }

        Ok(kept)
    }

    async fn normalize_batch(&self, raw: Vec<RawListing>) -> Result<Vec<ListingRecord>> {
        let mut records = Vec::with_capacity(raw.len());
        for listing in raw {
            if let Some(record) = self.normalize(listing).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Turn a raw listing into a record. Data-quality problems drop the
    /// listing (`Ok(None)`); only storage failures are errors.
    pub async fn normalize(&self, raw: RawListing) -> Result<Option<ListingRecord>> {
        let listing_id = raw.id.clone();
        let parsed = match raw.parse() {
            Ok(p) => p,
            Err(rejection) => {
                debug!(listing_id = %listing_id, reason = %rejection, "Skipping listing");
                return Ok(None);
            }
        };

        let price_chaos = match self.converter.convert(parsed.amount, &parsed.currency) {
            Ok(v) => v,
            Err(e) => {
                debug!(listing_id = %listing_id, "Skipping listing: {e}");
                return Ok(None);
            }
        };

        let affixes = self.extractor.extract(&parsed.mod_lines).await?;

        Ok(Some(ListingRecord {
            listing_id: parsed.listing_id,
            league: self.cfg.league.clone(),
            game: self.cfg.game,
            base_type: parsed.base_type,
            item_class: parsed.item_class,
            item_level: parsed.item_level,
            influences: parsed.influences,
            flags: parsed.flags,
            affixes,
            price_chaos,
            price_amount: parsed.amount,
            price_currency: parsed.currency,
            seller_account: parsed.seller_account,
            listed_at: parsed.listed_at,
        }))
    }

    /// Gap since the newest sighting for this league, if it exceeds the health threshold.
    pub async fn collection_gap(&self, now: i64) -> Result<Option<Duration>> {
        let Some(latest) = self.store.latest_last_seen(&self.cfg.league, self.cfg.game).await? else {
            return Ok(None);
        };
        let gap_ns = now.saturating_sub(latest).max(0);
        let threshold_ns = i64::try_from(self.cfg.interval().as_nanos())
            .unwrap_or(i64::MAX)
            .saturating_mul(i64::from(HEALTH_GAP_FACTOR));
        if gap_ns > threshold_ns {
            Ok(Some(Duration::from_nanos(gap_ns as u64)))
        } else {
            Ok(None)
        }
    }

    async fn check_health(&self, now: i64) {
        match self.collection_gap(now).await {
            Ok(Some(gap)) => warn!(
                league = %self.cfg.league,
                gap_secs = gap.as_secs(),
                "Collection gap of {}m exceeds {}x the {}m interval; collection was likely down",
                gap.as_secs() / 60,
                HEALTH_GAP_FACTOR,
                self.cfg.interval_minutes,
            ),
            Ok(None) => {}
            Err(e) => warn!("Collection health check failed: {e}"),
        }
    }

    async fn pace(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }
}
