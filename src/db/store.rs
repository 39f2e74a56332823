use tracing::debug;

use crate::db::models::{LifecycleRow, ListingRow, RateRow, RunRow, StateCountRow};
use crate::error::Result;
use crate::types::{Game, ListingRecord, ListingState, RunRecord, RunStats};

/// Outcome of one batched upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: u64,
    pub updated: u64,
}

/// One lifecycle transition to write back.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub listing_id: String,
    pub state: ListingState,
    pub disappeared_at: Option<i64>,
}

/// All persistence for the collector. Cheap to clone; wraps the pool.
#[derive(Clone)]
pub struct ListingStore {
    pool: sqlx::SqlitePool,
}

impl ListingStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    // -----------------------------------------------------------------------
    // Listings
    // -----------------------------------------------------------------------

    /// Upsert a batch of listings inside one transaction.
    ///
    /// New ids get `first_seen_at = last_seen_at = now` and state `live`.
    /// Known ids get every mutable column refreshed; `first_seen_at`, `state`
    /// and `disappeared_at` are left for the lifecycle pass.
    pub async fn upsert_batch(&self, records: &[ListingRecord], now: i64) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        if records.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self.pool.begin().await?;

        for r in records {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM listings WHERE listing_id = ?")
                    .bind(&r.listing_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            let influences = serde_json::to_string(&r.influences)?;
            let affixes = serde_json::to_string(&r.affixes)?;

            sqlx::query(
                r#"
                INSERT INTO listings (
                    listing_id, league, game, base_type, item_class, item_level,
                    influences, corrupted, mirrored, fractured, synthesised, affixes,
                    price_chaos, price_amount, price_currency, seller_account, listed_at,
                    first_seen_at, last_seen_at, state, disappeared_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
                ON CONFLICT(listing_id) DO UPDATE SET
                    league = excluded.league,
                    game = excluded.game,
                    base_type = excluded.base_type,
                    item_class = excluded.item_class,
                    item_level = excluded.item_level,
                    influences = excluded.influences,
                    corrupted = excluded.corrupted,
                    mirrored = excluded.mirrored,
                    fractured = excluded.fractured,
                    synthesised = excluded.synthesised,
                    affixes = excluded.affixes,
                    price_chaos = excluded.price_chaos,
                    price_amount = excluded.price_amount,
                    price_currency = excluded.price_currency,
                    seller_account = excluded.seller_account,
                    listed_at = excluded.listed_at,
                    last_seen_at = MAX(listings.last_seen_at, excluded.last_seen_at)
                "#,
            )
            .bind(&r.listing_id)
            .bind(&r.league)
            .bind(r.game.as_str())
            .bind(&r.base_type)
            .bind(&r.item_class)
            .bind(r.item_level)
            .bind(influences)
            .bind(r.flags.corrupted)
            .bind(r.flags.mirrored)
            .bind(r.flags.fractured)
            .bind(r.flags.synthesised)
            .bind(affixes)
            .bind(r.price_chaos)
            .bind(r.price_amount)
            .bind(&r.price_currency)
            .bind(&r.seller_account)
            .bind(r.listed_at)
            .bind(now)
            .bind(now)
            .bind(ListingState::Live.as_str())
            .execute(&mut *tx)
            .await?;

            if exists.is_some() {
                outcome.updated += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        tx.commit().await?;
        debug!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            "Upserted batch of {} listings",
            records.len()
        );
        Ok(outcome)
    }

    pub async fn get_listing(&self, listing_id: &str) -> Result<Option<ListingRow>> {
        let row = sqlx::query_as::<_, ListingRow>("SELECT * FROM listings WHERE listing_id = ?")
            .bind(listing_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Most recent sighting of any listing for the league/game pair.
    pub async fn latest_last_seen(&self, league: &str, game: Game) -> Result<Option<i64>> {
        let latest: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(last_seen_at) FROM listings WHERE league = ? AND game = ?",
        )
        .bind(league)
        .bind(game.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(latest)
    }

    pub async fn lifecycle_rows(&self, league: &str, game: Game) -> Result<Vec<LifecycleRow>> {
        let rows = sqlx::query_as::<_, LifecycleRow>(
            r#"
            SELECT listing_id, first_seen_at, state, disappeared_at
            FROM listings
            WHERE league = ? AND game = ?
            "#,
        )
        .bind(league)
        .bind(game.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Write lifecycle transitions in a single transaction.
    pub async fn apply_state_changes(&self, changes: &[StateChange]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for c in changes {
            sqlx::query("UPDATE listings SET state = ?, disappeared_at = ? WHERE listing_id = ?")
                .bind(c.state.as_str())
                .bind(c.disappeared_at)
                .bind(&c.listing_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn state_counts(&self, league: &str, game: Game) -> Result<Vec<StateCountRow>> {
        let rows = sqlx::query_as::<_, StateCountRow>(
            r#"
            SELECT state, COUNT(*) AS count
            FROM listings
            WHERE league = ? AND game = ?
            GROUP BY state
            ORDER BY state
            "#,
        )
        .bind(league)
        .bind(game.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    pub async fn insert_run(&self, id: &str, started_at: i64) -> Result<()> {
        sqlx::query("INSERT INTO collector_runs (id, started_at) VALUES (?, ?)")
            .bind(id)
            .bind(started_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn finish_run(&self, id: &str, completed_at: i64, stats: &RunStats) -> Result<()> {
        let error_messages = serde_json::to_string(&stats.error_messages)?;
        sqlx::query(
            r#"
            UPDATE collector_runs SET
                completed_at = ?,
                listings_fetched = ?,
                listings_new = ?,
                listings_updated = ?,
                errors = ?,
                error_messages = ?
            WHERE id = ?
            "#,
        )
        .bind(completed_at)
        .bind(stats.listings_fetched as i64)
        .bind(stats.listings_new as i64)
        .bind(stats.listings_updated as i64)
        .bind(stats.errors as i64)
        .bind(error_messages)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_run(&self, id: &str) -> Result<Option<RunRecord>> {
        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM collector_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(RunRecord::from))
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM collector_runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RunRecord::from).collect())
    }

    /// Runs that never recorded completion: crashed cycles, or the one in flight.
    pub async fn incomplete_runs(&self) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM collector_runs WHERE completed_at IS NULL ORDER BY started_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RunRecord::from).collect())
    }

    // -----------------------------------------------------------------------
    // Exchange rates
    // -----------------------------------------------------------------------

    pub async fn load_rates(&self) -> Result<Vec<RateRow>> {
        let rows = sqlx::query_as::<_, RateRow>("SELECT name, chaos_per_unit, updated_at FROM currency_rates")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn save_rates(&self, rates: &[(String, f64)], now: i64) -> Result<()> {
        if rates.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (name, rate) in rates {
            sqlx::query(
                r#"
                INSERT INTO currency_rates (name, chaos_per_unit, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET
                    chaos_per_unit = excluded.chaos_per_unit,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(name)
            .bind(rate)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
