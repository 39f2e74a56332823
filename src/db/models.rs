/// Database row types matching `migrations/0001_init.sql`.
/// Used by sqlx for typed queries.
use crate::types::{AffixObservation, ListingState, RunRecord, RunStats};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ListingRow {
    pub listing_id: String,
    pub league: String,
    pub game: String,
    pub base_type: String,
    pub item_class: Option<String>,
    pub item_level: Option<i64>,
    /// JSON array of influence names.
    pub influences: String,
    pub corrupted: bool,
    pub mirrored: bool,
    pub fractured: bool,
    pub synthesised: bool,
    /// JSON array of `AffixObservation`.
    pub affixes: String,
    pub price_chaos: f64,
    pub price_amount: f64,
    pub price_currency: String,
    pub seller_account: Option<String>,
    pub listed_at: Option<i64>,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
    pub state: String,
    pub disappeared_at: Option<i64>,
}

impl ListingRow {
    pub fn state(&self) -> Option<ListingState> {
        self.state.parse().ok()
    }

    pub fn affixes(&self) -> Vec<AffixObservation> {
        serde_json::from_str(&self.affixes).unwrap_or_default()
    }

    pub fn influences(&self) -> Vec<String> {
        serde_json::from_str(&self.influences).unwrap_or_default()
    }
}

/// The columns the lifecycle pass needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LifecycleRow {
    pub listing_id: String,
    pub first_seen_at: i64,
    pub state: String,
    pub disappeared_at: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRow {
    pub id: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub listings_fetched: i64,
    pub listings_new: i64,
    pub listings_updated: i64,
    pub errors: i64,
    /// JSON array of strings.
    pub error_messages: String,
}

impl From<RunRow> for RunRecord {
    fn from(r: RunRow) -> Self {
        RunRecord {
            id: r.id,
            started_at: r.started_at,
            completed_at: r.completed_at,
            stats: RunStats {
                listings_fetched: r.listings_fetched.max(0) as u64,
                listings_new: r.listings_new.max(0) as u64,
                listings_updated: r.listings_updated.max(0) as u64,
                errors: r.errors.max(0) as u64,
                error_messages: serde_json::from_str(&r.error_messages).unwrap_or_default(),
            },
            lifecycle: None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StateCountRow {
    pub state: String,
    pub count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RateRow {
    pub name: String,
    pub chaos_per_unit: f64,
    pub updated_at: i64,
}
