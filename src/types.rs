use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    Poe1,
    Poe2,
}

impl Game {
    /// Path segment of the trade API for this game (`/api/trade/...` vs `/api/trade2/...`).
    pub fn trade_path(&self) -> &'static str {
        match self {
            Game::Poe1 => "trade",
            Game::Poe2 => "trade2",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Game::Poe1 => "poe1",
            Game::Poe2 => "poe2",
        }
    }
}

impl std::fmt::Display for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Game {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poe1" | "poe" | "1" => Ok(Game::Poe1),
            "poe2" | "2" => Ok(Game::Poe2),
            other => Err(AppError::Config(format!("unknown game '{other}' (expected poe1 or poe2)"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Listing lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingState {
    /// Seen this cycle, first observed less than 7 days ago.
    Live,
    /// Seen this cycle, first observed 7 to 14 days ago.
    Stale,
    /// Vanished less than a day after first observation. Proxy for a quick sale.
    DisappearedFast,
    /// Vanished after lingering a day or more.
    DisappearedSlow,
    /// Still listed after more than 14 days. Kept out of training data.
    Excluded,
}

impl ListingState {
    pub const ALL: [ListingState; 5] = [
        ListingState::Live,
        ListingState::Stale,
        ListingState::DisappearedFast,
        ListingState::DisappearedSlow,
        ListingState::Excluded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListingState::Live => "live",
            ListingState::Stale => "stale",
            ListingState::DisappearedFast => "disappeared_fast",
            ListingState::DisappearedSlow => "disappeared_slow",
            ListingState::Excluded => "excluded",
        }
    }

    /// Listings the marketplace still showed on the last pass.
    pub fn is_visible(&self) -> bool {
        matches!(self, ListingState::Live | ListingState::Stale)
    }
}

impl std::fmt::Display for ListingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ListingState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ListingState::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| AppError::InvalidValue(format!("unknown listing state '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// One matched modifier line. Embedded in the listing row as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffixObservation {
    pub mod_id: String,
    /// Lower is better. None when the reference tier label carries no number.
    pub tier: Option<u32>,
    /// Where `value` falls in the modifier's range, clamped to [0, 1].
    pub roll_position: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemFlags {
    pub corrupted: bool,
    pub mirrored: bool,
    pub fractured: bool,
    pub synthesised: bool,
}

/// A normalized listing ready to be upserted. Lifecycle columns are owned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRecord {
    pub listing_id: String,
    pub league: String,
    pub game: Game,
    pub base_type: String,
    pub item_class: Option<String>,
    pub item_level: Option<i64>,
    pub influences: Vec<String>,
    pub flags: ItemFlags,
    pub affixes: Vec<AffixObservation>,
    pub price_chaos: f64,
    pub price_amount: f64,
    pub price_currency: String,
    pub seller_account: Option<String>,
    /// Marketplace indexed time, unix nanoseconds.
    pub listed_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub listings_fetched: u64,
    pub listings_new: u64,
    pub listings_updated: u64,
    pub errors: u64,
    pub error_messages: Vec<String>,
}

impl RunStats {
    pub fn record_error(&mut self, message: String) {
        self.errors += 1;
        self.error_messages.push(message);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleUpdateStats {
    pub examined: u64,
    pub live: u64,
    pub stale: u64,
    pub excluded: u64,
    pub disappeared_fast: u64,
    pub disappeared_slow: u64,
    /// Rows whose state and disappeared_at were already correct.
    pub unchanged: u64,
}

impl LifecycleUpdateStats {
    pub fn count(&mut self, state: ListingState) {
        match state {
            ListingState::Live => self.live += 1,
            ListingState::Stale => self.stale += 1,
            ListingState::Excluded => self.excluded += 1,
            ListingState::DisappearedFast => self.disappeared_fast += 1,
            ListingState::DisappearedSlow => self.disappeared_slow += 1,
        }
    }
}

/// Bookkeeping for one cycle as persisted in `collector_runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    /// Unix nanoseconds.
    pub started_at: i64,
    /// None while running, or forever if the process died mid-cycle.
    pub completed_at: Option<i64>,
    pub stats: RunStats,
    /// Only populated in memory for cycles run by this process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<LifecycleUpdateStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_state_round_trips_through_str() {
        for state in ListingState::ALL {
            assert_eq!(state.as_str().parse::<ListingState>().unwrap(), state);
        }
    }

    #[test]
    fn unknown_listing_state_is_an_invalid_value() {
        let err = "gone".parse::<ListingState>().unwrap_err();
        assert!(matches!(err, AppError::InvalidValue(_)));
        let resp = axum::response::IntoResponse::into_response(err);
        assert_eq!(resp.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn game_selects_trade_path() {
        assert_eq!("poe2".parse::<Game>().unwrap().trade_path(), "trade2");
        assert_eq!(Game::Poe1.trade_path(), "trade");
        assert!("diablo".parse::<Game>().is_err());
    }

    #[test]
    fn run_stats_records_errors() {
        let mut stats = RunStats::default();
        stats.record_error("Hubris Circlet: search failed".to_string());
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.error_messages.len(), 1);
    }
}
