use std::collections::HashSet;

use tracing::{info, warn};

use crate::config::NS_PER_DAY;
use crate::db::{ListingStore, StateChange};
use crate::error::Result;
use crate::types::{Game, LifecycleUpdateStats, ListingState};

/// Listings seen for longer than this many days are excluded from the dataset.
pub const EXCLUDE_AFTER_DAYS: f64 = 14.0;
/// Listings seen for at least this many days are stale.
pub const STALE_AFTER_DAYS: f64 = 7.0;
/// Disappearing within this many days of first sighting counts as fast.
pub const FAST_DISAPPEARANCE_DAYS: f64 = 1.0;

/// The whole state machine. Returns the target `(state, disappeared_at)`,
/// or None when the row must be left untouched.
pub fn transition(
    current: ListingState,
    age_days: f64,
    seen: bool,
    now: i64,
) -> Option<(ListingState, Option<i64>)> {
    if seen {
        let state = if age_days > EXCLUDE_AFTER_DAYS {
            ListingState::Excluded
        } else if age_days >= STALE_AFTER_DAYS {
            ListingState::Stale
        } else {
            ListingState::Live
        };
        return Some((state, None));
    }

    if current.is_visible() {
        let state = if age_days < FAST_DISAPPEARANCE_DAYS {
            ListingState::DisappearedFast
        } else {
            ListingState::DisappearedSlow
        };
        return Some((state, Some(now)));
    }

    // Already disappeared or excluded, and still absent.
    None
}

/// Reconciles one cycle's sightings against every known listing of a league.
pub struct LifecycleTracker {
    store: ListingStore,
    league: String,
    game: Game,
}

impl LifecycleTracker {
    pub fn new(store: ListingStore, league: String, game: Game) -> Self {
        Self { store, league, game }
    }

    pub async fn update_listing_states(
        &self,
        seen_ids: &[String],
        now: i64,
    ) -> Result<LifecycleUpdateStats> {
        let seen: HashSet<&str> = seen_ids.iter().map(String::as_str).collect();
        let rows = self.store.lifecycle_rows(&self.league, self.game).await?;

        let mut stats = LifecycleUpdateStats::default();
        let mut changes = Vec::new();

        for row in rows {
            stats.examined += 1;
            let Ok(current) = row.state.parse::<ListingState>() else {
                warn!(listing_id = %row.listing_id, state = %row.state, "Unknown listing state; leaving row untouched");
                stats.unchanged += 1;
                continue;
            };

            let age_days = (now - row.first_seen_at) as f64 / NS_PER_DAY as f64;
            let is_seen = seen.contains(row.listing_id.as_str());

            match transition(current, age_days, is_seen, now) {
                Some((state, disappeared_at))
                    if state != current || disappeared_at != row.disappeared_at =>
                {
                    stats.count(state);
                    changes.push(StateChange { listing_id: row.listing_id, state, disappeared_at });
                }
                _ => stats.unchanged += 1,
            }
        }

        self.store.apply_state_changes(&changes).await?;

        info!(
            league = %self.league,
            examined = stats.examined,
            changed = changes.len(),
            disappeared_fast = stats.disappeared_fast,
            disappeared_slow = stats.disappeared_slow,
            "Lifecycle pass: {} listings, {} transitions",
            stats.examined,
            changes.len(),
        );
        Ok(stats)
    }
}
