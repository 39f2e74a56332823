use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::collector::{CollectorStatus, Orchestrator};
use crate::db::ListingStore;
use crate::error::AppError;
use crate::types::{AffixObservation, Game, ListingState, RunRecord};

const DEFAULT_RUNS_LIMIT: i64 = 20;
const MAX_RUNS_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: ListingStore,
    pub league: String,
    pub game: Game,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/runs", get(get_runs).post(trigger_run))
        .route("/runs/:id", get(get_run))
        .route("/collector/start", post(start_collector))
        .route("/collector/stop", post(stop_collector))
        .route("/listings/summary", get(get_listings_summary))
        .route("/listings/:id", get(get_listing))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    /// False when the request was a no-op (already running, disabled, or not running).
    pub changed: bool,
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct ListingsSummaryResponse {
    pub league: String,
    pub game: Game,
    pub total: i64,
    pub by_state: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize)]
pub struct ListingResponse {
    pub listing_id: String,
    pub league: String,
    pub game: String,
    pub base_type: String,
    pub item_class: Option<String>,
    pub item_level: Option<i64>,
    pub influences: Vec<String>,
    pub corrupted: bool,
    pub mirrored: bool,
    pub fractured: bool,
    pub synthesised: bool,
    pub affixes: Vec<AffixObservation>,
    pub price_chaos: f64,
    pub price_amount: f64,
    pub price_currency: String,
    pub seller_account: Option<String>,
    pub listed_at: Option<i64>,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
    pub state: Option<ListingState>,
    pub disappeared_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_status(State(state): State<ApiState>) -> Json<CollectorStatus> {
    Json(state.orchestrator.get_status())
}

async fn get_runs(
    State(state): State<ApiState>,
    Query(params): Query<RunsQuery>,
) -> Result<Json<Vec<RunRecord>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_RUNS_LIMIT).clamp(1, MAX_RUNS_LIMIT);
    Ok(Json(state.store.recent_runs(limit).await?))
}

async fn get_run(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunRecord>, AppError> {
    state
        .store
        .get_run(&run_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("run {run_id}")))
}

async fn trigger_run(State(state): State<ApiState>) -> Result<Json<RunRecord>, AppError> {
    Ok(Json(state.orchestrator.run_once().await?))
}

async fn start_collector(State(state): State<ApiState>) -> Json<ControlResponse> {
    let changed = state.orchestrator.start().await;
    Json(ControlResponse {
        changed,
        running: state.orchestrator.get_status().running,
    })
}

async fn stop_collector(State(state): State<ApiState>) -> Json<ControlResponse> {
    let changed = state.orchestrator.stop().await;
    Json(ControlResponse {
        changed,
        running: state.orchestrator.get_status().running,
    })
}

async fn get_listings_summary(
    State(state): State<ApiState>,
) -> Result<Json<ListingsSummaryResponse>, AppError> {
    let rows = state.store.state_counts(&state.league, state.game).await?;

    let mut by_state: BTreeMap<String, i64> = ListingState::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for row in rows {
        *by_state.entry(row.state).or_default() += row.count;
    }

    Ok(Json(ListingsSummaryResponse {
        league: state.league.clone(),
        game: state.game,
        total: by_state.values().sum(),
        by_state,
    }))
}

async fn get_listing(
    State(state): State<ApiState>,
    Path(listing_id): Path<String>,
) -> Result<Json<ListingResponse>, AppError> {
    let row = state
        .store
        .get_listing(&listing_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("listing {listing_id}")))?;

    let listing_state = row.state();
    let influences = row.influences();
    let affixes = row.affixes();
    Ok(Json(ListingResponse {
        listing_id: row.listing_id,
        league: row.league,
        game: row.game,
        base_type: row.base_type,
        item_class: row.item_class,
        item_level: row.item_level,
        influences,
        corrupted: row.corrupted,
        mirrored: row.mirrored,
        fractured: row.fractured,
        synthesised: row.synthesised,
        affixes,
        price_chaos: row.price_chaos,
        price_amount: row.price_amount,
        price_currency: row.price_currency,
        seller_account: row.seller_account,
        listed_at: row.listed_at,
        first_seen_at: row.first_seen_at,
        last_seen_at: row.last_seen_at,
        state: listing_state,
        disappeared_at: row.disappeared_at,
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::collector::testing::{listing, service, FakeTradeApi};
    use crate::collector::LifecycleTracker;
    use crate::config::test_config;

    async fn api_state(api: FakeTradeApi) -> ApiState {
        let (poller, store) = service(api, &["Hubris Circlet"]).await;
        let cfg = test_config();
        let tracker = LifecycleTracker::new(store.clone(), cfg.league.clone(), cfg.game);
        let league = cfg.league.clone();
        let game = cfg.game;
        let orchestrator = Orchestrator::new(cfg, poller, tracker, store.clone())
            .with_interval(Duration::from_secs(3600));
        ApiState { orchestrator: Arc::new(orchestrator), store, league, game }
    }

    #[tokio::test]
    async fn trigger_then_list_runs() {
        let state = api_state(
            FakeTradeApi::new().with_template("Hubris Circlet", vec![listing("L1", 5.0, "chaos")]),
        )
        .await;

        let Json(run) = trigger_run(State(state.clone())).await.unwrap();
        assert_eq!(run.stats.listings_new, 1);

        let Json(runs) = get_runs(State(state.clone()), Query(RunsQuery { limit: None })).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run.id);

        let Json(fetched) = get_run(State(state.clone()), Path(run.id.clone())).await.unwrap();
        assert_eq!(fetched.stats.listings_new, 1);
        assert!(matches!(
            get_run(State(state), Path("nope".to_string())).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn summary_counts_every_state() {
        let state = api_state(
            FakeTradeApi::new().with_template(
                "Hubris Circlet",
                vec![listing("L1", 5.0, "chaos"), listing("L2", 6.0, "chaos")],
            ),
        )
        .await;
        trigger_run(State(state.clone())).await.unwrap();

        let Json(summary) = get_listings_summary(State(state)).await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_state["live"], 2);
        assert_eq!(summary.by_state["disappeared_fast"], 0);
        assert_eq!(summary.by_state.len(), ListingState::ALL.len());
    }

    #[tokio::test]
    async fn listing_lookup() {
        let state = api_state(
            FakeTradeApi::new().with_template("Hubris Circlet", vec![listing("L1", 5.0, "chaos")]),
        )
        .await;
        trigger_run(State(state.clone())).await.unwrap();

        let Json(found) = get_listing(State(state.clone()), Path("L1".to_string())).await.unwrap();
        assert_eq!(found.base_type, "Hubris Circlet");
        assert_eq!(found.state, Some(ListingState::Live));
        assert_eq!(found.affixes.len(), 1);
        assert!(matches!(
            get_listing(State(state), Path("L9".to_string())).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn start_and_stop_report_changes() {
        let state = api_state(FakeTradeApi::new()).await;

        let Json(started) = start_collector(State(state.clone())).await;
        assert!(started.changed);
        assert!(started.running);

        let Json(again) = start_collector(State(state.clone())).await;
        assert!(!again.changed);

        let Json(stopped) = stop_collector(State(state.clone())).await;
        assert!(stopped.changed);
        assert!(!stopped.running);

        let Json(status) = get_status(State(state)).await;
        assert!(!status.running);
    }
}
