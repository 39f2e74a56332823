use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::clock::now_ns;
use crate::collector::latency::{CycleLatency, LatencySummary};
use crate::collector::lifecycle::LifecycleTracker;
use crate::collector::poller::PollingService;
use crate::config::{Config, STOP_TIMEOUT_SECS};
use crate::db::ListingStore;
use crate::error::Result;
use crate::types::{Game, RunRecord};

/// Snapshot returned by `Orchestrator::get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatus {
    pub running: bool,
    pub enabled: bool,
    pub interval_minutes: u64,
    pub league: String,
    pub game: Game,
    pub templates: Vec<String>,
    pub cycles_completed: u64,
    pub last_run: Option<RunRecord>,
    pub cycle_latency: LatencySummary,
}

/// One cycle: poll, then reconcile lifecycle, with run bookkeeping around both.
/// Shared by the background loop and manual triggers.
struct CycleRunner {
    poller: PollingService,
    tracker: LifecycleTracker,
    store: ListingStore,
    // Held for the whole cycle so loop and manual runs never interleave.
    cycle_lock: Mutex<()>,
    last_run: RwLock<Option<RunRecord>>,
    cycles_completed: AtomicU64,
    latency: CycleLatency,
}

impl CycleRunner {
    async fn run_cycle(&self) -> Result<RunRecord> {
        let _cycle = self.cycle_lock.lock().await;
        let clock = Instant::now();

        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = now_ns();
        self.store.insert_run(&run_id, started_at).await?;

        let (mut stats, seen) = self.poller.poll_once().await;

        let lifecycle = match self.tracker.update_listing_states(&seen, now_ns()).await {
            Ok(l) => Some(l),
            Err(e) => {
                error!(run_id = %run_id, "Lifecycle update failed: {e}");
                stats.record_error(format!("lifecycle: {e}"));
                None
            }
        };

        let completed_at = now_ns();
        self.store.finish_run(&run_id, completed_at, &stats).await?;

        let elapsed = clock.elapsed();
        self.latency.record(elapsed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);

        info!(
            run_id = %run_id,
            fetched = stats.listings_fetched,
            new = stats.listings_new,
            updated = stats.listings_updated,
            errors = stats.errors,
            elapsed_ms = elapsed.as_millis() as u64,
            "Cycle complete: {} fetched, {} new, {} updated, {} errors",
            stats.listings_fetched,
            stats.listings_new,
            stats.listings_updated,
            stats.errors,
        );

        let record = RunRecord {
            id: run_id,
            started_at,
            completed_at: Some(completed_at),
            stats,
            lifecycle,
        };
        if let Ok(mut last) = self.last_run.write() {
            *last = Some(record.clone());
        }
        Ok(record)
    }
}

/// Owns the scheduling loop. At most one loop task exists at a time.
pub struct Orchestrator {
    cfg: Config,
    runner: Arc<CycleRunner>,
    cancel: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    interval: Duration,
    stop_timeout: Duration,
}

impl Orchestrator {
    pub fn new(cfg: Config, poller: PollingService, tracker: LifecycleTracker, store: ListingStore) -> Self {
        let (cancel, _) = watch::channel(false);
        let interval = cfg.interval();
        Self {
            cfg,
            runner: Arc::new(CycleRunner {
                poller,
                tracker,
                store,
                cycle_lock: Mutex::new(()),
                last_run: RwLock::new(None),
                cycles_completed: AtomicU64::new(0),
                latency: CycleLatency::new(),
            }),
            cancel,
            handle: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            interval,
            stop_timeout: Duration::from_secs(STOP_TIMEOUT_SECS),
        }
    }

    #[cfg(test)]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[cfg(test)]
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Launch the loop. Returns false (and does nothing) when disabled or
    /// already running.
    pub async fn start(&self) -> bool {
        if !self.cfg.enabled {
            info!("Collector disabled; not starting the polling loop");
            return false;
        }

        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        self.cancel.send_replace(false);
        self.running.store(true, Ordering::SeqCst);
        let task = run_loop(
            Arc::clone(&self.runner),
            self.cancel.subscribe(),
            self.interval,
            Arc::clone(&self.running),
        );
        *handle = Some(tokio::spawn(task));

        info!(
            league = %self.cfg.league,
            templates = self.cfg.templates.len(),
            "Collector started: every {}m, {} templates",
            self.cfg.interval_minutes,
            self.cfg.templates.len(),
        );
        true
    }

    /// Cancel the loop and wait for it to exit, at most `stop_timeout`.
    /// An in-flight cycle is allowed to finish. Returns false if nothing was running.
    pub async fn stop(&self) -> bool {
        let mut handle = self.handle.lock().await;
        let Some(mut task) = handle.take() else {
            return false;
        };

        self.cancel.send_replace(true);
        match timeout(self.stop_timeout, &mut task).await {
            Ok(Ok(())) => info!("Collector stopped"),
            Ok(Err(e)) => error!("Collector loop ended abnormally: {e}"),
            Err(_) => {
                warn!(
                    timeout_secs = self.stop_timeout.as_secs(),
                    "Collector loop did not exit within {}s; it will stop after the current cycle",
                    self.stop_timeout.as_secs(),
                );
                *handle = Some(task);
            }
        }
        true
    }

    /// Run one cycle now, serialized with the loop.
    pub async fn run_once(&self) -> Result<RunRecord> {
        self.runner.run_cycle().await
    }

    /// In-memory bookkeeping only; never touches the database.
    pub fn get_status(&self) -> CollectorStatus {
        let last_run = self.runner.last_run.read().ok().and_then(|r| r.clone());
        CollectorStatus {
            running: self.running.load(Ordering::SeqCst),
            enabled: self.cfg.enabled,
            interval_minutes: self.cfg.interval_minutes,
            league: self.cfg.league.clone(),
            game: self.cfg.game,
            templates: self.cfg.templates.clone(),
            cycles_completed: self.runner.cycles_completed.load(Ordering::Relaxed),
            last_run,
            cycle_latency: self.runner.latency.summary(),
        }
    }
}

async fn run_loop(
    runner: Arc<CycleRunner>,
    mut cancel: watch::Receiver<bool>,
    interval: Duration,
    running: Arc<AtomicBool>,
) {
    loop {
        if *cancel.borrow() {
            break;
        }
        if let Err(e) = runner.run_cycle().await {
            error!("Collection cycle failed: {e}");
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.wait_for(|stop| *stop) => break,
        }
    }
    running.store(false, Ordering::SeqCst);
}
