//! Reconciliation service.
//!
//! Built once at startup from a data directory, an account directory,
//! and a clock. Owns the shared ledger, the tracker loop, the cleanup
//! engine with its schedule, and the pair store.

use crate::reconcile::cleanup::CleanupEngine;
use crate::reconcile::clock::Clock;
use crate::reconcile::directory::AccountDirectory;
use crate::reconcile::ledger::ActivityLedger;
use crate::reconcile::pairs::PairStore;
use crate::reconcile::schedule::CleanupScheduler;
use crate::reconcile::store::JsonStore;
use crate::reconcile::tracker::ActivityTracker;
use crate::reconcile::types::*;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

pub type ReconcileServiceState = Arc<ReconcileService>;

pub struct ReconcileService {
    config: ReconcileConfig,
    ledger: Arc<RwLock<ActivityLedger>>,
    tracker: Arc<ActivityTracker>,
    engine: Arc<CleanupEngine>,
    scheduler: CleanupScheduler,
    pairs: Arc<PairStore>,
    tracker_task: Mutex<Option<JoinHandle<()>>>,
}

impl ReconcileService {
    /// Load persisted ledger and cleanup state from `config.data_dir`.
    pub fn open(config: ReconcileConfig, directory: Arc<dyn AccountDirectory>, clock: Arc<dyn Clock>) -> Self {
        let ledger_store: JsonStore<ActivityLedger> = JsonStore::new(config.ledger_path());
        let ledger = Arc::new(RwLock::new(ledger_store.load_or_default().normalized()));

        let cleanup_store: JsonStore<CleanupState> = JsonStore::new(config.cleanup_path());
        let state = cleanup_store.load_or_default();
        let pairs = Arc::new(PairStore::new(JsonStore::new(config.pairs_path()), clock.clone()));

        let tracker = Arc::new(ActivityTracker::new(
            directory.clone(),
            ledger.clone(),
            pairs.clone(),
            ledger_store,
            clock.clone(),
            Duration::from_secs(config.poll_interval_secs.max(1)),
        ));
        let engine = Arc::new(CleanupEngine::new(
            directory,
            ledger.clone(),
            pairs.clone(),
            cleanup_store,
            state,
            clock,
        ));

        Self {
            config,
            ledger,
            tracker,
            engine,
            scheduler: CleanupScheduler::new(),
            pairs,
            tracker_task: Mutex::new(None),
        }
    }

    pub fn new_state(
        config: ReconcileConfig,
        directory: Arc<dyn AccountDirectory>,
        clock: Arc<dyn Clock>,
    ) -> ReconcileServiceState {
        Arc::new(Self::open(config, directory, clock))
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Start the tracker loop and the cleanup schedule.
    pub async fn start(&self) -> Result<(), ReconcileError> {
        {
            let mut task = self.tracker_task.lock().await;
            if task.is_none() {
                *task = Some(self.tracker.clone().spawn());
                info!(
                    "Activity tracker polling every {}s",
                    self.config.poll_interval_secs.max(1)
                );
            }
        }
        let state = self.engine.state().await;
        self.scheduler
            .reschedule(self.engine.clone(), state.auto, &state.schedule_cron)
            .await
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.tracker_task.lock().await.take() {
            task.abort();
        }
        self.scheduler.stop().await;
        info!("Reconciliation stopped");
    }

    pub async fn is_tracking(&self) -> bool {
        self.tracker_task.lock().await.is_some()
    }

    /// Run one tracker poll now.
    pub async fn tick(&self) -> Result<TickReport, ReconcileError> {
        self.tracker.tick().await
    }

    pub async fn summary(&self) -> CleanupSummary {
        let state = self.engine.state().await;
        CleanupSummary {
            threshold_days: state.threshold_days,
            auto: state.auto,
            schedule_cron: state.schedule_cron,
            exclusions: state.exclusions,
            last_cleanup_ts: state.last_cleanup_ts,
            total_removed: state.total_removed,
            history: state.history,
            running: self.engine.is_running(),
            next_run: self.scheduler.next_run().await,
        }
    }

    /// Update cleanup settings and replace the background schedule.
    pub async fn update_config(&self, update: CleanupConfigUpdate) -> Result<CleanupSummary, ReconcileError> {
        let state = self.engine.update_config(update).await?;
        self.scheduler
            .reschedule(self.engine.clone(), state.auto, &state.schedule_cron)
            .await?;
        Ok(self.summary().await)
    }

    pub async fn run_once(&self, manual: bool) -> Result<CleanupReport, ReconcileError> {
        self.engine.run_once(CleanupTrigger::from_manual(manual)).await
    }

    pub async fn preview(&self) -> Result<CleanupPreview, ReconcileError> {
        self.engine.preview().await
    }

    pub fn pairs(&self) -> &PairStore {
        &self.pairs
    }

    pub async fn ledger_snapshot(&self) -> ActivityLedger {
        self.ledger.read().await.clone()
    }
}
