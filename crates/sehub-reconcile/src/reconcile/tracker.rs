//! Activity tracker.
//!
//! Polls current sessions on a fixed interval and stamps the ledger entry
//! of every session's base name with the current time, persisting the
//! ledger after each tick. A registered pair companion stamps its
//! primary's base. A failed tick is logged and the loop carries
//! on with the next one.

use crate::reconcile::clock::Clock;
use crate::reconcile::directory::AccountDirectory;
use crate::reconcile::ledger::ActivityLedger;
use crate::reconcile::names::is_pseudo_account;
use crate::reconcile::pairs::{CompanionIndex, PairStore};
use crate::reconcile::store::JsonStore;
use crate::reconcile::types::*;
use log::{debug, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

pub struct ActivityTracker {
    directory: Arc<dyn AccountDirectory>,
    ledger: Arc<RwLock<ActivityLedger>>,
    pairs: Arc<PairStore>,
    store: JsonStore<ActivityLedger>,
    // Held from snapshot to write so saves land in order.
    write_turn: Mutex<()>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ActivityTracker {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        ledger: Arc<RwLock<ActivityLedger>>,
        pairs: Arc<PairStore>,
        store: JsonStore<ActivityLedger>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            directory,
            ledger,
            pairs,
            store,
            write_turn: Mutex::new(()),
            clock,
            interval,
        }
    }

    /// Poll sessions once and persist the ledger.
    pub async fn tick(&self) -> Result<TickReport, ReconcileError> {
        let sessions = self.directory.sessions().await?;
        let ts = self.clock.now_ms();
        let companions = self.pairs.companions().await.unwrap_or_else(|e| {
            warn!("Tracking without pair records: {}", e);
            CompanionIndex::default()
        });

        let observed: BTreeSet<String> = sessions
            .iter()
            .filter_map(|s| s.account.as_deref())
            .filter(|name| !is_pseudo_account(name))
            .map(|name| companions.base_of(name))
            .filter(|base| !base.is_empty())
            .collect();

        let _turn = self.write_turn.lock().await;
        let body = {
            let mut ledger = self.ledger.write().await;
            for base in &observed {
                ledger.observe(base, ts);
            }
            self.store.encode(&ledger)?
        };
        self.store.write(body).await?;

        debug!("Tracker tick stamped {} base names", observed.len());
        Ok(TickReport {
            ts,
            observed: observed.into_iter().collect(),
        })
    }

    /// Run `tick` forever; the first tick fires immediately.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = self.tick().await {
                    warn!("Activity tracker tick failed, retrying next interval: {}", e);
                }
            }
        })
    }
}
