//! Cleanup engine.
//!
//! A run moves through `Idle -> ComputingCandidates -> Deleting -> Idle`.
//! Candidates are base names from the current account inventory that are
//! not excluded, not online, present in the activity ledger, and whose
//! last-seen stamp is at least the threshold old. An account's base is
//! its role-stripped name, or its primary's base when it is a registered
//! pair companion. Every inventory account sharing a selected base is
//! deleted; one variant failing does not stop the others. Each finished run appends a history entry and persists
//! the state. Only one run may be in progress at a time.

use crate::reconcile::clock::Clock;
use crate::reconcile::directory::AccountDirectory;
use crate::reconcile::ledger::ActivityLedger;
use crate::reconcile::names::{base_name, is_pseudo_account};
use crate::reconcile::pairs::{CompanionIndex, PairStore};
use crate::reconcile::schedule::parse_schedule;
use crate::reconcile::store::JsonStore;
use crate::reconcile::types::*;
use log::{info, warn};
use sehub_softether::softether::{Account, BulkOutcome, Session};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Where a cleanup run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CleanupPhase {
    Idle,
    ComputingCandidates,
    Deleting,
}

impl CleanupPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::ComputingCandidates,
            2 => Self::Deleting,
            _ => Self::Idle,
        }
    }
}

// ── Candidate selection ─────────────────────────────────────────────

/// Select inactive base names from the given inventory.
pub fn compute_candidates(
    accounts: &[Account],
    sessions: &[Session],
    ledger: &ActivityLedger,
    companions: &CompanionIndex,
    exclusions: &[String],
    threshold_days: u32,
    now_ms: i64,
) -> CleanupPreview {
    let excluded: BTreeSet<String> = exclusions.iter().map(|e| base_name(e)).collect();
    let online: BTreeSet<String> = sessions
        .iter()
        .filter_map(|s| s.account.as_deref())
        .map(|name| companions.base_of(name))
        .collect();

    let mut variants: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for account in accounts {
        if is_pseudo_account(&account.name) {
            continue;
        }
        let base = companions.base_of(&account.name);
        if base.is_empty() {
            continue;
        }
        variants.entry(base).or_default().push(account.name.clone());
    }

    let threshold_ms = i64::from(threshold_days) * DAY_MS;
    let mut preview = CleanupPreview {
        threshold_days,
        ..Default::default()
    };
    for (base, mut names) in variants {
        if excluded.contains(&base) || online.contains(&base) {
            continue;
        }
        let Some(last_seen_ts) = ledger.last_seen(&base) else {
            preview.never_observed.push(base);
            continue;
        };
        if now_ms.saturating_sub(last_seen_ts) >= threshold_ms {
            names.sort();
            preview.candidates.push(CleanupCandidate {
                base,
                last_seen_ts,
                variants: names,
            });
        }
    }
    preview
}

// ── Engine ──────────────────────────────────────────────────────────

pub struct CleanupEngine {
    directory: Arc<dyn AccountDirectory>,
    ledger: Arc<RwLock<ActivityLedger>>,
    pairs: Arc<PairStore>,
    state: RwLock<CleanupState>,
    store: JsonStore<CleanupState>,
    // Held from snapshot to write so saves land in order.
    write_turn: Mutex<()>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    phase: AtomicU8,
}

/// Clears the in-progress flag when a run ends, however it ends.
struct RunGuard<'a> {
    engine: &'a CleanupEngine,
}

impl RunGuard<'_> {
    fn enter(&self, phase: CleanupPhase) {
        self.engine.phase.store(phase as u8, Ordering::SeqCst);
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.engine.phase.store(CleanupPhase::Idle as u8, Ordering::SeqCst);
        self.engine.running.store(false, Ordering::SeqCst);
    }
}

impl CleanupEngine {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        ledger: Arc<RwLock<ActivityLedger>>,
        pairs: Arc<PairStore>,
        store: JsonStore<CleanupState>,
        state: CleanupState,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            ledger,
            pairs,
            state: RwLock::new(state),
            store,
            write_turn: Mutex::new(()),
            clock,
            running: AtomicBool::new(false),
            phase: AtomicU8::new(CleanupPhase::Idle as u8),
        }
    }

    pub async fn state(&self) -> CleanupState {
        self.state.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> CleanupPhase {
        CleanupPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn begin(&self) -> Result<RunGuard<'_>, ReconcileError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ReconcileError::already_running("A cleanup run is already in progress"))?;
        Ok(RunGuard { engine: self })
    }

    /// Current candidates, without deleting anything.
    pub async fn preview(&self) -> Result<CleanupPreview, ReconcileError> {
        let (threshold_days, exclusions) = {
            let state = self.state.read().await;
            (state.threshold_days, state.exclusions.clone())
        };
        let accounts = self.directory.accounts().await?;
        let sessions = self.directory.sessions().await?;
        let companions = self.pairs.companions().await?;
        let ledger = self.ledger.read().await;
        Ok(compute_candidates(
            &accounts,
            &sessions,
            &ledger,
            &companions,
            &exclusions,
            threshold_days,
            self.clock.now_ms(),
        ))
    }

    /// Select and delete inactive accounts, then record the run.
    pub async fn run_once(&self, trigger: CleanupTrigger) -> Result<CleanupReport, ReconcileError> {
        let guard = self.begin()?;

        guard.enter(CleanupPhase::ComputingCandidates);
        let preview = self.preview().await?;

        guard.enter(CleanupPhase::Deleting);
        let mut outcome = BulkOutcome::default();
        for candidate in &preview.candidates {
            for variant in &candidate.variants {
                let result = self.directory.delete_account(variant).await;
                if let Err(e) = &result {
                    warn!("Cleanup could not delete '{}': {}", variant, e);
                }
                outcome.record(variant.as_str(), result);
            }
        }

        let ts = self.clock.now_ms();
        let removed = u32::try_from(outcome.succeeded.len()).unwrap_or(u32::MAX);
        let _turn = self.write_turn.lock().await;
        let snapshot = {
            let mut state = self.state.write().await;
            let criteria = state.criteria();
            state.history.push(HistoryEntry {
                ts,
                trigger,
                removed,
                criteria,
                by: trigger.actor(),
            });
            let overflow = state.history.len().saturating_sub(MAX_HISTORY);
            state.history.drain(..overflow);
            state.total_removed += u64::from(removed);
            state.last_cleanup_ts = Some(ts);
            state.clone()
        };
        self.store.persist(&snapshot).await?;

        info!(
            "{:?} cleanup removed {} of {} variants across {} inactive bases",
            trigger,
            removed,
            removed as usize + outcome.failed.len(),
            preview.candidates.len()
        );
        Ok(CleanupReport {
            trigger,
            ts,
            removed,
            candidates: preview.candidates,
            deleted: outcome.succeeded,
            failed: outcome.failed,
        })
    }

    /// Apply a partial configuration change and persist it.
    ///
    /// The schedule is validated before anything changes, so an invalid
    /// expression leaves the previous configuration in place.
    pub async fn update_config(&self, update: CleanupConfigUpdate) -> Result<CleanupState, ReconcileError> {
        if let Some(expr) = &update.schedule_cron {
            parse_schedule(expr)?;
        }

        let _turn = self.write_turn.lock().await;
        let snapshot = {
            let mut state = self.state.write().await;
            if let Some(days) = update.threshold_days {
                state.threshold_days = u32::try_from(days.max(1)).unwrap_or(u32::MAX);
            }
            if let Some(auto) = update.auto {
                state.auto = auto;
            }
            if let Some(expr) = update.schedule_cron {
                state.schedule_cron = expr.trim().to_string();
            }
            if let Some(exclusions) = update.exclusions {
                let normalized: BTreeSet<String> = exclusions
                    .iter()
                    .map(|e| base_name(e))
                    .filter(|e| !e.is_empty())
                    .collect();
                state.exclusions = normalized.into_iter().collect();
            }
            state.clone()
        };
        self.store.persist(&snapshot).await?;
        info!(
            "Cleanup config updated: threshold {} days, auto {}, schedule '{}', {} exclusions",
            snapshot.threshold_days,
            snapshot.auto,
            snapshot.schedule_cron,
            snapshot.exclusions.len()
        );
        Ok(snapshot)
    }
}
