//! Pair records.
//!
//! Correlates a primary account with its companion account and the
//! address allocated to it. Stored as `{ "pairs": [...] }`, keyed by the
//! normalized primary name. A registered companion counts as a variant
//! of its primary for activity tracking and cleanup.

use crate::reconcile::clock::Clock;
use crate::reconcile::names::{base_name, normalize_name};
use crate::reconcile::store::JsonStore;
use crate::reconcile::types::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairBook {
    pub pairs: Vec<PairRecord>,
}

impl PairBook {
    fn position(&self, primary: &str) -> Option<usize> {
        let key = normalize_name(primary);
        self.pairs.iter().position(|p| normalize_name(&p.primary) == key)
    }
}

/// Base name every account is grouped under, honouring registered
/// companions whose names do not share the primary's base.
#[derive(Debug, Clone, Default)]
pub struct CompanionIndex {
    bases: HashMap<String, String>,
}

impl CompanionIndex {
    pub fn new(pairs: &[PairRecord]) -> Self {
        let bases = pairs
            .iter()
            .filter_map(|p| {
                let companion = normalize_name(p.companion.as_deref()?);
                let primary = base_name(&p.primary);
                (!companion.is_empty() && !primary.is_empty()).then_some((companion, primary))
            })
            .collect();
        Self { bases }
    }

    pub fn base_of(&self, raw: &str) -> String {
        self.bases
            .get(&normalize_name(raw))
            .cloned()
            .unwrap_or_else(|| base_name(raw))
    }
}

pub struct PairStore {
    store: JsonStore<PairBook>,
    clock: Arc<dyn Clock>,
    // Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl PairStore {
    pub fn new(store: JsonStore<PairBook>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            lock: Mutex::new(()),
        }
    }

    /// Insert or update the record for `primary`.
    ///
    /// `None` fields keep their stored value on update.
    pub async fn upsert(
        &self,
        primary: &str,
        companion: Option<String>,
        address: Option<String>,
    ) -> Result<PairRecord, ReconcileError> {
        let primary = primary.trim();
        if normalize_name(primary).is_empty() {
            return Err(ReconcileError::config("Pair primary name is empty"));
        }

        let _held = self.lock.lock().await;
        let mut book = self.store.load()?;
        let now = self.clock.now();

        let record = match book.position(primary) {
            Some(i) => {
                let existing = &mut book.pairs[i];
                if companion.is_some() {
                    existing.companion = companion;
                }
                if address.is_some() {
                    existing.address = address;
                }
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let record = PairRecord {
                    primary: primary.to_string(),
                    companion,
                    address,
                    created_at: now,
                    updated_at: now,
                };
                book.pairs.push(record.clone());
                info!("Registered pair for '{}'", primary);
                record
            }
        };
        self.store.persist(&book).await?;
        Ok(record)
    }

    pub async fn get(&self, primary: &str) -> Result<Option<PairRecord>, ReconcileError> {
        let _held = self.lock.lock().await;
        let book = self.store.load()?;
        Ok(book.position(primary).map(|i| book.pairs[i].clone()))
    }

    /// Remove the record for `primary`; `NotFound` when absent.
    pub async fn remove(&self, primary: &str) -> Result<PairRecord, ReconcileError> {
        let _held = self.lock.lock().await;
        let mut book = self.store.load()?;
        let i = book
            .position(primary)
            .ok_or_else(|| ReconcileError::not_found(format!("No pair registered for '{}'", primary.trim())))?;
        let removed = book.pairs.remove(i);
        self.store.persist(&book).await?;
        Ok(removed)
    }

    pub async fn list(&self) -> Result<Vec<PairRecord>, ReconcileError> {
        let _held = self.lock.lock().await;
        Ok(self.store.load()?.pairs)
    }

    pub async fn companions(&self) -> Result<CompanionIndex, ReconcileError> {
        Ok(CompanionIndex::new(&self.list().await?))
    }
}
