//! Durable last-seen ledger.
//!
//! Maps a base name to the last time one of its accounts was seen with a
//! live session. Stamps only move forward: an older observation never
//! overwrites a newer one. On disk it is a flat `{ "<base>": <epoch ms> }`
//! object.

use crate::reconcile::names::{base_name, is_pseudo_account};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityLedger {
    entries: BTreeMap<String, i64>,
}

impl ActivityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-key entries loaded from disk, keeping the newest stamp per base.
    pub fn normalized(self) -> Self {
        let mut ledger = Self::new();
        for (name, ts) in self.entries {
            ledger.observe(&name, ts);
        }
        ledger
    }

    /// Record activity for `name` at `ts`. Returns whether the entry moved.
    pub fn observe(&mut self, name: &str, ts: i64) -> bool {
        if is_pseudo_account(name) {
            return false;
        }
        let base = base_name(name);
        if base.is_empty() {
            return false;
        }
        match self.entries.get_mut(&base) {
            Some(existing) if *existing >= ts => false,
            Some(existing) => {
                *existing = ts;
                true
            }
            None => {
                self.entries.insert(base, ts);
                true
            }
        }
    }

    /// Last stamp for the base of `name`.
    pub fn last_seen(&self, name: &str) -> Option<i64> {
        self.entries.get(&base_name(name)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
