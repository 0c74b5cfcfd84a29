//! Reconcile module root – re-exports public API surface.

pub mod types;
pub mod names;
pub mod store;
pub mod clock;
pub mod directory;
pub mod ledger;
pub mod tracker;
pub mod cleanup;
pub mod schedule;
pub mod pairs;
pub mod service;

pub use types::*;
pub use cleanup::{compute_candidates, CleanupEngine, CleanupPhase};
pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::AccountDirectory;
pub use ledger::ActivityLedger;
pub use names::{base_name, normalize_name};
pub use pairs::{CompanionIndex, PairBook, PairStore};
pub use schedule::{next_fire, parse_schedule, CleanupScheduler};
pub use store::JsonStore;
pub use tracker::ActivityTracker;
pub use service::{ReconcileService, ReconcileServiceState};
