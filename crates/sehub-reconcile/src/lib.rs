//! # sehub-reconcile
//!
//! Reconciles hub accounts against observed activity and retires the
//! inactive ones.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **types** | Errors, cleanup state, history, reports, pair records |
//! | **names** | Base-name normalization shared by ledger and cleanup |
//! | **store** | Whole-document JSON files with atomic replace |
//! | **clock** | Wall-clock abstraction with a manual test clock |
//! | **directory** | Account/session source the reconciler works against |
//! | **ledger** | Durable, monotonic last-seen map |
//! | **tracker** | Periodic session poller feeding the ledger |
//! | **cleanup** | Candidate selection and inactive-account removal |
//! | **schedule** | Cron-driven background cleanup runs |
//! | **pairs** | Primary/companion pair records |
//! | **service** | Top-level service wiring the above together |

pub mod reconcile;
