//! Core types for account reconciliation.
//!
//! Error taxonomy, persisted cleanup state and history, configuration
//! updates, and the reports returned by tracker ticks and cleanup runs.

use chrono::{DateTime, Utc};
use sehub_softether::softether::{BulkFailure, SoftEtherError, SoftEtherErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One day in milliseconds.
pub const DAY_MS: i64 = 86_400_000;

/// Newest history entries kept in the cleanup state file.
pub const MAX_HISTORY: usize = 500;

// ── Error types ─────────────────────────────────────────────────────

/// Reconciliation error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileErrorKind {
    /// Listing or deleting through the hub failed.
    Directory,
    /// Reading or writing a JSON store failed.
    Store,
    /// Invalid cleanup configuration.
    Config,
    /// A cleanup run is already in progress.
    AlreadyRunning,
    /// The referenced record does not exist.
    NotFound,
}

/// A reconciliation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileError {
    pub kind: ReconcileErrorKind,
    pub message: String,
    /// Underlying hub error kind for `Directory` failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_kind: Option<SoftEtherErrorKind>,
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ReconcileError {}

impl From<ReconcileError> for String {
    fn from(e: ReconcileError) -> String {
        e.message
    }
}

impl From<SoftEtherError> for ReconcileError {
    fn from(e: SoftEtherError) -> Self {
        Self {
            kind: ReconcileErrorKind::Directory,
            hub_kind: Some(e.kind),
            message: e.to_string(),
        }
    }
}

impl ReconcileError {
    pub fn new(kind: ReconcileErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            hub_kind: None,
        }
    }
    pub fn store(msg: impl Into<String>) -> Self {
        Self::new(ReconcileErrorKind::Store, msg)
    }
    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ReconcileErrorKind::Config, msg)
    }
    pub fn already_running(msg: impl Into<String>) -> Self {
        Self::new(ReconcileErrorKind::AlreadyRunning, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ReconcileErrorKind::NotFound, msg)
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Where reconciliation keeps its files and how often it polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileConfig {
    pub data_dir: PathBuf,
    pub poll_interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            poll_interval_secs: 60,
        }
    }
}

impl ReconcileConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("lastSeen.json")
    }

    pub fn cleanup_path(&self) -> PathBuf {
        self.data_dir.join("cleanup.json")
    }

    pub fn pairs_path(&self) -> PathBuf {
        self.data_dir.join("pairs.json")
    }
}

// ── Cleanup state ───────────────────────────────────────────────────

/// How a cleanup run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CleanupTrigger {
    Manual,
    Auto,
}

impl CleanupTrigger {
    pub fn from_manual(manual: bool) -> Self {
        if manual {
            Self::Manual
        } else {
            Self::Auto
        }
    }

    pub fn actor(self) -> CleanupActor {
        match self {
            Self::Manual => CleanupActor::Admin,
            Self::Auto => CleanupActor::System,
        }
    }
}

/// Who is recorded as having run the cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CleanupActor {
    Admin,
    System,
}

/// One audit line per completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Epoch milliseconds.
    pub ts: i64,
    #[serde(rename = "type")]
    pub trigger: CleanupTrigger,
    pub removed: u32,
    pub criteria: String,
    pub by: CleanupActor,
}

/// Persisted cleanup configuration and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CleanupState {
    pub threshold_days: u32,
    pub auto: bool,
    pub schedule_cron: String,
    pub exclusions: Vec<String>,
    pub total_removed: u64,
    pub last_cleanup_ts: Option<i64>,
    pub history: Vec<HistoryEntry>,
}

impl Default for CleanupState {
    fn default() -> Self {
        Self {
            threshold_days: 30,
            auto: true,
            schedule_cron: "0 2 * * *".to_string(),
            exclusions: Vec::new(),
            total_removed: 0,
            last_cleanup_ts: None,
            history: Vec::new(),
        }
    }
}

impl CleanupState {
    pub fn criteria(&self) -> String {
        format!("Inactive > {} days", self.threshold_days)
    }

    pub fn threshold_ms(&self) -> i64 {
        i64::from(self.threshold_days) * DAY_MS
    }
}

/// Partial configuration change; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CleanupConfigUpdate {
    pub threshold_days: Option<i64>,
    pub auto: Option<bool>,
    pub schedule_cron: Option<String>,
    pub exclusions: Option<Vec<String>>,
}

// ── Reports ─────────────────────────────────────────────────────────

/// An inactive base name and the accounts that would be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupCandidate {
    pub base: String,
    pub last_seen_ts: i64,
    pub variants: Vec<String>,
}

/// Candidates without deleting anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPreview {
    pub threshold_days: u32,
    pub candidates: Vec<CleanupCandidate>,
    /// Bases with no ledger entry; never selected automatically.
    pub never_observed: Vec<String>,
}

/// Outcome of one cleanup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub trigger: CleanupTrigger,
    pub ts: i64,
    pub removed: u32,
    pub candidates: Vec<CleanupCandidate>,
    pub deleted: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

/// Cleanup configuration, counters, and scheduler status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub threshold_days: u32,
    pub auto: bool,
    pub schedule_cron: String,
    pub exclusions: Vec<String>,
    pub last_cleanup_ts: Option<i64>,
    pub total_removed: u64,
    pub history: Vec<HistoryEntry>,
    pub running: bool,
    pub next_run: Option<DateTime<Utc>>,
}

/// Result of one tracker poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub ts: i64,
    /// Base names stamped during this tick.
    pub observed: Vec<String>,
}

// ── Pairs ───────────────────────────────────────────────────────────

/// A primary account with its companion account and allocated address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRecord {
    pub primary: String,
    pub companion: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
