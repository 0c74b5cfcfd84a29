//! Core types for the SoftEther hub integration.
//!
//! Defines the error taxonomy, retry policy, `vpncmd` invocations,
//! service configuration, and the typed records produced by the parser.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Built-in pseudo-account the server uses for its virtual NAT.
pub const SECURENAT_ACCOUNT: &str = "SecureNAT";

/// `vpncmd` error code reported when the referenced object does not exist.
pub const ERR_OBJECT_NOT_FOUND: u32 = 29;

// ── Error types ─────────────────────────────────────────────────────

/// SoftEther-specific error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoftEtherErrorKind {
    /// The hub or the lock file reported contention.
    Busy,
    /// The call did not finish within its time bound.
    Timeout,
    /// `vpncmd` failed for a reason unrelated to contention.
    Process,
    /// The referenced account, session, or rule does not exist.
    NotFound,
    /// Output did not have a recognizable shape.
    Parse,
    /// Caller-supplied value was rejected before reaching the hub.
    InvalidInput,
    /// Local filesystem or spawn failure.
    Io,
    /// Invalid configuration.
    Config,
}

/// A SoftEther integration error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftEtherError {
    pub kind: SoftEtherErrorKind,
    pub message: String,
    /// Embedded `Error code: N` from `vpncmd`, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
}

impl fmt::Display for SoftEtherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{:?}: {} (error code {})", self.kind, self.message, code),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for SoftEtherError {}

impl From<SoftEtherError> for String {
    fn from(e: SoftEtherError) -> String {
        e.message
    }
}

impl SoftEtherError {
    pub fn new(kind: SoftEtherErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into(), code: None }
    }
    pub fn busy(msg: impl Into<String>) -> Self {
        Self::new(SoftEtherErrorKind::Busy, msg)
    }
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(SoftEtherErrorKind::Timeout, msg)
    }
    pub fn process(msg: impl Into<String>) -> Self {
        Self::new(SoftEtherErrorKind::Process, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(SoftEtherErrorKind::NotFound, msg)
    }
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(SoftEtherErrorKind::Parse, msg)
    }
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(SoftEtherErrorKind::InvalidInput, msg)
    }
    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(SoftEtherErrorKind::Io, msg)
    }
    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(SoftEtherErrorKind::Config, msg)
    }

    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }

    /// Contention failures the broker absorbs with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, SoftEtherErrorKind::Busy | SoftEtherErrorKind::Timeout)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == SoftEtherErrorKind::NotFound
    }
}

// ── Retry policy ────────────────────────────────────────────────────

/// Exponential backoff applied by the broker to transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_backoff_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (0-indexed): `base * 2^attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }

    /// Whether another attempt is allowed after `attempt` retries.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

// ── Invocations ─────────────────────────────────────────────────────

/// One unit of work for `vpncmd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// A single command passed through `/CMD`.
    Command { command: String, args: Vec<String> },
    /// Newline-separated lines piped to an interactive session.
    Script(Vec<String>),
}

impl Invocation {
    pub fn command<I, S>(command: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Command {
            command: command.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn script<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Script(lines.into_iter().map(Into::into).collect())
    }

    /// The `vpncmd` command name, used for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Command { command, .. } => command,
            Self::Script(lines) => lines.first().map(String::as_str).unwrap_or("script"),
        }
    }

    /// Human-readable rendering with password arguments masked.
    pub fn redacted(&self) -> String {
        match self {
            Self::Command { command, args } => {
                let mut parts = vec![command.clone()];
                parts.extend(args.iter().map(|a| redact_token(a)));
                parts.join(" ")
            }
            Self::Script(lines) => lines
                .iter()
                .map(|line| {
                    line.split_whitespace()
                        .map(redact_token)
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect::<Vec<_>>()
                .join(" ; "),
        }
    }
}

fn redact_token(token: &str) -> String {
    let upper = token.to_ascii_uppercase();
    if upper.starts_with("/PASSWORD:") {
        "/PASSWORD:********".to_string()
    } else {
        token.to_string()
    }
}

/// Raw result of one `vpncmd` process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn failure(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }

    pub fn exited_ok(&self) -> bool {
        self.exit_code == Some(0)
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Connection and behaviour settings for the hub integration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SoftEtherConfig {
    pub vpncmd_path: String,
    /// `host` or `host:port`.
    pub server: String,
    pub hub: String,
    #[serde(skip_serializing)]
    pub hub_password: Option<String>,
    pub timeout_ms: u64,
    /// Advisory lock shared with other processes driving `vpncmd`.
    pub lock_file: Option<PathBuf>,
    pub lock_wait_ms: u64,
    pub cache_ttl_ms: u64,
    pub retry: RetryPolicy,
    /// Directory holding generated `<name>.ovpn` client profiles.
    pub profile_dir: Option<PathBuf>,
    /// Suffix of the companion account in a pair (`<primary>-<suffix>`).
    pub companion_suffix: String,
}

impl Default for SoftEtherConfig {
    fn default() -> Self {
        Self {
            vpncmd_path: "/usr/bin/vpncmd".to_string(),
            server: "localhost:5555".to_string(),
            hub: "VPN".to_string(),
            hub_password: None,
            timeout_ms: 30_000,
            lock_file: Some(PathBuf::from("/tmp/vpncmd.lock")),
            lock_wait_ms: 5_000,
            cache_ttl_ms: 5_000,
            retry: RetryPolicy::default(),
            profile_dir: None,
            companion_suffix: "mt".to_string(),
        }
    }
}

impl fmt::Debug for SoftEtherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftEtherConfig")
            .field("vpncmd_path", &self.vpncmd_path)
            .field("server", &self.server)
            .field("hub", &self.hub)
            .field("hub_password", &self.hub_password.as_ref().map(|_| "********"))
            .field("timeout_ms", &self.timeout_ms)
            .field("lock_file", &self.lock_file)
            .field("lock_wait_ms", &self.lock_wait_ms)
            .field("cache_ttl_ms", &self.cache_ttl_ms)
            .field("retry", &self.retry)
            .field("profile_dir", &self.profile_dir)
            .field("companion_suffix", &self.companion_suffix)
            .finish()
    }
}

impl SoftEtherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

// ── Hub records ─────────────────────────────────────────────────────

/// A user account registered on the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub name: String,
    pub group: Option<String>,
    pub full_name: Option<String>,
    pub auth_method: Option<String>,
    pub num_logins: Option<u64>,
    pub last_login: Option<DateTime<Utc>>,
    /// Derived from the current session inventory.
    pub online: bool,
}

impl Account {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: None,
            full_name: None,
            auth_method: None,
            num_logins: None,
            last_login: None,
            online: false,
        }
    }
}

/// A connected session. Exists only while the client is connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub name: String,
    pub account: Option<String>,
    pub client_address: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
}

impl Session {
    /// Sessions owned by the virtual NAT rather than a real user.
    pub fn is_securenat(&self) -> bool {
        let owner_is_nat = self
            .account
            .as_deref()
            .map(|a| a.eq_ignore_ascii_case(SECURENAT_ACCOUNT))
            .unwrap_or(false);
        owner_is_nat || self.name.to_ascii_uppercase().contains("SECURENAT")
    }
}

/// Access rule verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
}

impl RuleAction {
    /// Keyword `AccessAdd` expects.
    pub fn cli_keyword(self) -> &'static str {
        match self {
            Self::Allow => "Pass",
            Self::Deny => "Discard",
        }
    }

    pub fn from_cli(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pass" | "allow" | "permit" => Some(Self::Allow),
            "discard" | "deny" | "drop" => Some(Self::Deny),
            _ => None,
        }
    }
}

/// An access list entry as reported by `AccessList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    pub id: u32,
    pub priority: Option<u32>,
    pub action: Option<RuleAction>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub memo: Option<String>,
    /// Every rendered field value, in output order.
    pub fields: Vec<String>,
}

impl AccessRule {
    /// Case-insensitive substring match over every rendered field.
    pub fn mentions(&self, name: &str) -> bool {
        let needle = name.to_lowercase();
        !needle.is_empty() && self.fields.iter().any(|f| f.to_lowercase().contains(&needle))
    }
}

/// Per-account detail from `UserGet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetail {
    pub name: String,
    pub group: Option<String>,
    pub full_name: Option<String>,
    pub description: Option<String>,
    pub auth_method: Option<String>,
    pub num_logins: Option<u64>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Every key/value pair as printed.
    pub fields: BTreeMap<String, String>,
}

/// Request to create a hub account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub group: Option<String>,
}

/// Two accounts that may only reach each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPair {
    pub primary: String,
    pub companion: String,
}

impl AccountPair {
    pub fn new(primary: impl Into<String>, companion: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            companion: companion.into(),
        }
    }

    /// `<primary>-<suffix>` companion naming.
    pub fn with_suffix(primary: &str, suffix: &str) -> Self {
        Self::new(primary, format!("{}-{}", primary, suffix))
    }
}

// ── Bulk results ────────────────────────────────────────────────────

/// Item that failed inside a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    pub item: String,
    pub error: String,
}

/// Succeeded/failed breakdown of a bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

impl BulkOutcome {
    pub fn record(&mut self, item: impl Into<String>, result: Result<(), SoftEtherError>) {
        match result {
            Ok(()) => self.succeeded.push(item.into()),
            Err(e) => self.failed.push(BulkFailure {
                item: item.into(),
                error: e.to_string(),
            }),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
