//! Error type returned to collaborators.
//!
//! Hub and reconciliation failures are folded into one taxonomy so a
//! caller can decide between retrying later, fixing its input, or
//! reporting a conflict without knowing which crate failed.

use sehub_reconcile::reconcile::{ReconcileError, ReconcileErrorKind};
use sehub_softether::softether::{SoftEtherError, SoftEtherErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiErrorKind {
    /// Hub busy, locked, or timed out after the retry budget.
    TransientExternal,
    /// Definitive `vpncmd` failure unrelated to contention.
    PermanentExternal,
    Parse,
    NotFound,
    Config,
    /// Conflicts with work already in progress.
    Conflict,
    InvalidInput,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<ApiError> for String {
    fn from(e: ApiError) -> String {
        e.message
    }
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }
    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Config, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, msg)
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Internal, msg)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ApiErrorKind::TransientExternal
    }
}

fn hub_kind(kind: SoftEtherErrorKind) -> ApiErrorKind {
    match kind {
        SoftEtherErrorKind::Busy | SoftEtherErrorKind::Timeout => ApiErrorKind::TransientExternal,
        SoftEtherErrorKind::Process => ApiErrorKind::PermanentExternal,
        SoftEtherErrorKind::NotFound => ApiErrorKind::NotFound,
        SoftEtherErrorKind::Parse => ApiErrorKind::Parse,
        SoftEtherErrorKind::InvalidInput => ApiErrorKind::InvalidInput,
        SoftEtherErrorKind::Config => ApiErrorKind::Config,
        SoftEtherErrorKind::Io => ApiErrorKind::Internal,
    }
}

impl From<SoftEtherError> for ApiError {
    fn from(e: SoftEtherError) -> Self {
        Self::new(hub_kind(e.kind), e.to_string())
    }
}

impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        let kind = match e.kind {
            ReconcileErrorKind::Directory => e.hub_kind.map(hub_kind).unwrap_or(ApiErrorKind::PermanentExternal),
            ReconcileErrorKind::Store => ApiErrorKind::Internal,
            ReconcileErrorKind::Config => ApiErrorKind::Config,
            ReconcileErrorKind::AlreadyRunning => ApiErrorKind::Conflict,
            ReconcileErrorKind::NotFound => ApiErrorKind::NotFound,
        };
        Self::new(kind, e.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_errors_map_to_taxonomy() {
        let cases = [
            (SoftEtherError::busy("x"), ApiErrorKind::TransientExternal),
            (SoftEtherError::timeout("x"), ApiErrorKind::TransientExternal),
            (SoftEtherError::process("x"), ApiErrorKind::PermanentExternal),
            (SoftEtherError::not_found("x"), ApiErrorKind::NotFound),
            (SoftEtherError::parse("x"), ApiErrorKind::Parse),
            (SoftEtherError::invalid_input("x"), ApiErrorKind::InvalidInput),
        ];
        for (err, kind) in cases {
            assert_eq!(ApiError::from(err).kind, kind);
        }
    }

    #[test]
    fn reconcile_errors_keep_hub_cause() {
        let wrapped: ReconcileError = SoftEtherError::timeout("slow hub").into();
        let api = ApiError::from(wrapped);
        assert!(api.is_transient());
        assert!(api.message.contains("slow hub"));

        let running = ApiError::from(ReconcileError::already_running("busy"));
        assert_eq!(running.kind, ApiErrorKind::Conflict);
        assert_eq!(String::from(running), "busy");
    }
}
