//! Base-name normalization.
//!
//! Ledger keys, exclusions, and cleanup candidates are all compared by
//! base name: domain suffix and role suffix stripped, then case-folded.
//! `Alice@corp`, `alice-android`, and `ALICE-MT` share the base `alice`.

/// Role suffixes that mark a companion account of the same person.
pub const ROLE_SUFFIXES: &[&str] = &["android", "mikrotik", "mt"];

/// Lowercase pseudo-account name the tracker and cleanup always skip.
pub const PSEUDO_ACCOUNT: &str = "securenat";

/// Trim, drop any `@domain` or `/`/`\` qualified tail, and lowercase.
pub fn normalize_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let cut = trimmed
        .find(|c| matches!(c, '@' | '/' | '\\'))
        .unwrap_or(trimmed.len());
    trimmed[..cut].trim().to_lowercase()
}

/// Normalized name with one trailing `-<role>` suffix removed.
pub fn base_name(raw: &str) -> String {
    let normalized = normalize_name(raw);
    for suffix in ROLE_SUFFIXES {
        if let Some(stem) = normalized.strip_suffix(suffix) {
            if let Some(stem) = stem.strip_suffix('-') {
                if !stem.is_empty() {
                    return stem.to_string();
                }
            }
        }
    }
    normalized
}

/// Whether a raw account name is the server's built-in pseudo-account.
pub fn is_pseudo_account(raw: &str) -> bool {
    normalize_name(raw) == PSEUDO_ACCOUNT
}
