//! Access list rules for account pairs.
//!
//! A pair `(u, m)` gets two Allow rules between its members and one Deny
//! rule per member. Allow rules carry a lower priority number so the hub
//! evaluates them before the Deny rules, which leaves the pair able to
//! reach only each other.

use crate::softether::broker::CommandBroker;
use crate::softether::types::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Priority of the pair's Allow rules.
pub const ALLOW_PRIORITY: u32 = 10;
/// Priority of the pair's Deny rules.
pub const DENY_PRIORITY: u32 = 20;

/// A rule to be created with `AccessAdd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    pub action: RuleAction,
    pub priority: u32,
    pub source: String,
    /// `None` matches any destination.
    pub destination: Option<String>,
    pub memo: String,
}

impl RuleSpec {
    pub fn allow(source: &str, destination: &str) -> Self {
        Self {
            action: RuleAction::Allow,
            priority: ALLOW_PRIORITY,
            source: source.to_string(),
            destination: Some(destination.to_string()),
            memo: format!("{}_to_{}", source, destination),
        }
    }

    pub fn deny(source: &str) -> Self {
        Self {
            action: RuleAction::Deny,
            priority: DENY_PRIORITY,
            source: source.to_string(),
            destination: None,
            memo: format!("drop_{}", source),
        }
    }

    /// Answers to the interactive `AccessAdd` prompts, in prompt order:
    /// memo, priority, action, source user, destination user, source and
    /// destination MAC, source and destination network, protocol, source
    /// and destination port, TCP state.
    pub fn script(&self) -> Vec<String> {
        vec![
            "AccessAdd".to_string(),
            self.memo.clone(),
            self.priority.to_string(),
            self.action.cli_keyword().to_string(),
            self.source.clone(),
            self.destination.clone().unwrap_or_default(),
            String::new(),
            String::new(),
            "0.0.0.0/0".to_string(),
            "0.0.0.0/0".to_string(),
            "any".to_string(),
            "0".to_string(),
            "0".to_string(),
            String::new(),
        ]
    }
}

/// The four rules for a pair, in the order they are created.
pub fn pair_rules(pair: &AccountPair) -> Vec<RuleSpec> {
    vec![
        RuleSpec::allow(&pair.primary, &pair.companion),
        RuleSpec::allow(&pair.companion, &pair.primary),
        RuleSpec::deny(&pair.primary),
        RuleSpec::deny(&pair.companion),
    ]
}

/// Rule ids whose rendered fields mention `name`.
///
/// Substring matching is deliberately loose: clearing `al` also removes
/// rules for `alice`.
pub fn matching_rule_ids(rules: &[AccessRule], name: &str) -> Vec<u32> {
    rules
        .iter()
        .filter(|r| r.mentions(name))
        .map(|r| r.id)
        .collect()
}

/// Issues pair policies and clears rules through the broker.
#[derive(Clone)]
pub struct AccessPolicyApplier {
    broker: CommandBroker,
}

impl AccessPolicyApplier {
    pub fn new(broker: CommandBroker) -> Self {
        Self { broker }
    }

    /// Create the pair's four rules in order. Stops at the first failure;
    /// rules created before it stay in place.
    pub async fn apply(&self, pair: &AccountPair) -> Result<Vec<RuleSpec>, SoftEtherError> {
        if pair.primary.trim().is_empty() || pair.companion.trim().is_empty() {
            return Err(SoftEtherError::invalid_input("Both pair members are required"));
        }
        if pair.primary.eq_ignore_ascii_case(&pair.companion) {
            return Err(SoftEtherError::invalid_input("Pair members must differ"));
        }

        let rules = pair_rules(pair);
        for (i, rule) in rules.iter().enumerate() {
            if let Err(e) = self.broker.run_script(rule.script()).await {
                warn!(
                    "Access policy for {}/{} stopped after {} of {} rules: {}",
                    pair.primary,
                    pair.companion,
                    i,
                    rules.len(),
                    e
                );
                return Err(e);
            }
        }
        info!("Applied access policy for {} <-> {}", pair.primary, pair.companion);
        Ok(rules)
    }

    /// Delete every listed rule that mentions `name`, isolating failures.
    pub async fn clear(&self, name: &str, rules: &[AccessRule]) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for id in matching_rule_ids(rules, name) {
            let result = self
                .broker
                .run("AccessDelete", &[id.to_string()])
                .await
                .map(|_| ());
            if let Err(ref e) = result {
                warn!("Failed to delete access rule {}: {}", id, e);
            }
            outcome.record(id.to_string(), result);
        }
        info!(
            "Cleared access rules for '{}': {} deleted, {} failed",
            name,
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        outcome
    }
}
