//! SoftEther hub service.
//!
//! Provides the central `SoftEtherService` that owns the command broker,
//! the inventory cache, and the access policy applier, and exposes the
//! account, session, and rule operations built on them.

use crate::softether::access::{AccessPolicyApplier, RuleSpec};
use crate::softether::broker::{BrokerSnapshot, CommandBroker};
use crate::softether::exec::{CommandRunner, VpnCmdRunner};
use crate::softether::inventory::{InventoryCache, InventoryKind};
use crate::softether::parser;
use crate::softether::types::*;
use log::{info, warn};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared service handle.
pub type SoftEtherServiceState = Arc<SoftEtherService>;

/// Central SoftEther hub service.
pub struct SoftEtherService {
    config: SoftEtherConfig,
    broker: CommandBroker,
    inventory: InventoryCache,
    access: AccessPolicyApplier,
}

impl SoftEtherService {
    /// Create a service that drives the real `vpncmd` binary.
    pub fn new(config: SoftEtherConfig) -> Self {
        let runner = Arc::new(VpnCmdRunner::from_config(&config));
        Self::with_runner(config, runner)
    }

    /// Create a service over any runner.
    pub fn with_runner(config: SoftEtherConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let broker = CommandBroker::spawn(runner, config.retry);
        let inventory = InventoryCache::new(broker.clone(), config.cache_ttl());
        let access = AccessPolicyApplier::new(broker.clone());
        info!(
            "SoftEther service ready for hub '{}' on {}",
            config.hub, config.server
        );
        Self {
            config,
            broker,
            inventory,
            access,
        }
    }

    pub fn new_state(config: SoftEtherConfig) -> SoftEtherServiceState {
        Arc::new(Self::new(config))
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn config(&self) -> &SoftEtherConfig {
        &self.config
    }

    pub fn broker(&self) -> &CommandBroker {
        &self.broker
    }

    pub fn inventory(&self) -> &InventoryCache {
        &self.inventory
    }

    pub fn broker_stats(&self) -> BrokerSnapshot {
        self.broker.snapshot()
    }

    // ── Listings ────────────────────────────────────────────────────

    /// Accounts with the online flag derived from current sessions.
    pub async fn list_accounts(&self) -> Result<Vec<Account>, SoftEtherError> {
        let mut accounts = self.inventory.accounts().await?;
        let sessions = self.inventory.sessions_or_stale().await?.value;
        let online: HashSet<String> = sessions
            .iter()
            .filter_map(|s| s.account.as_deref())
            .map(str::to_lowercase)
            .collect();
        for account in &mut accounts {
            account.online = online.contains(&account.name.to_lowercase());
        }
        Ok(accounts)
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, SoftEtherError> {
        self.inventory.sessions().await
    }

    pub async fn list_access_rules(&self) -> Result<Vec<AccessRule>, SoftEtherError> {
        self.inventory.access_rules().await
    }

    pub async fn get_account_detail(&self, name: &str) -> Result<AccountDetail, SoftEtherError> {
        let name = validate_account_name(name)?;
        let raw = self.broker.run("UserGet", &[name]).await?;
        parser::parse_account_detail(name, &raw)
    }

    // ── Account lifecycle ───────────────────────────────────────────

    pub async fn create_account(&self, request: &NewAccount) -> Result<AccountDetail, SoftEtherError> {
        let name = validate_account_name(&request.name)?;
        validate_password(&request.password)?;
        let group = request
            .group
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .unwrap_or("none");

        self.broker
            .run(
                "UserCreate",
                &[
                    name.to_string(),
                    format!("/GROUP:{}", group),
                    "/REALNAME:none".to_string(),
                    "/NOTE:none".to_string(),
                ],
            )
            .await?;
        self.inventory.invalidate(InventoryKind::Accounts).await;

        if let Err(e) = self.set_password(name, &request.password).await {
            warn!("Account '{}' created but setting its password failed: {}", name, e);
            return Err(e);
        }
        info!("Created account '{}'", name);

        Ok(AccountDetail {
            name: name.to_string(),
            group: request.group.clone().filter(|g| !g.trim().is_empty()),
            full_name: None,
            description: None,
            auth_method: Some("Password Authentication".to_string()),
            num_logins: Some(0),
            last_login: None,
            created_at: None,
            updated_at: None,
            expires_at: None,
            fields: Default::default(),
        })
    }

    /// Delete an account and its generated client profile, if any.
    pub async fn delete_account(&self, name: &str) -> Result<(), SoftEtherError> {
        let name = validate_account_name(name)?;
        self.broker.run("UserDelete", &[name]).await?;
        self.inventory.invalidate(InventoryKind::Accounts).await;
        self.remove_profile(name).await;
        info!("Deleted account '{}'", name);
        Ok(())
    }

    pub async fn set_password(&self, name: &str, password: &str) -> Result<(), SoftEtherError> {
        let name = validate_account_name(name)?;
        validate_password(password)?;
        self.broker
            .run("UserPasswordSet", &[name.to_string(), format!("/PASSWORD:{}", password)])
            .await?;
        Ok(())
    }

    fn profile_path(&self, name: &str) -> Option<PathBuf> {
        self.config
            .profile_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.ovpn", name)))
    }

    async fn remove_profile(&self, name: &str) {
        let Some(path) = self.profile_path(name) else {
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("Removed client profile for '{}'", name),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove client profile for '{}': {}", name, e.kind()),
        }
    }

    // ── Sessions ────────────────────────────────────────────────────

    pub async fn disconnect_session(&self, session_name: &str) -> Result<(), SoftEtherError> {
        let session_name = session_name.trim();
        if session_name.is_empty() {
            return Err(SoftEtherError::invalid_input("Session name is required"));
        }
        self.broker
            .run("SessionDisconnect", &[session_name])
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    SoftEtherError::not_found(format!("Session '{}' not found", session_name))
                        .with_code(ERR_OBJECT_NOT_FOUND)
                } else {
                    e
                }
            })?;
        self.inventory.invalidate(InventoryKind::Sessions).await;
        Ok(())
    }

    /// Disconnect every session except the SecureNAT pseudo-session.
    pub async fn disconnect_all_sessions(&self) -> Result<BulkOutcome, SoftEtherError> {
        let sessions = self.inventory.sessions().await?;
        let mut outcome = BulkOutcome::default();
        for session in sessions.iter().filter(|s| !s.is_securenat()) {
            let result = self
                .broker
                .run("SessionDisconnect", &[session.name.as_str()])
                .await
                .map(|_| ());
            outcome.record(session.name.clone(), result);
        }
        self.inventory.invalidate(InventoryKind::Sessions).await;
        info!(
            "Disconnected {} sessions ({} failed)",
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        Ok(outcome)
    }

    // ── Access rules ────────────────────────────────────────────────

    pub async fn apply_access_policy(&self, pair: &AccountPair) -> Result<Vec<RuleSpec>, SoftEtherError> {
        validate_account_name(&pair.primary)?;
        validate_account_name(&pair.companion)?;
        let created = self.access.apply(pair).await;
        self.inventory.invalidate(InventoryKind::AccessRules).await;
        created
    }

    /// Companion pair for a primary account using the configured suffix.
    pub fn default_pair(&self, primary: &str) -> AccountPair {
        AccountPair::with_suffix(primary, &self.config.companion_suffix)
    }

    pub async fn clear_access_rules_by_name(&self, name: &str) -> Result<BulkOutcome, SoftEtherError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SoftEtherError::invalid_input("A name to match is required"));
        }
        // Always match against the live list, never a cached one.
        self.inventory.invalidate(InventoryKind::AccessRules).await;
        let rules = self.inventory.access_rules().await?;
        let outcome = self.access.clear(name, &rules).await;
        self.inventory.invalidate(InventoryKind::AccessRules).await;
        Ok(outcome)
    }
}

/// Account names are passed as single `vpncmd` arguments.
pub fn validate_account_name(name: &str) -> Result<&str, SoftEtherError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SoftEtherError::invalid_input("Account name is required"));
    }
    if trimmed
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '/' | '\\' | '"' | '\''))
    {
        return Err(SoftEtherError::invalid_input(format!(
            "Account name '{}' contains unsupported characters",
            trimmed
        )));
    }
    Ok(trimmed)
}

fn validate_password(password: &str) -> Result<(), SoftEtherError> {
    if password.is_empty() {
        return Err(SoftEtherError::invalid_input("Password is required"));
    }
    if password.chars().any(|c| c.is_control()) {
        return Err(SoftEtherError::invalid_input("Password contains control characters"));
    }
    Ok(())
}
