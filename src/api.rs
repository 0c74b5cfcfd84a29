//! Collaborator-facing facade.
//!
//! `HubApi` is the one handle route handlers and tools hold. Every
//! operation returns structured data or an [`ApiError`].

use crate::config::AppConfig;
use crate::error::ApiError;
use log::info;
use sehub_reconcile::reconcile::{
    CleanupConfigUpdate, CleanupPreview, CleanupReport, CleanupSummary, Clock, PairRecord,
    ReconcileService, ReconcileServiceState, SystemClock,
};
use sehub_softether::softether::{
    AccessRule, Account, AccountDetail, AccountPair, BrokerSnapshot, BulkOutcome, CommandRunner,
    NewAccount, RuleSpec, Session, SoftEtherService, SoftEtherServiceState,
};
use std::sync::Arc;

pub type HubApiState = Arc<HubApi>;

pub struct HubApi {
    hub: SoftEtherServiceState,
    reconcile: ReconcileServiceState,
}

impl HubApi {
    pub fn new(hub: SoftEtherServiceState, reconcile: ReconcileServiceState) -> Self {
        Self { hub, reconcile }
    }

    /// Wire the services against the real `vpncmd` binary.
    pub fn from_config(config: &AppConfig) -> Self {
        let hub = SoftEtherService::new_state(config.softether.clone());
        Self::over(hub, config, Arc::new(SystemClock))
    }

    /// Wire the services over an arbitrary runner and clock.
    pub fn with_runner(config: &AppConfig, runner: Arc<dyn CommandRunner>, clock: Arc<dyn Clock>) -> Self {
        let hub = Arc::new(SoftEtherService::with_runner(config.softether.clone(), runner));
        Self::over(hub, config, clock)
    }

    fn over(hub: SoftEtherServiceState, config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        let reconcile = ReconcileService::new_state(config.reconcile.clone(), hub.clone(), clock);
        Self::new(hub, reconcile)
    }

    pub fn hub(&self) -> &SoftEtherServiceState {
        &self.hub
    }

    pub fn reconcile(&self) -> &ReconcileServiceState {
        &self.reconcile
    }

    /// Start the activity tracker and the cleanup schedule.
    pub async fn start(&self) -> Result<(), ApiError> {
        self.reconcile.start().await?;
        info!("Hub API started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.reconcile.shutdown().await;
    }

    // ── Inventory ───────────────────────────────────────────────────

    pub async fn list_accounts(&self) -> Result<Vec<Account>, ApiError> {
        Ok(self.hub.list_accounts().await?)
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, ApiError> {
        Ok(self.hub.list_sessions().await?)
    }

    pub async fn list_access_rules(&self) -> Result<Vec<AccessRule>, ApiError> {
        Ok(self.hub.list_access_rules().await?)
    }

    pub async fn get_account_detail(&self, name: &str) -> Result<AccountDetail, ApiError> {
        Ok(self.hub.get_account_detail(name).await?)
    }

    pub fn broker_stats(&self) -> BrokerSnapshot {
        self.hub.broker_stats()
    }

    // ── Accounts ────────────────────────────────────────────────────

    pub async fn create_account(&self, request: &NewAccount) -> Result<AccountDetail, ApiError> {
        Ok(self.hub.create_account(request).await?)
    }

    pub async fn delete_account(&self, name: &str) -> Result<(), ApiError> {
        Ok(self.hub.delete_account(name).await?)
    }

    pub async fn set_password(&self, name: &str, password: &str) -> Result<(), ApiError> {
        Ok(self.hub.set_password(name, password).await?)
    }

    // ── Sessions ────────────────────────────────────────────────────

    pub async fn disconnect_session(&self, session_name: &str) -> Result<(), ApiError> {
        Ok(self.hub.disconnect_session(session_name).await?)
    }

    pub async fn disconnect_all_sessions(&self) -> Result<BulkOutcome, ApiError> {
        Ok(self.hub.disconnect_all_sessions().await?)
    }

    // ── Access policy and pairs ─────────────────────────────────────

    pub async fn apply_access_policy(&self, pair: &AccountPair) -> Result<Vec<RuleSpec>, ApiError> {
        Ok(self.hub.apply_access_policy(pair).await?)
    }

    /// Apply the policy for a registered primary account.
    pub async fn apply_access_policy_for(&self, primary: &str) -> Result<Vec<RuleSpec>, ApiError> {
        let record = self
            .reconcile
            .pairs()
            .get(primary)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("No pair registered for '{}'", primary.trim())))?;
        let pair = match record.companion {
            Some(companion) => AccountPair::new(record.primary, companion),
            None => self.hub.default_pair(&record.primary),
        };
        self.apply_access_policy(&pair).await
    }

    pub async fn register_pair(
        &self,
        primary: &str,
        companion: Option<String>,
        address: Option<String>,
    ) -> Result<PairRecord, ApiError> {
        Ok(self.reconcile.pairs().upsert(primary, companion, address).await?)
    }

    pub async fn remove_pair(&self, primary: &str) -> Result<PairRecord, ApiError> {
        Ok(self.reconcile.pairs().remove(primary).await?)
    }

    pub async fn list_pairs(&self) -> Result<Vec<PairRecord>, ApiError> {
        Ok(self.reconcile.pairs().list().await?)
    }

    pub async fn clear_access_rules_by_name(&self, name: &str) -> Result<BulkOutcome, ApiError> {
        Ok(self.hub.clear_access_rules_by_name(name).await?)
    }

    // ── Cleanup ─────────────────────────────────────────────────────

    pub async fn get_cleanup_summary(&self) -> CleanupSummary {
        self.reconcile.summary().await
    }

    pub async fn update_cleanup_config(&self, update: CleanupConfigUpdate) -> Result<CleanupSummary, ApiError> {
        Ok(self.reconcile.update_config(update).await?)
    }

    pub async fn run_cleanup_once(&self, manual: bool) -> Result<CleanupReport, ApiError> {
        Ok(self.reconcile.run_once(manual).await?)
    }

    pub async fn preview_cleanup(&self) -> Result<CleanupPreview, ApiError> {
        Ok(self.reconcile.preview().await?)
    }
}
