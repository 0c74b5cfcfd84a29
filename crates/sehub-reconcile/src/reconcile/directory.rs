//! Account and session source for reconciliation.
//!
//! The tracker and cleanup engine only need to list accounts and
//! sessions and delete accounts; the hub service provides all three,
//! and tests substitute an in-memory directory.

use async_trait::async_trait;
use sehub_softether::softether::{Account, Session, SoftEtherError, SoftEtherService};

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn accounts(&self) -> Result<Vec<Account>, SoftEtherError>;
    async fn sessions(&self) -> Result<Vec<Session>, SoftEtherError>;
    /// Delete one account, including its generated client profile.
    async fn delete_account(&self, name: &str) -> Result<(), SoftEtherError>;
}

#[async_trait]
impl AccountDirectory for SoftEtherService {
    async fn accounts(&self) -> Result<Vec<Account>, SoftEtherError> {
        self.inventory().accounts().await
    }

    async fn sessions(&self) -> Result<Vec<Session>, SoftEtherError> {
        self.inventory().sessions().await
    }

    async fn delete_account(&self, name: &str) -> Result<(), SoftEtherError> {
        SoftEtherService::delete_account(self, name).await
    }
}
