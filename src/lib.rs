//! # sehub
//!
//! SoftEther hub account manager: a serialized `vpncmd` broker with typed
//! listings, pair access policies, and inactive-account cleanup driven by
//! an activity ledger.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **config** | Defaults, JSON file, and environment overrides |
//! | **logging** | Subscriber setup with `log` bridging |
//! | **error** | Collaborator-facing error taxonomy |
//! | **api** | `HubApi` facade over the hub and reconcile services |

pub mod api;
pub mod config;
pub mod error;
pub mod logging;

use api::HubApi;
use config::AppConfig;
use error::ApiError;
use tracing::info;
use std::sync::Arc;

/// Run the daemon until ctrl-c.
pub async fn run() -> Result<(), ApiError> {
    let config = AppConfig::load()?;
    logging::init(&config)?;
    info!(
        "Managing hub '{}' on {} (data in {})",
        config.softether.hub,
        config.softether.server,
        config.reconcile.data_dir.display()
    );

    let api = Arc::new(HubApi::from_config(&config));
    api.start().await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| ApiError::internal(format!("Cannot wait for shutdown signal: {}", e)))?;
    info!("Shutting down");
    api.shutdown().await;
    Ok(())
}
