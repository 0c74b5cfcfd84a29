//! Log subscriber setup for the daemon.
//!
//! `RUST_LOG` wins when set; otherwise `info`, or `debug` with
//! `DEBUG_VPN`. Records emitted through `log` by the library crates are
//! bridged into the same subscriber.

use crate::config::AppConfig;
use crate::error::ApiError;
use tracing_subscriber::EnvFilter;

pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

fn filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(debug)))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &AppConfig) -> Result<(), ApiError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config.debug))
        .with_target(true);
    let installed = if config.log_json || cfg!(feature = "logs-json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ApiError::internal(format!("Cannot install log subscriber: {}", e)))
}
