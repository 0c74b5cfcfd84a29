//! Daemon configuration.
//!
//! Defaults, then an optional JSON file named by `SEHUB_CONFIG`, then
//! environment overrides. Numeric variables that do not parse are a
//! startup error rather than a silent fallback.

use crate::error::ApiError;
use sehub_reconcile::reconcile::ReconcileConfig;
use sehub_softether::softether::SoftEtherConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 5555;
pub const CONFIG_FILE_ENV: &str = "SEHUB_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub softether: SoftEtherConfig,
    pub reconcile: ReconcileConfig,
    /// Debug-level logging when `RUST_LOG` is unset.
    pub debug: bool,
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            softether: SoftEtherConfig {
                profile_dir: Some(PathBuf::from("configs")),
                ..SoftEtherConfig::default()
            },
            reconcile: ReconcileConfig::default(),
            debug: false,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Load from `SEHUB_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ApiError> {
        let lookup = |key: &str| std::env::var(key).ok();
        let mut config = match lookup(CONFIG_FILE_ENV).filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_file(Path::new(path.trim()))?,
            None => Self::default(),
        };
        config.apply_env(lookup)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ApiError> {
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "config".to_string());
        let text = std::fs::read_to_string(path)
            .map_err(|e| ApiError::config(format!("Cannot read {}: {}", label, e.kind())))?;
        serde_json::from_str(&text).map_err(|e| ApiError::config(format!("{} is not valid: {}", label, e)))
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let se = &mut self.softether;
        let port = get(&["SE_PORT"]).map(|v| parse_num::<u16>("SE_PORT", &v)).transpose()?;
        match (get(&["VPN_SERVER", "SE_SERVER"]), port) {
            (Some(server), port) => se.server = with_port(&server, port.unwrap_or(DEFAULT_PORT)),
            (None, Some(port)) => se.server = format!("{}:{}", host_of(&se.server), port),
            (None, None) => {}
        }
        if let Some(hub) = get(&["VPN_HUB", "SE_HUB"]) {
            se.hub = hub;
        }
        if let Some(pass) = get(&["VPN_HUB_PASS", "SE_HUB_PASSWORD"]) {
            se.hub_password = Some(pass);
        }
        if let Some(path) = get(&["VPNCMD_PATH"]) {
            se.vpncmd_path = path;
        }
        if let Some(ttl) = get(&["VPN_CACHE_TTL_MS"]) {
            se.cache_ttl_ms = parse_num("VPN_CACHE_TTL_MS", &ttl)?;
        }
        if let Some(timeout) = get(&["VPNCMD_TIMEOUT_MS"]) {
            se.timeout_ms = parse_num("VPNCMD_TIMEOUT_MS", &timeout)?;
            if se.timeout_ms == 0 {
                return Err(ApiError::config("VPNCMD_TIMEOUT_MS must be positive"));
            }
        }
        if let Some(lock) = get(&["VPNCMD_LOCK_FILE"]) {
            se.lock_file = if lock.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(PathBuf::from(lock))
            };
        }
        if let Some(dir) = get(&["SEHUB_PROFILE_DIR"]) {
            se.profile_dir = Some(PathBuf::from(dir));
        }

        if let Some(dir) = get(&["SEHUB_DATA_DIR"]) {
            self.reconcile.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = get(&["SEHUB_POLL_INTERVAL_SECS"]) {
            self.reconcile.poll_interval_secs = parse_num("SEHUB_POLL_INTERVAL_SECS", &secs)?;
            if self.reconcile.poll_interval_secs == 0 {
                return Err(ApiError::config("SEHUB_POLL_INTERVAL_SECS must be positive"));
            }
        }

        if let Some(v) = get(&["DEBUG_VPN"]) {
            self.debug = is_truthy(&v);
        }
        if let Some(v) = get(&["SEHUB_LOG_JSON"]) {
            self.log_json = is_truthy(&v);
        }
        Ok(())
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::config(format!("{} must be a number, got '{}'", key, value)))
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.to_ascii_lowercase().as_str(), "" | "0" | "false" | "no" | "off")
}

/// Whether `server` already ends in `:port` (`[v6]:port` included).
fn has_port(server: &str) -> bool {
    match server.rsplit_once(':') {
        Some((host, port)) => {
            port.parse::<u16>().is_ok() && !host.is_empty() && (!host.contains(':') || host.ends_with(']'))
        }
        None => false,
    }
}

fn host_of(server: &str) -> &str {
    if has_port(server) {
        server.rsplit_once(':').map(|(h, _)| h).unwrap_or(server)
    } else {
        server
    }
}

fn with_port(server: &str, port: u16) -> String {
    if has_port(server) {
        server.to_string()
    } else {
        format!("{}:{}", server, port)
    }
}
