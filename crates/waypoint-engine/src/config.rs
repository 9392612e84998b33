//! TOML configuration with environment-variable overrides, the way a
//! single binary wants its settings without reaching for a secrets
//! manager or a remote config service for local/dev use.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use waypoint_core::{RouterConfig, StallConfig};

use crate::error::{EngineError, Result};

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    15 * 60
}

fn default_max_pools() -> usize {
    100
}

fn default_pool_warning_threshold() -> usize {
    80
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediatorSettings {
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for MediatorSettings {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

/// The full settings surface for one `waypoint-router` process.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub mediator: MediatorSettings,
    #[serde(default)]
    pub stall: StallConfig,
    #[serde(default)]
    pub fail_hard_on_initial_sync: bool,
    #[serde(default = "default_max_pools")]
    pub max_pools: usize,
    #[serde(default = "default_pool_warning_threshold")]
    pub pool_warning_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            router: RouterConfig::default(),
            mediator: MediatorSettings::default(),
            stall: StallConfig::default(),
            fail_hard_on_initial_sync: false,
            max_pools: default_max_pools(),
            pool_warning_threshold: default_pool_warning_threshold(),
        }
    }
}

impl EngineConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            EngineError::Config(format!("reading {}: {err}", path.as_ref().display()))
        })?;
        let mut config: Self =
            toml::from_str(&raw).map_err(|err| EngineError::Config(err.to_string()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables win over the file, the way a container
    /// deployment expects to be able to override one setting without
    /// templating the whole file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("WAYPOINT_HTTP_BIND") {
            self.http.bind = bind;
        }
        if let Ok(timeout) = std::env::var("WAYPOINT_MEDIATOR_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse() {
                self.mediator.request_timeout_seconds = seconds;
            }
        }
        if let Ok(flag) = std::env::var("WAYPOINT_FAIL_HARD_ON_INITIAL_SYNC") {
            self.fail_hard_on_initial_sync = matches!(flag.as_str(), "1" | "true" | "TRUE");
        }
        if let Ok(max_pools) = std::env::var("WAYPOINT_MAX_POOLS") {
            if let Ok(value) = max_pools.parse() {
                self.max_pools = value;
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.mediator.request_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.http.bind, "0.0.0.0:8080");
        assert_eq!(config.mediator.request_timeout_seconds, 15 * 60);
    }

    #[test]
    fn env_override_wins_over_file_value() {
        std::env::set_var("WAYPOINT_HTTP_BIND", "127.0.0.1:9999");
        let mut config = EngineConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.http.bind, "127.0.0.1:9999");
        std::env::remove_var("WAYPOINT_HTTP_BIND");
    }
}
