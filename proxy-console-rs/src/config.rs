use serde::Deserialize;

use crate::stats::TimeFrame;

pub const CONFIG_ENV_VAR: &str = "PROXY_CONSOLE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid console config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request_limit must be at least 1")]
    ZeroRequestLimit,
    #[error("{CONFIG_ENV_VAR} is not valid unicode")]
    NotUnicode,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Used when the URL has no `frame` parameter.
    pub default_time_frame: TimeFrame,
    /// Upper bound on the requests list, newest kept.
    pub request_limit: usize,
    /// An `env_logger` filter string such as `info` or `tether=debug`. On wasm only a bare level is understood.
    pub log_filter: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            default_time_frame: TimeFrame::Day,
            request_limit: 500,
            log_filter: "info".to_string(),
        }
    }
}

impl ConsoleConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        if config.request_limit == 0 {
            return Err(ConfigError::ZeroRequestLimit);
        }
        Ok(config)
    }

    /// Reads the JSON in `PROXY_CONSOLE_CONFIG`, falling back to the defaults when it is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(json) => Self::from_json(&json),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode),
        }
    }
}
