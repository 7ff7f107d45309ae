//! Environment-variable configuration (spec §6). There is no config file
//! format here — every setting is an env var, loaded once at startup.

use loomgate_common::Error;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingRequired(&'static str),

    #[error("environment variable {name} has an invalid value {value:?}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Fatal(e.to_string())
    }
}

/// Process-wide configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Chat platform bot token. Required; startup aborts without it.
    pub bot_token: String,
    /// Path to the entity registry's SQLite database file.
    pub db_path: String,
    /// Port the control-plane HTTP surface listens on.
    pub mcp_port: u16,
    /// Base directory for out-of-core-scope file assets (avatars, etc).
    pub data_dir: String,
    /// Base URL prepended to avatar paths by the external adapter.
    pub avatar_base_url: Option<String>,
    /// Secret used by the external auth surface to sign session tokens.
    pub jwt_secret: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub dashboard_url: Option<String>,
    /// Operator platform user ids, comma-separated in the environment.
    pub operator_ids: Vec<String>,
    /// Message bus per-item time-to-live.
    pub queue_ttl: Duration,
    /// Message bus per-entity queue capacity.
    pub queue_max_len: usize,
}

const DEFAULT_DB_PATH: &str = "./loomgate.db";
const DEFAULT_MCP_PORT: u16 = 3000;
const DEFAULT_DATA_DIR: &str = "/data";
const DEFAULT_QUEUE_TTL_SECONDS: u64 = 600;
const DEFAULT_QUEUE_MAX_LEN: usize = 200;

impl GatewayConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingRequired`] if `BOT_TOKEN` is unset, or
    /// [`ConfigError::InvalidValue`] if a numeric variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = require_env("BOT_TOKEN")?;

        let db_path = optional_env("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let mcp_port = parse_env("MCP_PORT", DEFAULT_MCP_PORT)?;
        let data_dir = optional_env("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        let avatar_base_url = optional_env("AVATAR_BASE_URL");
        let jwt_secret = optional_env("JWT_SECRET");
        let oauth_client_id = optional_env("OAUTH_CLIENT_ID");
        let oauth_client_secret = optional_env("OAUTH_CLIENT_SECRET");
        let dashboard_url = optional_env("DASHBOARD_URL");
        let operator_ids = optional_env("OPERATOR_IDS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let queue_ttl_seconds = parse_env("QUEUE_TTL_SECONDS", DEFAULT_QUEUE_TTL_SECONDS)?;
        let queue_max_len = parse_env("QUEUE_MAX_LEN", DEFAULT_QUEUE_MAX_LEN)?;

        if jwt_secret.is_none() || oauth_client_id.is_none() {
            debug!("oauth/jwt settings unset; external auth surface is not this core's concern");
        }

        Ok(Self {
            bot_token,
            db_path,
            mcp_port,
            data_dir,
            avatar_base_url,
            jwt_secret,
            oauth_client_id,
            oauth_client_secret,
            dashboard_url,
            operator_ids,
            queue_ttl: Duration::from_secs(queue_ttl_seconds),
            queue_max_len,
        })
    }
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingRequired(name))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        Err(_) => {
            warn!(var = name, %default, "using default");
            Ok(default)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for var in [
            "BOT_TOKEN",
            "DB_PATH",
            "MCP_PORT",
            "DATA_DIR",
            "AVATAR_BASE_URL",
            "JWT_SECRET",
            "OAUTH_CLIENT_ID",
            "OAUTH_CLIENT_SECRET",
            "DASHBOARD_URL",
            "OPERATOR_IDS",
            "QUEUE_TTL_SECONDS",
            "QUEUE_MAX_LEN",
        ] {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn missing_bot_token_is_fatal() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let err = GatewayConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("BOT_TOKEN")));
    }

    #[test]
    fn defaults_applied_when_optional_vars_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe { std::env::set_var("BOT_TOKEN", "t") };
        let cfg = GatewayConfig::from_env().unwrap();
        assert_eq!(cfg.db_path, DEFAULT_DB_PATH);
        assert_eq!(cfg.mcp_port, DEFAULT_MCP_PORT);
        assert_eq!(cfg.data_dir, DEFAULT_DATA_DIR);
        assert_eq!(cfg.queue_ttl.as_secs(), DEFAULT_QUEUE_TTL_SECONDS);
        assert_eq!(cfg.queue_max_len, DEFAULT_QUEUE_MAX_LEN);
        assert!(cfg.operator_ids.is_empty());
        clear_all();
    }

    #[test]
    fn operator_ids_split_on_comma_and_trimmed() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            std::env::set_var("BOT_TOKEN", "t");
            std::env::set_var("OPERATOR_IDS", "111, 222,333");
        }
        let cfg = GatewayConfig::from_env().unwrap();
        assert_eq!(cfg.operator_ids, vec!["111", "222", "333"]);
        clear_all();
    }
}
