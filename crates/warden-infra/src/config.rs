//! Configuration loader for warden.
//!
//! Reads the TOML config file and deserializes it into [`WardenConfig`]. A missing
//! or malformed file falls back to defaults. `WARDEN__*` environment
//! variables are applied on top.

use std::path::Path;

use thiserror::Error;
use warden_types::config::WardenConfig;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "WARDEN__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },
}

/// Load configuration from `path`, then apply environment overrides.
///
/// - Missing file: defaults.
/// - Unreadable or unparsable file: logs a warning and uses defaults.
/// - Invalid `WARDEN__*` value: error.
pub async fn load_config(path: &Path) -> Result<WardenConfig, ConfigError> {
    let mut config = read_config_file(path).await;
    apply_env_overrides(&mut config, std::env::vars())?;
    Ok(config)
}

async fn read_config_file(path: &Path) -> WardenConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return WardenConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return WardenConfig::default();
        }
    };

    match toml::from_str::<WardenConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            WardenConfig::default()
        }
    }
}

/// Apply `WARDEN__*` overrides from `vars`. Unknown variables are ignored.
pub fn apply_env_overrides(
    config: &mut WardenConfig,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<(), ConfigError> {
    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        match name {
            "EXECUTOR_URL" => config.executor.url = value,
            "EXECUTOR_CLIENT_TIMEOUT" => config.executor.timeout_secs = parse(&key, &value)?,
            "SERVICE_KEY" => config.executor.service_key = Some(value),
            "LOOP_MAX_BATCH_SIZE" => config.loops.max_parallel = parse(&key, &value)?,
            "LOOP_CONTINUE_ON_ERROR" => config.loops.continue_on_error = parse_bool(&key, &value)?,
            "RATE_LIMIT_ENABLED" => config.rate_limit.enabled = parse_bool(&key, &value)?,
            "RATE_LIMIT_RATE" => config.rate_limit.rate = parse(&key, &value)?,
            "RATE_LIMIT_CAPACITY" => config.rate_limit.capacity = parse(&key, &value)?,
            "RATE_LIMIT_WINDOW_SIZE" => config.rate_limit.window_secs = parse(&key, &value)?,
            "RATE_LIMIT_BY_IP" => config.rate_limit.by_ip = parse_bool(&key, &value)?,
            "RATE_LIMIT_BY_ENDPOINT" => config.rate_limit.by_endpoint = parse_bool(&key, &value)?,
            "SIGNING_SECRET" => config.server.signing_secret = Some(value),
            "LOCAL_REPOSITORY_ENABLED" => config.registry.local_enabled = parse_bool(&key, &value)?,
            "LOCAL_REPOSITORY_PATH" => config.registry.local_path = value,
            "REMOTE_REPOSITORY_URL" => {
                config.registry.remote_urls = split_list(&value);
            }
            "ALLOWED_GIT_DOMAINS" => config.registry.allowed_git_domains = split_list(&value),
            "REGISTRY_CACHE_DIR" => config.registry.cache_dir = Some(value),
            _ => {
                tracing::debug!(var = %key, "ignoring unknown environment override");
                continue;
            }
        }
        tracing::debug!(var = %key, "applied environment override");
    }
    Ok(())
}

fn parse<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Accepts `true/false`, `1/0`, `yes/no`, case-insensitively.
fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
