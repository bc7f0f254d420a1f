//! Aggregate runtime configuration, loaded from the environment with an
//! optional file overlay, validated eagerly at construction (env-first,
//! fail-fast).

use crate::types::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Digest algorithm choice for the audit record builder (C9, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgo {
    Fnv1a32,
    #[default]
    Sha256,
}

impl std::str::FromStr for DigestAlgo {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fnv1a32" => Ok(DigestAlgo::Fnv1a32),
            "sha256" => Ok(DigestAlgo::Sha256),
            other => Err(ConfigError::Invalid(format!(
                "DIGEST_ALGO must be fnv1a32 or sha256, got '{other}'"
            ))),
        }
    }
}

/// Whether `reflect` runs on a `cancelled` termination (Open Question (c)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReflectPolicy {
    #[default]
    Always,
    SkipOnCancel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub max_size: usize,
    pub default_ttl: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            default_ttl: Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub per_subscriber_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            per_subscriber_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderChainConfig {
    pub max_tokens_ceiling: u32,
    pub retry_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub per_provider_timeout_ms: u64,
    pub global_in_flight_cap: usize,
}

impl Default for ProviderChainConfig {
    fn default() -> Self {
        Self {
            max_tokens_ceiling: 4096,
            retry_attempts: 2,
            backoff_base_ms: 100,
            backoff_cap_ms: 5_000,
            per_provider_timeout_ms: 30_000,
            global_in_flight_cap: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMapperConfig {
    pub allow_external_tools: bool,
    pub max_retries: u32,
    pub fallback_timeout_ms: u64,
    pub tool_refresh_interval_ms: u64,
    pub sync_mode: bool,
    pub cache_ttl: Duration,
}

impl Default for ToolMapperConfig {
    fn default() -> Self {
        Self {
            allow_external_tools: true,
            max_retries: 1,
            fallback_timeout_ms: 2_000,
            tool_refresh_interval_ms: 60_000,
            sync_mode: false,
            cache_ttl: Duration::from_secs(60),
        }
    }
}

impl ToolMapperConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.fallback_timeout_ms < 1000 {
            return Err(ConfigError::Invalid(
                "fallbackTimeout must be >= 1000ms".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_concurrent_operations: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 16,
        }
    }
}

/// Top-level aggregate config (ambient, §2 C0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub digest_algo: DigestAlgo,
    pub reflect_policy: ReflectPolicy,
    pub store: StoreConfig,
    pub rate_limiter: RateLimiterConfig,
    pub bus: BusConfig,
    pub provider_chain: ProviderChainConfig,
    pub tool_mapper: ToolMapperConfig,
    pub session: SessionConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            digest_algo: DigestAlgo::default(),
            reflect_policy: ReflectPolicy::default(),
            store: StoreConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            bus: BusConfig::default(),
            provider_chain: ProviderChainConfig::default(),
            tool_mapper: ToolMapperConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset. `.env` is loaded first (if present),
    /// via `dotenvy`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DIGEST_ALGO") {
            config.digest_algo = v.parse()?;
        }
        if let Ok(v) = std::env::var("MAX_TOOL_TOKENS") {
            config.provider_chain.max_tokens_ceiling = v
                .parse()
                .map_err(|_| ConfigError::Invalid("MAX_TOOL_TOKENS must be a u32".into()))?;
        }
        if let Ok(v) = std::env::var("TOOL_REFRESH_INTERVAL_MS") {
            config.tool_mapper.tool_refresh_interval_ms = v.parse().map_err(|_| {
                ConfigError::Invalid("TOOL_REFRESH_INTERVAL_MS must be a u64".into())
            })?;
        }
        if let Ok(v) = std::env::var("SYNC_MODE") {
            config.tool_mapper.sync_mode = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("ALLOW_EXTERNAL_TOOLS") {
            config.tool_mapper.allow_external_tools = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_WINDOW_MS") {
            config.rate_limiter.window_ms = v
                .parse()
                .map_err(|_| ConfigError::Invalid("RATE_LIMIT_WINDOW_MS must be a u64".into()))?;
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_MAX") {
            config.rate_limiter.max_requests = v
                .parse()
                .map_err(|_| ConfigError::Invalid("RATE_LIMIT_MAX must be a u32".into()))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Layer a TOML file on top of the current values (used after `from_env`
    /// when a caller also wants file-based overrides). The file need not be
    /// complete: only the tables and keys it actually sets are overlaid,
    /// recursively, onto `self`; anything it omits keeps the value `self`
    /// already had from `from_env` or defaults.
    pub fn merge_file(self, path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Invalid(format!("reading config file: {e}")))?;
        let overlay: toml::Value =
            toml::from_str(&text).map_err(|e| ConfigError::Invalid(format!("parsing config file: {e}")))?;
        let base = toml::Value::try_from(&self)
            .map_err(|e| ConfigError::Invalid(format!("serializing base config: {e}")))?;
        let merged = merge_toml_values(base, overlay);
        let merged: RuntimeConfig = merged
            .try_into()
            .map_err(|e| ConfigError::Invalid(format!("applying config file: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.tool_mapper.validate()?;
        if self.store.max_size == 0 {
            return Err(ConfigError::Invalid("store.max_size must be > 0".into()));
        }
        if self.provider_chain.max_tokens_ceiling == 0 {
            return Err(ConfigError::Invalid(
                "provider_chain.max_tokens_ceiling must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Recursively overlays `overlay` onto `base`: table keys present in
/// `overlay` replace (or, for nested tables, further merge into) `base`'s;
/// keys `overlay` doesn't mention are left as `base` had them.
fn merge_toml_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(existing) => merge_toml_values(existing, value),
                    None => value,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn from_env_reads_digest_algo() {
        std::env::set_var("DIGEST_ALGO", "fnv1a32");
        let config = RuntimeConfig::from_env().unwrap();
        assert_eq!(config.digest_algo, DigestAlgo::Fnv1a32);
        std::env::remove_var("DIGEST_ALGO");
    }

    #[test]
    #[serial]
    fn from_env_rejects_bad_digest_algo() {
        std::env::set_var("DIGEST_ALGO", "md5");
        assert!(RuntimeConfig::from_env().is_err());
        std::env::remove_var("DIGEST_ALGO");
    }

    #[test]
    fn rejects_fallback_timeout_below_floor() {
        let mut config = RuntimeConfig::default();
        config.tool_mapper.fallback_timeout_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn merge_file_overlays_only_keys_it_sets() {
        use std::io::Write;

        let mut base = RuntimeConfig::default();
        base.rate_limiter.max_requests = 999;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[tool_mapper]\nsync_mode = true\n").unwrap();

        let merged = base.merge_file(file.path()).unwrap();

        assert!(merged.tool_mapper.sync_mode);
        assert_eq!(merged.rate_limiter.max_requests, 999);
    }
}
