//! Configuration loading for the Integration Hub.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `HUB_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of the hex-encoded 256-bit credential encryption key.
pub const ENCRYPTION_KEY_HEX_LEN: usize = 64;

/// Application configuration derived from `HUB_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    /// Hex-encoded active encryption key (exactly 64 characters).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    #[serde(default = "default_encryption_key_version")]
    pub encryption_key_version: i32,
    /// Retired keys still accepted for decryption, keyed by version.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub previous_encryption_keys: BTreeMap<i32, String>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Pull cache backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CacheConfig {
    /// `memory` (in-process) or `redis`
    ///
    /// Environment variable: `HUB_CACHE_BACKEND`
    #[serde(default = "default_cache_backend")]
    pub backend: String,

    /// Redis connection URL, required when `backend = redis`
    ///
    /// Environment variable: `HUB_REDIS_URL`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,

    /// TTL applied to pull results (default: 86400)
    ///
    /// Environment variable: `HUB_CACHE_DEFAULT_TTL_SECONDS`
    #[serde(default = "default_cache_ttl_seconds")]
    pub default_ttl_seconds: u64,

    /// Keys requested per SCAN round and deleted per batch (default: 1000)
    ///
    /// Environment variable: `HUB_CACHE_SCAN_BATCH_SIZE`
    #[serde(default = "default_cache_scan_batch_size")]
    pub scan_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            redis_url: None,
            default_ttl_seconds: default_cache_ttl_seconds(),
            scan_batch_size: default_cache_scan_batch_size(),
        }
    }
}

impl CacheConfig {
    /// Validate cache configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend.as_str() {
            "memory" => {}
            "redis" => {
                if self.redis_url.as_deref().is_none_or(str::is_empty) {
                    return Err(ConfigError::MissingRedisUrl);
                }
            }
            other => {
                return Err(ConfigError::InvalidCacheBackend {
                    value: other.to_string(),
                });
            }
        }

        if self.default_ttl_seconds == 0 {
            return Err(ConfigError::InvalidCacheTtl {
                value: self.default_ttl_seconds,
            });
        }

        if self.scan_batch_size == 0 || self.scan_batch_size > 10_000 {
            return Err(ConfigError::InvalidCacheScanBatchSize {
                value: self.scan_batch_size,
            });
        }

        Ok(())
    }
}

/// Outbound gateway resilience defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct GatewayConfig {
    /// Timeout applied when a connector has no `timeoutMs` (default: 10000)
    ///
    /// Environment variable: `HUB_GATEWAY_DEFAULT_TIMEOUT_MS`
    #[serde(default = "default_gateway_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Consecutive failures that open a connector's circuit (default: 5)
    ///
    /// Environment variable: `HUB_GATEWAY_FAILURE_THRESHOLD`
    #[serde(default = "default_gateway_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before allowing a trial request (default: 30)
    ///
    /// Environment variable: `HUB_GATEWAY_COOLDOWN_SECONDS`
    #[serde(default = "default_gateway_cooldown_seconds")]
    pub cooldown_seconds: u64,

    /// Retries after the first attempt for transient failures (default: 2)
    ///
    /// Environment variable: `HUB_GATEWAY_MAX_RETRIES`
    #[serde(default = "default_gateway_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles per retry (default: 200)
    ///
    /// Environment variable: `HUB_GATEWAY_INITIAL_BACKOFF_MS`
    #[serde(default = "default_gateway_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling (default: 5000)
    ///
    /// Environment variable: `HUB_GATEWAY_MAX_BACKOFF_MS`
    #[serde(default = "default_gateway_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Random factor applied to backoff, 0.0-1.0 (default: 0.1)
    ///
    /// Environment variable: `HUB_GATEWAY_JITTER_FACTOR`
    #[serde(default = "default_gateway_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_gateway_timeout_ms(),
            failure_threshold: default_gateway_failure_threshold(),
            cooldown_seconds: default_gateway_cooldown_seconds(),
            max_retries: default_gateway_max_retries(),
            initial_backoff_ms: default_gateway_initial_backoff_ms(),
            max_backoff_ms: default_gateway_max_backoff_ms(),
            jitter_factor: default_gateway_jitter_factor(),
        }
    }
}

impl GatewayConfig {
    /// Validate gateway configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 || self.default_timeout_ms > 300_000 {
            return Err(ConfigError::InvalidGatewayTimeout {
                value: self.default_timeout_ms,
            });
        }

        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidGatewayFailureThreshold {
                value: self.failure_threshold,
            });
        }

        if self.max_retries > 10 {
            return Err(ConfigError::InvalidGatewayMaxRetries {
                value: self.max_retries,
            });
        }

        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::InvalidGatewayBackoffBounds {
                initial: self.initial_backoff_ms,
                max: self.max_backoff_ms,
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidGatewayJitter {
                value: self.jitter_factor,
            });
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            encryption_key: None,
            encryption_key_version: default_encryption_key_version(),
            previous_encryption_keys: BTreeMap::new(),
            cache: CacheConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec!["[REDACTED]".to_string()];
        }
        if config.encryption_key.is_some() {
            config.encryption_key = Some("[REDACTED]".to_string());
        }
        for key in config.previous_encryption_keys.values_mut() {
            *key = "[REDACTED]".to_string();
        }
        if config.cache.redis_url.is_some() {
            config.cache.redis_url = Some("[REDACTED]".to_string());
        }
        config.database_url = "[REDACTED]".to_string();
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    ///
    /// A missing or malformed encryption key is fatal: the service refuses to
    /// start rather than run without credential encryption.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.encryption_key.as_deref() {
            None | Some("") => return Err(ConfigError::MissingEncryptionKey),
            Some(key) => validate_hex_key(key)?,
        }

        if self.encryption_key_version < 1 {
            return Err(ConfigError::InvalidEncryptionKeyVersion {
                version: self.encryption_key_version,
            });
        }

        for (version, key) in &self.previous_encryption_keys {
            if *version == self.encryption_key_version {
                return Err(ConfigError::DuplicateEncryptionKeyVersion { version: *version });
            }
            validate_hex_key(key)?;
        }

        if self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        self.cache.validate()?;
        self.gateway.validate()?;

        Ok(())
    }
}

fn validate_hex_key(key: &str) -> Result<(), ConfigError> {
    if key.len() != ENCRYPTION_KEY_HEX_LEN {
        return Err(ConfigError::InvalidEncryptionKeyLength { length: key.len() });
    }
    if !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::InvalidEncryptionKeyHex);
    }
    Ok(())
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/integration_hub".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_encryption_key_version() -> i32 {
    1
}

fn default_cache_backend() -> String {
    "memory".to_string()
}

fn default_cache_ttl_seconds() -> u64 {
    86400 // 24 hours
}

fn default_cache_scan_batch_size() -> usize {
    1000
}

fn default_gateway_timeout_ms() -> u64 {
    10_000
}

fn default_gateway_failure_threshold() -> u32 {
    5
}

fn default_gateway_cooldown_seconds() -> u64 {
    30
}

fn default_gateway_max_retries() -> u32 {
    2
}

fn default_gateway_initial_backoff_ms() -> u64 {
    200
}

fn default_gateway_max_backoff_ms() -> u64 {
    5000
}

fn default_gateway_jitter_factor() -> f64 {
    0.1 // 10% jitter
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("no operator tokens configured; set HUB_OPERATOR_TOKEN or HUB_OPERATOR_TOKENS")]
    MissingOperatorTokens,
    #[error("encryption key is missing; set HUB_ENCRYPTION_KEY to 64 hex characters")]
    MissingEncryptionKey,
    #[error("encryption key must be exactly 64 hex characters, got {length}")]
    InvalidEncryptionKeyLength { length: usize },
    #[error("encryption key contains non-hex characters")]
    InvalidEncryptionKeyHex,
    #[error("encryption key version must be positive, got {version}")]
    InvalidEncryptionKeyVersion { version: i32 },
    #[error("previous encryption key reuses the active version {version}")]
    DuplicateEncryptionKeyVersion { version: i32 },
    #[error("invalid previous encryption key entry '{entry}'; expected <version>:<hex>")]
    InvalidPreviousEncryptionKey { entry: String },
    #[error("cache backend must be 'memory' or 'redis', got '{value}'")]
    InvalidCacheBackend { value: String },
    #[error("redis cache backend selected but HUB_REDIS_URL is not set")]
    MissingRedisUrl,
    #[error("cache TTL must be positive, got {value}")]
    InvalidCacheTtl { value: u64 },
    #[error("cache scan batch size must be between 1 and 10000, got {value}")]
    InvalidCacheScanBatchSize { value: usize },
    #[error("gateway default timeout must be between 1 and 300000 ms, got {value}")]
    InvalidGatewayTimeout { value: u64 },
    #[error("gateway failure threshold must be at least 1, got {value}")]
    InvalidGatewayFailureThreshold { value: u32 },
    #[error("gateway max retries must not exceed 10, got {value}")]
    InvalidGatewayMaxRetries { value: u32 },
    #[error("gateway initial backoff ({initial}ms) cannot exceed max backoff ({max}ms)")]
    InvalidGatewayBackoffBounds { initial: u64, max: u64 },
    #[error("gateway jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidGatewayJitter { value: f64 },
}

/// Loads configuration using layered `.env` files and `HUB_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration, overlaying process environment on dotenv layers.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut layered = self.collect_layered_env()?;
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("HUB_") {
                layered.insert(stripped.to_string(), value);
            }
        }
        self.build(layered)
    }

    /// Loads configuration from dotenv layers only, ignoring process environment.
    pub fn load_files_only(&self) -> Result<AppConfig, ConfigError> {
        let layered = self.collect_layered_env()?;
        self.build(layered)
    }

    fn build(&self, mut layered: BTreeMap<String, String>) -> Result<AppConfig, ConfigError> {
        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_profile);
        let api_bind_addr = layered
            .remove("API_BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_bind_addr);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);

        // Support both a single token and a comma-separated list
        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            split_list(&tokens)
        } else if let Some(token) = layered.remove("OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let encryption_key = layered
            .remove("ENCRYPTION_KEY")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let encryption_key_version = layered
            .remove("ENCRYPTION_KEY_VERSION")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_encryption_key_version);

        let mut previous_encryption_keys = BTreeMap::new();
        if let Some(entries) = layered.remove("PREVIOUS_ENCRYPTION_KEYS") {
            for entry in split_list(&entries) {
                let (version, key) = entry
                    .split_once(':')
                    .and_then(|(v, k)| v.trim().parse::<i32>().ok().map(|v| (v, k.trim())))
                    .ok_or_else(|| ConfigError::InvalidPreviousEncryptionKey {
                        entry: entry.split(':').next().unwrap_or_default().to_string(),
                    })?;
                previous_encryption_keys.insert(version, key.to_string());
            }
        }

        let cache = CacheConfig {
            backend: layered
                .remove("CACHE_BACKEND")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_cache_backend),
            redis_url: layered.remove("REDIS_URL").filter(|v| !v.is_empty()),
            default_ttl_seconds: layered
                .remove("CACHE_DEFAULT_TTL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_cache_ttl_seconds),
            scan_batch_size: layered
                .remove("CACHE_SCAN_BATCH_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_cache_scan_batch_size),
        };

        let gateway = GatewayConfig {
            default_timeout_ms: layered
                .remove("GATEWAY_DEFAULT_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_gateway_timeout_ms),
            failure_threshold: layered
                .remove("GATEWAY_FAILURE_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_gateway_failure_threshold),
            cooldown_seconds: layered
                .remove("GATEWAY_COOLDOWN_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_gateway_cooldown_seconds),
            max_retries: layered
                .remove("GATEWAY_MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_gateway_max_retries),
            initial_backoff_ms: layered
                .remove("GATEWAY_INITIAL_BACKOFF_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_gateway_initial_backoff_ms),
            max_backoff_ms: layered
                .remove("GATEWAY_MAX_BACKOFF_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_gateway_max_backoff_ms),
            jitter_factor: layered
                .remove("GATEWAY_JITTER_FACTOR")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_gateway_jitter_factor),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            operator_tokens,
            encryption_key,
            encryption_key_version,
            previous_encryption_keys,
            cache,
            gateway,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("HUB_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        values
            .entry("PROFILE".to_string())
            .or_insert_with(|| profile.clone());

        Ok(values)
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("HUB_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn valid_config() -> AppConfig {
        AppConfig {
            operator_tokens: vec!["token".to_string()],
            encryption_key: Some(KEY.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_encryption_key_is_fatal() {
        let config = AppConfig {
            encryption_key: None,
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingEncryptionKey)
        ));
    }

    #[test]
    fn test_encryption_key_wrong_length_rejected() {
        let config = AppConfig {
            encryption_key: Some(KEY[..62].to_string()),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEncryptionKeyLength { length: 62 })
        ));
    }

    #[test]
    fn test_encryption_key_non_hex_rejected() {
        let config = AppConfig {
            encryption_key: Some("z".repeat(64)),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEncryptionKeyHex)
        ));
    }

    #[test]
    fn test_previous_key_cannot_reuse_active_version() {
        let mut config = valid_config();
        config.previous_encryption_keys.insert(1, KEY.to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateEncryptionKeyVersion { version: 1 })
        ));
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let cache = CacheConfig {
            backend: "redis".to_string(),
            ..Default::default()
        };
        assert!(matches!(cache.validate(), Err(ConfigError::MissingRedisUrl)));

        let cache = CacheConfig {
            backend: "memcached".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            cache.validate(),
            Err(ConfigError::InvalidCacheBackend { .. })
        ));
    }

    #[test]
    fn test_gateway_validation() {
        assert!(GatewayConfig::default().validate().is_ok());

        let inverted = GatewayConfig {
            initial_backoff_ms: 10_000,
            max_backoff_ms: 100,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let zero_threshold = GatewayConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(zero_threshold.validate().is_err());

        let bad_jitter = GatewayConfig {
            jitter_factor: 1.5,
            ..Default::default()
        };
        assert!(bad_jitter.validate().is_err());
    }

    #[test]
    fn test_redacted_json_hides_secrets() {
        let mut config = valid_config();
        config.previous_encryption_keys.insert(0, KEY.to_string());
        let json = config.redacted_json().unwrap();
        assert!(!json.contains(KEY));
        assert!(!json.contains("\"token\""));
        assert!(json.contains("[REDACTED]"));
    }
}
