use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Environment variable consulted when `provider.api_key` is not set.
pub const API_KEY_ENV: &str = "DISPATCHWX_API_KEY";

/// Largest number of airport codes the provider accepts in one request.
pub const PROVIDER_MAX_BATCH: usize = 25;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Weather provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Weather cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Risk engine settings
    #[serde(default)]
    pub risk: RiskConfig,
}

/// Aviation weather provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the provider API
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,

    /// API key sent in the `X-API-Key` header.
    /// Falls back to the `DISPATCHWX_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Airport codes per request (provider limit is 25)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_provider_base_url() -> String {
    "https://api.checkwx.com".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_batch_size() -> usize {
    PROVIDER_MAX_BATCH
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            batch_size: default_batch_size(),
        }
    }
}

impl ProviderConfig {
    /// Resolve the API key from the config file or the environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConfigError::MissingSetting("provider.api_key".to_string()))
    }
}

/// Weather cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite database path. Empty means `<config_dir>/dispatchwx.db`.
    #[serde(default)]
    pub database_path: String,

    /// Maximum simultaneous outbound fetches
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Retries after the first failed attempt
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    #[serde(default = "default_retry_jitter_ms")]
    pub retry_jitter_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Serve expired records while refreshing in the background
    #[serde(default = "default_serve_stale")]
    pub serve_stale: bool,
}

fn default_max_concurrent_fetches() -> usize {
    5
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_initial_delay_ms() -> u64 {
    300
}

fn default_retry_jitter_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    5000
}

fn default_serve_stale() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_path: String::new(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            retry_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_jitter_ms: default_retry_jitter_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            serve_stale: default_serve_stale(),
        }
    }
}

/// Flight phase windows used by the risk engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// How long before departure the planning phase starts
    #[serde(default = "default_planning_window_hours")]
    pub planning_window_hours: u32,

    #[serde(default = "default_departure_window_before_minutes")]
    pub departure_window_before_minutes: u32,

    #[serde(default = "default_departure_window_after_minutes")]
    pub departure_window_after_minutes: u32,

    #[serde(default = "default_arrival_window_before_minutes")]
    pub arrival_window_before_minutes: u32,
}

fn default_planning_window_hours() -> u32 {
    12
}

fn default_departure_window_before_minutes() -> u32 {
    60
}

fn default_departure_window_after_minutes() -> u32 {
    30
}

fn default_arrival_window_before_minutes() -> u32 {
    60
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            planning_window_hours: default_planning_window_hours(),
            departure_window_before_minutes: default_departure_window_before_minutes(),
            departure_window_after_minutes: default_departure_window_after_minutes(),
            arrival_window_before_minutes: default_arrival_window_before_minutes(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dispatchwx");

        Self {
            config_dir,
            provider: ProviderConfig::default(),
            cache: CacheConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, creating a default file if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        Self::load_validated_from(&Self::config_path()?)
    }

    /// Same as [`Config::load_validated`] for an explicit path
    pub fn load_validated_from(config_path: &Path) -> Result<(Self, ValidationResult)> {
        let config = Self::load_from(config_path)?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.provider.base_url, "provider.base_url", &mut result);

        if self.provider.timeout_secs == 0 {
            result.add_error("provider.timeout_secs", "Timeout must be greater than 0");
        } else if self.provider.timeout_secs > 60 {
            result.add_warning(
                "provider.timeout_secs",
                "Provider timeout is unusually long (>60s)",
            );
        }

        if self.provider.batch_size == 0 {
            result.add_error("provider.batch_size", "Batch size must be greater than 0");
        } else if self.provider.batch_size > PROVIDER_MAX_BATCH {
            result.add_error(
                "provider.batch_size",
                format!("Batch size cannot exceed {}", PROVIDER_MAX_BATCH),
            );
        }

        if self.provider.resolve_api_key().is_err() {
            result.add_warning(
                "provider.api_key",
                format!(
                    "No API key configured (set provider.api_key or {})",
                    API_KEY_ENV
                ),
            );
        }

        if self.cache.max_concurrent_fetches == 0 {
            result.add_error(
                "cache.max_concurrent_fetches",
                "At least one concurrent fetch is required",
            );
        }

        if self.cache.retry_initial_delay_ms > self.cache.retry_max_delay_ms {
            result.add_warning(
                "cache.retry_initial_delay_ms",
                "Initial retry delay is larger than the maximum delay",
            );
        }

        if self.risk.planning_window_hours == 0 {
            result.add_warning(
                "risk.planning_window_hours",
                "Planning phase disabled (0 hours)",
            );
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Path of the SQLite database holding the weather cache and flights
    pub fn database_path(&self) -> PathBuf {
        if self.cache.database_path.is_empty() {
            self.config_dir.join("dispatchwx.db")
        } else {
            PathBuf::from(&self.cache.database_path)
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("dispatchwx");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = Config::default();
        config.provider.base_url = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "provider.base_url"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.provider.base_url = "ftp://api.example.com".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_batch_size_over_provider_limit() {
        let mut config = Config::default();
        config.provider.batch_size = 40;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "provider.batch_size"));
    }

    #[test]
    fn test_zero_concurrency_is_error() {
        let mut config = Config::default();
        config.cache.max_concurrent_fetches = 0;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "cache.max_concurrent_fetches"));
    }

    #[test]
    fn test_configured_api_key_wins() {
        let provider = ProviderConfig {
            api_key: Some("  secret  ".to_string()),
            ..ProviderConfig::default()
        };
        assert_eq!(provider.resolve_api_key().ok().as_deref(), Some("secret"));
    }

    #[test]
    fn test_database_path_defaults_into_config_dir() {
        let mut config = Config::default();
        config.config_dir = PathBuf::from("/tmp/dwx");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/dwx/dispatchwx.db"));

        config.cache.database_path = "/var/lib/dwx.db".to_string();
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/dwx.db"));
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.cache.max_concurrent_fetches, 5);
        assert_eq!(config.provider.batch_size, 25);
    }

    #[test]
    fn test_load_from_fills_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "config_dir = \"/tmp/dwx\"\n\n[provider]\napi_key = \"abc\"\ntimeout_secs = 8\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.provider.timeout_secs, 8);
        assert_eq!(config.provider.base_url, "https://api.checkwx.com");
        assert_eq!(config.cache.retry_attempts, 2);
        assert!(config.cache.serve_stale);
        assert_eq!(config.risk.planning_window_hours, 12);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "config_dir = [").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
