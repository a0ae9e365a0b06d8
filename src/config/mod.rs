//! Configuration loading for the notetaker orchestration service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `NOTETAKER_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

const ENV_PREFIX: &str = "NOTETAKER_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `NOTETAKER_*` environment variables.
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
    #[serde(default = "default_calendar_api_base")]
    pub calendar_api_base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_webhook_secret: Option<String>,
    #[serde(default = "default_notetaker_name")]
    pub notetaker_name: String,
    #[serde(default = "default_transcoding_api_base")]
    pub transcoding_api_base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcoding_token_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcoding_token_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcoding_webhook_secret: Option<String>,
    #[serde(default = "default_transcoding_webhook_tolerance_seconds")]
    pub transcoding_webhook_tolerance_seconds: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Dispatch queue worker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DispatchConfig {
    #[serde(default = "default_dispatch_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_dispatch_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_dispatch_claim_batch")]
    pub claim_batch: u64,
    #[serde(default = "default_dispatch_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_dispatch_max_run_seconds")]
    pub max_run_seconds: u64,
    #[serde(default)]
    pub retry_policy: RetryPolicyConfig,
}

/// Backoff policy applied to failed dispatch attempts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetryPolicyConfig {
    /// Base retry interval in seconds (default: 30)
    ///
    /// Subsequent retries use exponential backoff: base_seconds * 2^(attempts - 1).
    #[serde(default = "default_retry_base_seconds")]
    pub base_seconds: u64,

    /// Upper bound for a single backoff interval in seconds (default: 900)
    #[serde(default = "default_retry_max_seconds")]
    pub max_seconds: u64,

    /// Random jitter applied on top of the computed backoff, as a fraction (default: 0.1)
    #[serde(default = "default_retry_jitter_factor")]
    pub jitter_factor: f64,
}

/// Stalled-recording monitor parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_monitor_stale_after_seconds")]
    pub stale_after_seconds: u64,
    #[serde(default = "default_monitor_batch_size")]
    pub batch_size: u64,
}

/// Event synchronizer parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncConfig {
    #[serde(default = "default_sync_window_days")]
    pub window_days: i64,
    #[serde(default = "default_sync_dedup_interval_seconds")]
    pub dedup_interval_seconds: u64,
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
            calendar_api_base: default_calendar_api_base(),
            calendar_api_key: None,
            calendar_webhook_secret: None,
            notetaker_name: default_notetaker_name(),
            transcoding_api_base: default_transcoding_api_base(),
            transcoding_token_id: None,
            transcoding_token_secret: None,
            transcoding_webhook_secret: None,
            transcoding_webhook_tolerance_seconds: default_transcoding_webhook_tolerance_seconds(),
            http_timeout_ms: default_http_timeout_ms(),
            dispatch: DispatchConfig::default(),
            monitor: MonitorConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_dispatch_tick_ms(),
            concurrency: default_dispatch_concurrency(),
            claim_batch: default_dispatch_claim_batch(),
            max_attempts: default_dispatch_max_attempts(),
            max_run_seconds: default_dispatch_max_run_seconds(),
            retry_policy: RetryPolicyConfig::default(),
        }
    }
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            base_seconds: default_retry_base_seconds(),
            max_seconds: default_retry_max_seconds(),
            jitter_factor: default_retry_jitter_factor(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_monitor_interval_seconds(),
            stale_after_seconds: default_monitor_stale_after_seconds(),
            batch_size: default_monitor_batch_size(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            window_days: default_sync_window_days(),
            dedup_interval_seconds: default_sync_dedup_interval_seconds(),
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
            config.operator_tokens = vec![REDACTED.to_string()];
        }
        for secret in [
            &mut config.calendar_api_key,
            &mut config.calendar_webhook_secret,
            &mut config.transcoding_token_id,
            &mut config.transcoding_token_secret,
            &mut config.transcoding_webhook_secret,
        ] {
            if secret.is_some() {
                *secret = Some(REDACTED.to_string());
            }
        }
        serde_json::to_string_pretty(&config)
    }

    fn is_local_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        for (field, value) in [
            ("CALENDAR_API_BASE", &self.calendar_api_base),
            ("TRANSCODING_API_BASE", &self.transcoding_api_base),
        ] {
            Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
                field: field.to_string(),
                value: value.clone(),
                source,
            })?;
        }

        // Credentials are optional locally so the service can boot against mocks.
        if !self.is_local_profile() {
            if self.calendar_api_key.is_none() {
                return Err(ConfigError::MissingSetting("CALENDAR_API_KEY"));
            }
            if self.calendar_webhook_secret.is_none() {
                return Err(ConfigError::MissingSetting("CALENDAR_WEBHOOK_SECRET"));
            }
            if self.transcoding_token_id.is_none() || self.transcoding_token_secret.is_none() {
                return Err(ConfigError::MissingSetting("TRANSCODING_TOKEN_ID/SECRET"));
            }
            if self.transcoding_webhook_secret.is_none() {
                return Err(ConfigError::MissingSetting("TRANSCODING_WEBHOOK_SECRET"));
            }
        }

        if self.http_timeout_ms < 100 || self.http_timeout_ms > 120_000 {
            return Err(ConfigError::InvalidHttpTimeout {
                value: self.http_timeout_ms,
            });
        }

        if self.transcoding_webhook_tolerance_seconds == 0 {
            return Err(ConfigError::InvalidWebhookTolerance {
                value: self.transcoding_webhook_tolerance_seconds,
            });
        }

        self.dispatch.validate()?;
        self.monitor.validate()?;
        self.sync.validate()?;

        Ok(())
    }
}

impl DispatchConfig {
    /// Validate dispatch worker bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms < 100 || self.tick_ms > 60_000 {
            return Err(ConfigError::InvalidDispatchTick { value: self.tick_ms });
        }
        if self.concurrency == 0 || self.concurrency > 64 {
            return Err(ConfigError::InvalidDispatchConcurrency {
                value: self.concurrency,
            });
        }
        if self.claim_batch == 0 {
            return Err(ConfigError::InvalidDispatchClaimBatch);
        }
        if self.max_attempts < 1 || self.max_attempts > 50 {
            return Err(ConfigError::InvalidDispatchMaxAttempts {
                value: self.max_attempts,
            });
        }
        self.retry_policy.validate()
    }
}

impl RetryPolicyConfig {
    /// Validate retry policy bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_seconds == 0 || self.base_seconds > self.max_seconds {
            return Err(ConfigError::InvalidRetryBounds {
                base: self.base_seconds,
                max: self.max_seconds,
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidRetryJitter {
                value: self.jitter_factor,
            });
        }

        Ok(())
    }
}

impl MonitorConfig {
    /// Validate monitor bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds < 10 || self.interval_seconds > 3600 {
            return Err(ConfigError::InvalidMonitorInterval {
                value: self.interval_seconds,
            });
        }
        if self.stale_after_seconds < 60 {
            return Err(ConfigError::InvalidMonitorStaleness {
                value: self.stale_after_seconds,
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidMonitorBatch);
        }
        Ok(())
    }
}

impl SyncConfig {
    /// Validate synchronizer bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_days < 1 || self.window_days > 366 {
            return Err(ConfigError::InvalidSyncWindow {
                value: self.window_days,
            });
        }
        if self.dedup_interval_seconds < 60 {
            return Err(ConfigError::InvalidDedupInterval {
                value: self.dedup_interval_seconds,
            });
        }
        Ok(())
    }
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
    "sqlite://notetaker.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_calendar_api_base() -> String {
    "https://api.us.nylas.com/v3".to_string()
}

fn default_notetaker_name() -> String {
    "Notetaker".to_string()
}

fn default_transcoding_api_base() -> String {
    "https://api.mux.com/video/v1".to_string()
}

fn default_transcoding_webhook_tolerance_seconds() -> u64 {
    300
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_dispatch_tick_ms() -> u64 {
    1000
}

fn default_dispatch_concurrency() -> usize {
    4
}

fn default_dispatch_claim_batch() -> u64 {
    16
}

fn default_dispatch_max_attempts() -> i32 {
    5
}

fn default_dispatch_max_run_seconds() -> u64 {
    120
}

fn default_retry_base_seconds() -> u64 {
    30
}

fn default_retry_max_seconds() -> u64 {
    900
}

fn default_retry_jitter_factor() -> f64 {
    0.1
}

fn default_monitor_interval_seconds() -> u64 {
    300
}

fn default_monitor_stale_after_seconds() -> u64 {
    30 * 60
}

fn default_monitor_batch_size() -> u64 {
    100
}

fn default_sync_window_days() -> i64 {
    90
}

fn default_sync_dedup_interval_seconds() -> u64 {
    3600
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
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("invalid url for {field} '{value}': {source}")]
    InvalidUrl {
        field: String,
        value: String,
        source: url::ParseError,
    },
    #[error(
        "no operator tokens configured; set NOTETAKER_OPERATOR_TOKEN or NOTETAKER_OPERATOR_TOKENS"
    )]
    MissingOperatorTokens,
    #[error("{0} is required outside local/test profiles; set NOTETAKER_{0}")]
    MissingSetting(&'static str),
    #[error("http timeout must be between 100 and 120000 ms, got {value}")]
    InvalidHttpTimeout { value: u64 },
    #[error("transcoding webhook tolerance must be positive, got {value}")]
    InvalidWebhookTolerance { value: u64 },
    #[error("dispatch tick must be between 100 and 60000 ms, got {value}")]
    InvalidDispatchTick { value: u64 },
    #[error("dispatch concurrency must be between 1 and 64, got {value}")]
    InvalidDispatchConcurrency { value: usize },
    #[error("dispatch claim batch must be positive")]
    InvalidDispatchClaimBatch,
    #[error("dispatch max attempts must be between 1 and 50, got {value}")]
    InvalidDispatchMaxAttempts { value: i32 },
    #[error("retry base seconds ({base}) must be positive and not exceed max seconds ({max})")]
    InvalidRetryBounds { base: u64, max: u64 },
    #[error("retry jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidRetryJitter { value: f64 },
    #[error("monitor interval must be between 10 and 3600 seconds, got {value}")]
    InvalidMonitorInterval { value: u64 },
    #[error("monitor staleness threshold must be at least 60 seconds, got {value}")]
    InvalidMonitorStaleness { value: u64 },
    #[error("monitor batch size must be positive")]
    InvalidMonitorBatch,
    #[error("sync window must be between 1 and 366 days, got {value}")]
    InvalidSyncWindow { value: i64 },
    #[error("dedup sweep interval must be at least 60 seconds, got {value}")]
    InvalidDedupInterval { value: u64 },
}

/// Loads configuration using layered `.env` files and `NOTETAKER_*` env vars.
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

    /// Loads configuration from the layered files and the process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);

        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            split_list(&tokens)
        } else if let Some(token) = take_string(&mut layered, "OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let retry_policy = RetryPolicyConfig {
            base_seconds: take_parsed(&mut layered, "DISPATCH_RETRY_BASE_SECONDS")?
                .unwrap_or_else(default_retry_base_seconds),
            max_seconds: take_parsed(&mut layered, "DISPATCH_RETRY_MAX_SECONDS")?
                .unwrap_or_else(default_retry_max_seconds),
            jitter_factor: take_parsed(&mut layered, "DISPATCH_RETRY_JITTER_FACTOR")?
                .unwrap_or_else(default_retry_jitter_factor),
        };

        let dispatch = DispatchConfig {
            tick_ms: take_parsed(&mut layered, "DISPATCH_TICK_MS")?
                .unwrap_or_else(default_dispatch_tick_ms),
            concurrency: take_parsed(&mut layered, "DISPATCH_CONCURRENCY")?
                .unwrap_or_else(default_dispatch_concurrency),
            claim_batch: take_parsed(&mut layered, "DISPATCH_CLAIM_BATCH")?
                .unwrap_or_else(default_dispatch_claim_batch),
            max_attempts: take_parsed(&mut layered, "DISPATCH_MAX_ATTEMPTS")?
                .unwrap_or_else(default_dispatch_max_attempts),
            max_run_seconds: take_parsed(&mut layered, "DISPATCH_MAX_RUN_SECONDS")?
                .unwrap_or_else(default_dispatch_max_run_seconds),
            retry_policy,
        };

        let monitor = MonitorConfig {
            interval_seconds: take_parsed(&mut layered, "MONITOR_INTERVAL_SECONDS")?
                .unwrap_or_else(default_monitor_interval_seconds),
            stale_after_seconds: take_parsed(&mut layered, "MONITOR_STALE_AFTER_SECONDS")?
                .unwrap_or_else(default_monitor_stale_after_seconds),
            batch_size: take_parsed(&mut layered, "MONITOR_BATCH_SIZE")?
                .unwrap_or_else(default_monitor_batch_size),
        };

        let sync = SyncConfig {
            window_days: take_parsed(&mut layered, "SYNC_WINDOW_DAYS")?
                .unwrap_or_else(default_sync_window_days),
            dedup_interval_seconds: take_parsed(&mut layered, "SYNC_DEDUP_INTERVAL_SECONDS")?
                .unwrap_or_else(default_sync_dedup_interval_seconds),
        };

        let config = AppConfig {
            profile,
            api_bind_addr: take_string(&mut layered, "API_BIND_ADDR")
                .unwrap_or_else(default_api_bind_addr),
            log_level: take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level),
            log_format: take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format),
            database_url: take_string(&mut layered, "DATABASE_URL")
                .unwrap_or_else(default_database_url),
            db_max_connections: take_parsed(&mut layered, "DB_MAX_CONNECTIONS")?
                .unwrap_or_else(default_db_max_connections),
            db_acquire_timeout_ms: take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
                .unwrap_or_else(default_db_acquire_timeout_ms),
            operator_tokens,
            calendar_api_base: take_string(&mut layered, "CALENDAR_API_BASE")
                .unwrap_or_else(default_calendar_api_base),
            calendar_api_key: take_string(&mut layered, "CALENDAR_API_KEY"),
            calendar_webhook_secret: take_string(&mut layered, "CALENDAR_WEBHOOK_SECRET"),
            notetaker_name: take_string(&mut layered, "NOTETAKER_NAME")
                .unwrap_or_else(default_notetaker_name),
            transcoding_api_base: take_string(&mut layered, "TRANSCODING_API_BASE")
                .unwrap_or_else(default_transcoding_api_base),
            transcoding_token_id: take_string(&mut layered, "TRANSCODING_TOKEN_ID"),
            transcoding_token_secret: take_string(&mut layered, "TRANSCODING_TOKEN_SECRET"),
            transcoding_webhook_secret: take_string(&mut layered, "TRANSCODING_WEBHOOK_SECRET"),
            transcoding_webhook_tolerance_seconds: take_parsed(
                &mut layered,
                "TRANSCODING_WEBHOOK_TOLERANCE_SECONDS",
            )?
            .unwrap_or_else(default_transcoding_webhook_tolerance_seconds),
            http_timeout_ms: take_parsed(&mut layered, "HTTP_TIMEOUT_MS")?
                .unwrap_or_else(default_http_timeout_ms),
            dispatch,
            monitor,
            sync,
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

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
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

        Ok((values, profile))
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
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
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

fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match take_string(layered, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
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
    use std::fs;

    fn valid_config() -> AppConfig {
        AppConfig {
            operator_tokens: vec!["op".to_string()],
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_default_config_validates_with_operator_token() {
        assert!(valid_config().validate().is_ok());
        assert!(matches!(
            AppConfig::default().validate(),
            Err(ConfigError::MissingOperatorTokens)
        ));
    }

    #[test]
    fn test_production_profile_requires_credentials() {
        let config = AppConfig {
            profile: "prod".to_string(),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSetting("CALENDAR_API_KEY"))
        ));
    }

    #[test]
    fn test_retry_policy_validation() {
        let mut policy = RetryPolicyConfig::default();
        assert!(policy.validate().is_ok());

        policy.base_seconds = 1000;
        policy.max_seconds = 10;
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::InvalidRetryBounds { .. })
        ));

        let policy = RetryPolicyConfig {
            jitter_factor: 1.5,
            ..RetryPolicyConfig::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::InvalidRetryJitter { .. })
        ));
    }

    #[test]
    fn test_monitor_defaults_use_thirty_minute_staleness() {
        assert_eq!(MonitorConfig::default().stale_after_seconds, 1800);
        assert_eq!(SyncConfig::default().window_days, 90);
    }

    #[test]
    fn test_redacted_json_hides_secrets() {
        let config = AppConfig {
            calendar_api_key: Some("super-secret".to_string()),
            transcoding_webhook_secret: Some("another-secret".to_string()),
            ..valid_config()
        };
        let json = config.redacted_json().unwrap();
        assert!(!json.contains("super-secret"));
        assert!(!json.contains("another-secret"));
        assert!(json.contains(REDACTED));
    }

    #[test]
    fn test_loader_reads_layered_env_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(".env"),
            "NOTETAKER_OPERATOR_TOKENS=\"a, b\"\nNOTETAKER_DISPATCH_MAX_ATTEMPTS=3\nIGNORED=1\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(".env.local"),
            "NOTETAKER_DISPATCH_MAX_ATTEMPTS=7\n",
        )
        .unwrap();

        let config = ConfigLoader::with_base_dir(dir.path().to_path_buf())
            .load()
            .unwrap();
        assert_eq!(config.operator_tokens, vec!["a", "b"]);
        assert_eq!(config.dispatch.max_attempts, 7);
        assert_eq!(config.profile, "local");
    }

    #[test]
    fn test_take_parsed_rejects_garbage() {
        let mut layered = BTreeMap::new();
        layered.insert("HTTP_TIMEOUT_MS".to_string(), "soon".to_string());
        let result: Result<Option<u64>, _> = take_parsed(&mut layered, "HTTP_TIMEOUT_MS");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
