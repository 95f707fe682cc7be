use std::time::Duration;

use backoff::ExponentialBackoff;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::{
    constants::{DEFAULT_ABANDON_HORIZON, DEFAULT_STOP_CHECKING_AFTER},
    errors::ReporterResult,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub server: ServerSettings,
    pub redis: RedisSettings,
    pub screeps: ScreepsSettings,
    pub worker: WorkerSettings,
    pub channels: ChannelSettings,
    pub retry: RetrySettings,
}

impl Settings {
    pub fn new() -> ReporterResult<Self> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        println!("Loading configuration for RUN_MODE: {}", &run_mode);

        let s = Config::builder()
            // Load environment-specific file (e.g., development.toml, production.toml)
            .add_source(
                File::with_name(&format!("config/{}", run_mode))
                    .format(FileFormat::Toml)
                    .required(true),
            )
            // Add environment variables (e.g., APP_REDIS__URL=redis://...)
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(s.try_deserialize()?)
    }

    /// Parses settings from an inline TOML document, without environment overrides.
    pub fn from_toml_str(toml: &str) -> ReporterResult<Self> {
        Ok(Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub directory: String,
    pub filename: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    /// Serve /health and /metrics while running continuously
    #[serde(default)]
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
    pub log_level: String,
    pub metrics_auth_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisSettings {
    pub url: String,
    pub key_prefix: String,
    pub schema_version: String,
    /// Redis operation timeout in seconds (prevents infinite waiting on Redis operations)
    pub operation_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScreepsSettings {
    pub api_root: String,
    pub alliances_url: String,
    pub token: Option<String>,
    /// Lookback used by the battle feed when no cursor tick is stored
    pub battles_lookback_interval: u64,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerSettings {
    pub ingest_interval_seconds: u64,
    pub pending_retry_seconds: u64,
    pub idle_poll_seconds: u64,
    pub report_interval_seconds: u64,
    #[serde(default = "default_abandon_horizon")]
    pub abandon_horizon_ticks: u64,
    #[serde(default = "default_stop_checking_after")]
    pub stop_checking_after_ticks: u64,
}

fn default_abandon_horizon() -> u64 {
    DEFAULT_ABANDON_HORIZON
}

fn default_stop_checking_after() -> u64 {
    DEFAULT_STOP_CHECKING_AFTER
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelSettings {
    #[serde(default)]
    pub cli: bool,
    pub slack_webhook_url: Option<String>,
    #[serde(default = "default_slack_separator")]
    pub slack_batch_separator: String,
}

fn default_slack_separator() -> String {
    "\n".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub max_elapsed_time_ms: u64,
}

impl RetrySettings {
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            max_elapsed_time: Some(Duration::from_millis(self.max_elapsed_time_ms)),
            ..ExponentialBackoff::default()
        }
    }
}
