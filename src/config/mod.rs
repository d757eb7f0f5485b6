use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Valkey connection URL. Empty = in-memory store (paper mode).
    #[serde(default)]
    pub url: String,
    /// Key namespace prefix.
    #[serde(default = "default_store_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Bind address for the webhook listener.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedsConfig {
    /// JsonOdds REST base URL (authoritative proposition feed).
    #[serde(default = "default_jsonodds_url")]
    pub jsonodds_url: String,
    /// The Rundown base URL (RapidAPI).
    #[serde(default = "default_rundown_url")]
    pub rundown_url: String,
    #[serde(default = "default_rundown_host")]
    pub rundown_host: String,
    /// Sportspage base URL (RapidAPI).
    #[serde(default = "default_sportspage_url")]
    pub sportspage_url: String,
    #[serde(default = "default_sportspage_host")]
    pub sportspage_host: String,
    /// API key - loaded from env JSONODDS_API_KEY
    #[serde(default)]
    pub jsonodds_api_key: String,
    /// API key - loaded from env RAPIDAPI_API_KEY
    #[serde(default)]
    pub rapidapi_api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Reconciliation cycle interval in seconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Age past which a Final contest moves to the archive, in hours.
    #[serde(default = "default_archive_age")]
    pub archive_age_hours: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackfillConfig {
    /// Block-explorer log API base URL.
    #[serde(default = "default_explorer_url")]
    pub explorer_url: String,
    /// Router contract address whose logs get replayed.
    #[serde(default)]
    pub contract_address: String,
    /// How many recent blocks a backfill scans.
    #[serde(default = "default_backfill_blocks")]
    pub block_span: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_store_prefix() -> String {
    "courtside".to_string()
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_jsonodds_url() -> String {
    "https://jsonodds.com".to_string()
}
fn default_rundown_url() -> String {
    "https://therundown-therundown-v1.p.rapidapi.com".to_string()
}
fn default_rundown_host() -> String {
    "therundown-therundown-v1.p.rapidapi.com".to_string()
}
fn default_sportspage_url() -> String {
    "https://sportspage-feeds.p.rapidapi.com".to_string()
}
fn default_sportspage_host() -> String {
    "sportspage-feeds.p.rapidapi.com".to_string()
}
fn default_refresh_interval() -> u64 {
    900
}
fn default_archive_age() -> u64 {
    48
}
fn default_explorer_url() -> String {
    "https://api.arbiscan.io/api".to_string()
}
fn default_backfill_blocks() -> u64 {
    50_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            prefix: default_store_prefix(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            jsonodds_url: default_jsonodds_url(),
            rundown_url: default_rundown_url(),
            rundown_host: default_rundown_host(),
            sportspage_url: default_sportspage_url(),
            sportspage_host: default_sportspage_host(),
            jsonodds_api_key: String::new(),
            rapidapi_api_key: String::new(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            archive_age_hours: default_archive_age(),
        }
    }
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            explorer_url: default_explorer_url(),
            contract_address: String::new(),
            block_span: default_backfill_blocks(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for secrets.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.overlay_env();
        Ok(config)
    }

    /// Load a default config with env-only secrets (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config {
            store: StoreConfig {
                url: std::env::var("VALKEY_URL").unwrap_or_default(),
                prefix: std::env::var("STORE_PREFIX").unwrap_or_else(|_| default_store_prefix()),
            },
            webhook: WebhookConfig {
                bind_addr: std::env::var("WEBHOOK_BIND_ADDR")
                    .unwrap_or_else(|_| default_bind_addr()),
            },
            feeds: FeedsConfig::default(),
            reconcile: ReconcileConfig::default(),
            backfill: BackfillConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.overlay_env();
        config
    }

    // Secrets never live in the config file.
    fn overlay_env(&mut self) {
        if let Ok(key) = std::env::var("JSONODDS_API_KEY") {
            self.feeds.jsonodds_api_key = key;
        }
        if let Ok(key) = std::env::var("RAPIDAPI_API_KEY") {
            self.feeds.rapidapi_api_key = key;
        }
        if let Ok(url) = std::env::var("VALKEY_URL") {
            self.store.url = url;
        }
        if let Ok(addr) = std::env::var("ROUTER_CONTRACT_ADDRESS") {
            self.backfill.contract_address = addr;
        }
    }

    pub fn has_feed_credentials(&self) -> bool {
        !self.feeds.jsonodds_api_key.is_empty() && !self.feeds.rapidapi_api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.webhook.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.reconcile.refresh_interval_secs, 900);
        assert_eq!(config.reconcile.archive_age_hours, 48);
        assert!(config.store.url.is_empty());
        assert!(!config.has_feed_credentials());
    }

    #[test]
    fn partial_sections_override_defaults() {
        let config: Config = toml::from_str(
            r#"
            [reconcile]
            refresh_interval_secs = 60

            [logging]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.reconcile.refresh_interval_secs, 60);
        assert_eq!(config.reconcile.archive_age_hours, 48);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }
}
