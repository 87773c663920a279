//! Centralized configuration system

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::{AppError, Result};

pub const DEFAULT_THREE_COMMAS_BASE_URL: &str = "https://api.3commas.io";
pub const DEFAULT_BINANCE_WSS_BASE: &str = "wss://stream.binance.com:9443";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub server: ServerConfig,
    pub three_commas: ThreeCommasConfig,
    pub market_feed: MarketFeedConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `*` allows any origin.
    pub cors_origin: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThreeCommasConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Enables the debug routes and verbose request logging.
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MarketFeedConfig {
    pub ws_base: String,
    pub reconnect_delay_ms: u64,
    pub price_ttl_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub balance_ttl_ms: u64,
    /// Ban length applied when a 429/418 arrives without `Retry-After`.
    pub default_ban_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: String::from("info"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 3000,
            cors_origin: String::from("*"),
        }
    }
}

impl Default for ThreeCommasConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            base_url: String::from(DEFAULT_THREE_COMMAS_BASE_URL),
            user_agent: String::from("threecommas-proxy/0.1"),
            request_timeout_secs: 10,
            debug: false,
        }
    }
}

impl Default for MarketFeedConfig {
    fn default() -> Self {
        Self {
            ws_base: String::from(DEFAULT_BINANCE_WSS_BASE),
            reconnect_delay_ms: 1000,
            price_ttl_ms: 30_000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            balance_ttl_ms: 60_000,
            default_ban_secs: 60,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_file: String::from("data/userAccounts.json"),
        }
    }
}

impl ThreeCommasConfig {
    /// `(api_key, api_secret)`, or a configuration error when either is blank.
    pub fn credentials(&self) -> Result<(&str, &str)> {
        let key = self.api_key.as_deref().filter(|k| !k.is_empty());
        let secret = self.api_secret.as_deref().filter(|s| !s.is_empty());
        match (key, secret) {
            (Some(key), Some(secret)) => Ok((key, secret)),
            _ => Err(AppError::Config(
                "Missing THREE_COMMAS_API_KEY or THREE_COMMAS_API_SECRET in environment".to_string(),
            )),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl MarketFeedConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_millis(self.price_ttl_ms)
    }
}

impl CacheConfig {
    pub fn balance_ttl(&self) -> Duration {
        Duration::from_millis(self.balance_ttl_ms)
    }
}

impl Config {
    /// Load configuration from a file. The format follows the extension.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file_format = path.as_ref().extension().and_then(|os| os.to_str());
        let mut file = File::open(path.as_ref())
            .await
            .map_err(|e| AppError::Config(format!("Failed to open config file: {e}")))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .await
            .map_err(|e| AppError::Config(format!("Failed to read config file: {e}")))?;
        Self::parse(&contents, file_format)
    }

    pub fn parse(contents: &str, file_format: Option<&str>) -> Result<Self> {
        match file_format {
            Some("toml") => toml::from_str(contents)
                .map_err(|e| AppError::Config(format!("Failed to parse TOML config: {e:?}"))),
            Some("json") => serde_json::from_str(contents)
                .map_err(|e| AppError::Config(format!("Failed to parse JSON config: {e:?}"))),
            Some("yaml") | Some("yml") => serde_yaml::from_str(contents)
                .map_err(|e| AppError::Config(format!("Failed to parse YAML config: {e:?}"))),
            _ => Err(AppError::Config("Unsupported config file format".to_string())),
        }
    }

    /// Load `path` if it exists, otherwise start from defaults; then apply
    /// environment overrides.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            Self::from_file(path).await?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|name| env::var(name).ok());
        Ok(config)
    }

    /// Overlay values from the environment. `lookup` is injectable for tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| sanitize_env(&v))
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("THREE_COMMAS_API_KEY") {
            self.three_commas.api_key = Some(v);
        }
        if let Some(v) = get("THREE_COMMAS_API_SECRET") {
            self.three_commas.api_secret = Some(v);
        }
        if let Some(v) = get("THREE_COMMAS_BASE_URL") {
            self.three_commas.base_url = v;
        }
        if let Some(v) = get("DEBUG_3C") {
            self.three_commas.debug = v == "true";
        }
        if let Some(v) = get("BINANCE_WSS_BASE") {
            self.market_feed.ws_base = v;
        }
        if let Some(port) = get("PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("CORS_ORIGIN") {
            self.server.cors_origin = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.general.log_level = v;
        }
        if let Some(v) = get("DATA_FILE") {
            self.store.data_file = v;
        }
    }
}

/// Trim whitespace and one pair of surrounding quotes, as left behind when
/// values are pasted into `.env` files.
pub fn sanitize_env(value: &str) -> String {
    let trimmed = value.trim();
    let quoted = trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')));
    if quoted {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}
