//! Shared state handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::cache::MarketCache;
use crate::config::Config;
use crate::connectors::binance::MarketFeed;
use crate::connectors::three_commas::ThreeCommasRestClient;
use crate::connectors::traits::ThreeCommasApi;
use crate::error::{AppError, Result};
use crate::store::AccountStore;

/// Timeout for the public IP probes.
pub const IP_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state, passed to all route handlers via `axum::extract::State`.
pub struct AppState {
    pub config: Config,
    pub cache: Arc<MarketCache>,
    pub feed: MarketFeed,
    pub upstream: Arc<dyn ThreeCommasApi>,
    pub store: AccountStore,
    /// Plain client for outbound calls that are not signed.
    pub http: Client,
}

impl AppState {
    /// Wire the real upstream client and feed from `config`.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let upstream = Arc::new(ThreeCommasRestClient::new(config.three_commas.clone())?);
        Self::with_upstream(config, upstream)
    }

    /// Same as `new` with a caller-supplied upstream.
    pub fn with_upstream(config: Config, upstream: Arc<dyn ThreeCommasApi>) -> Result<Arc<Self>> {
        let cache = Arc::new(MarketCache::new());
        let feed = MarketFeed::new(config.market_feed.clone(), Arc::clone(&cache));
        let store = AccountStore::new(&config.store.data_file);
        let http = Client::builder()
            .timeout(IP_PROBE_TIMEOUT)
            .build()
            .map_err(|e| AppError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Arc::new(Self {
            config,
            cache,
            feed,
            upstream,
            store,
            http,
        }))
    }

    pub fn debug_enabled(&self) -> bool {
        self.config.three_commas.debug
    }
}
