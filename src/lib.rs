//! 3Commas signing proxy with a Binance book-ticker price cache.

// Define modules
pub mod cache;
pub mod config;
pub mod connectors;
pub mod error;
pub mod server;
pub mod signing;
pub mod state;
pub mod store;
pub mod types;

// Re-export key components for easier usage
pub use cache::MarketCache;
pub use config::Config;
pub use connectors::binance::MarketFeed;
pub use connectors::three_commas::ThreeCommasRestClient;
pub use connectors::traits::ThreeCommasApi;
pub use error::{AppError, Result};
pub use signing::{sign, SignedRequest};
pub use state::AppState;
pub use store::AccountStore;
