//! Binance market data
//!
//! Public book-ticker streams feeding the price cache.

pub mod parser;
pub mod websocket;

pub use parser::{is_valid_symbol, normalize_symbol, parse_ticker_message, stream_name_for_symbol};
pub use websocket::MarketFeed;

pub mod config {
    pub const COMBINED_STREAM_PATH: &str = "/stream?streams=";
    /// Used when nothing is subscribed, so the connection stays up.
    pub const HEARTBEAT_PATH: &str = "/ws/heartbeat";

    pub const BOOK_TICKER_STREAM_SUFFIX: &str = "@bookTicker";

    pub const SUBSCRIBE_METHOD: &str = "SUBSCRIBE";
    pub const UNSUBSCRIBE_METHOD: &str = "UNSUBSCRIBE";
}
