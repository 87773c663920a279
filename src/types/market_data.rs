//! Market data types

use serde::{Deserialize, Serialize};

/// A price extracted from one ticker frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Uppercase trading symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    pub price: f64,
}
