//! Upstream connectors

pub mod traits;

pub use traits::*;

pub mod binance;
pub mod three_commas;
