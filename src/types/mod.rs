//! Shared data types

pub mod account;
pub mod config;
pub mod market_data;

pub use account::{AssetBalance, UserAccountRecord};
pub use config::ConnectionStatus;
pub use market_data::PriceTick;
