//! In-memory market cache
//!
//! Prices keyed by symbol, balances keyed by user id, and the Binance ban
//! window. Reads apply a TTL; writes are last-write-wins.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use log::debug;

use crate::types::account::AssetBalance;

pub const DEFAULT_PRICE_TTL: Duration = Duration::from_millis(30_000);
pub const DEFAULT_BALANCE_TTL: Duration = Duration::from_millis(60_000);

/// Cached value with the epoch millis it was observed at.
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    observed_at_ms: i64,
}

impl<T> CacheEntry<T> {
    fn new(data: T, now_ms: i64) -> Self {
        Self {
            data,
            observed_at_ms: now_ms,
        }
    }

    fn is_stale(&self, ttl: Duration, now_ms: i64) -> bool {
        now_ms - self.observed_at_ms > ttl.as_millis() as i64
    }
}

#[derive(Debug, Default)]
pub struct MarketCache {
    prices: DashMap<String, CacheEntry<f64>>,
    user_balances: DashMap<String, CacheEntry<Vec<AssetBalance>>>,
    binance_ban_until_ms: AtomicI64,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    // Prices

    pub fn set_cached_price(&self, symbol: &str, price: f64) {
        self.set_cached_price_at(symbol, price, now_ms());
    }

    pub fn set_cached_price_at(&self, symbol: &str, price: f64, now_ms: i64) {
        self.prices
            .insert(symbol.to_string(), CacheEntry::new(price, now_ms));
        debug!("price cache updated: {} = {}", symbol, price);
    }

    pub fn get_cached_price(&self, symbol: &str, ttl: Duration) -> Option<f64> {
        self.get_cached_price_at(symbol, ttl, now_ms())
    }

    pub fn get_cached_price_at(&self, symbol: &str, ttl: Duration, now_ms: i64) -> Option<f64> {
        let entry = self.prices.get(symbol)?;
        if entry.is_stale(ttl, now_ms) {
            return None;
        }
        Some(entry.data)
    }

    // Balances by user

    pub fn set_cached_user_balances(&self, user_id: &str, assets: Vec<AssetBalance>) {
        self.set_cached_user_balances_at(user_id, assets, now_ms());
    }

    pub fn set_cached_user_balances_at(&self, user_id: &str, assets: Vec<AssetBalance>, now_ms: i64) {
        self.user_balances
            .insert(user_id.to_string(), CacheEntry::new(assets, now_ms));
    }

    pub fn get_cached_user_balances(&self, user_id: &str, ttl: Duration) -> Option<Vec<AssetBalance>> {
        self.get_cached_user_balances_at(user_id, ttl, now_ms())
    }

    pub fn get_cached_user_balances_at(
        &self,
        user_id: &str,
        ttl: Duration,
        now_ms: i64,
    ) -> Option<Vec<AssetBalance>> {
        let entry = self.user_balances.get(user_id)?;
        if entry.is_stale(ttl, now_ms) {
            return None;
        }
        Some(entry.data.clone())
    }

    // Ban cooldown

    /// Raise the ban window. A smaller value than the current one is ignored.
    pub fn set_binance_ban_until(&self, epoch_ms: i64) {
        let previous = self
            .binance_ban_until_ms
            .fetch_max(epoch_ms, Ordering::SeqCst);
        if epoch_ms > previous {
            debug!("binance ban window raised to {}", epoch_ms);
        }
    }

    pub fn binance_ban_until(&self) -> i64 {
        self.binance_ban_until_ms.load(Ordering::SeqCst)
    }

    pub fn is_binance_banned_now(&self) -> bool {
        self.is_binance_banned_at(now_ms())
    }

    pub fn is_binance_banned_at(&self, now_ms: i64) -> bool {
        now_ms < self.binance_ban_until()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_price_is_returned() {
        let cache = MarketCache::new();
        cache.set_cached_price("BTCUSDT", 50000.0);
        assert_eq!(
            cache.get_cached_price("BTCUSDT", Duration::from_millis(30_000)),
            Some(50000.0)
        );
    }

    #[test]
    fn price_expires_after_ttl() {
        let cache = MarketCache::new();
        cache.set_cached_price_at("BTCUSDT", 50000.0, 1_000);
        let ttl = Duration::from_millis(30_000);
        assert_eq!(cache.get_cached_price_at("BTCUSDT", ttl, 31_000), Some(50000.0));
        assert_eq!(cache.get_cached_price_at("BTCUSDT", ttl, 31_001), None);
    }

    #[test]
    fn unknown_symbol_is_absent() {
        let cache = MarketCache::new();
        assert_eq!(cache.get_cached_price("ETHUSDT", DEFAULT_PRICE_TTL), None);
    }

    #[test]
    fn last_write_wins() {
        let cache = MarketCache::new();
        cache.set_cached_price_at("BTCUSDT", 1.0, 10);
        cache.set_cached_price_at("BTCUSDT", 2.0, 20);
        assert_eq!(cache.get_cached_price_at("BTCUSDT", DEFAULT_PRICE_TTL, 20), Some(2.0));
    }

    #[test]
    fn ban_window_never_decreases() {
        let cache = MarketCache::new();
        cache.set_binance_ban_until(5_000);
        cache.set_binance_ban_until(2_000);
        assert_eq!(cache.binance_ban_until(), 5_000);
        assert!(cache.is_binance_banned_at(4_999));
        assert!(!cache.is_binance_banned_at(5_000));

        cache.set_binance_ban_until(9_000);
        assert_eq!(cache.binance_ban_until(), 9_000);
    }

    #[test]
    fn no_ban_by_default() {
        let cache = MarketCache::new();
        assert!(!cache.is_binance_banned_now());
    }

    #[test]
    fn balances_follow_the_same_ttl_rule() {
        let cache = MarketCache::new();
        let assets = vec![AssetBalance {
            asset: "USDT".to_string(),
            balance: 12.5,
        }];
        cache.set_cached_user_balances_at("42", assets.clone(), 0);
        assert_eq!(
            cache.get_cached_user_balances_at("42", DEFAULT_BALANCE_TTL, 60_000),
            Some(assets)
        );
        assert_eq!(
            cache.get_cached_user_balances_at("42", DEFAULT_BALANCE_TTL, 60_001),
            None
        );
        assert_eq!(cache.get_cached_user_balances("7", DEFAULT_BALANCE_TTL), None);
    }
}
