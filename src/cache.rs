//! # cache
//!
//! Read side of the last-price cache.  The cache itself (Redis in
//! production) is owned by the price collector; this crate only reads
//! `"<symbol>_last"` once per open to seed the position.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CacheError;
use crate::models::Price;

/// Key under which the collector stores the latest quote of `symbol`.
pub fn cache_key(symbol: &str) -> String {
    format!("{symbol}_last")
}

#[async_trait]
pub trait LastPriceCache: Send + Sync {
    /// Raw value stored under `key`, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
}

/// Fetch and decode the last quote of `symbol`.
pub async fn last_price(cache: &dyn LastPriceCache, symbol: &str) -> Result<Price, CacheError> {
    let raw = cache
        .get(&cache_key(symbol))
        .await?
        .ok_or_else(|| CacheError::NotFound(symbol.to_string()))?;

    Ok(Price::from_json_bytes(&raw)?)
}

// ─── MemoryPriceCache ─────────────────────────────────────────────────────────

/// In-process cache, filled from the tick ingest route.
#[derive(Debug, Default)]
pub struct MemoryPriceCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryPriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `price` as the latest quote of its symbol.
    pub async fn store(&self, price: &Price) -> Result<(), CacheError> {
        let bytes = price.to_json_bytes()?;
        self.entries.write().await.insert(cache_key(&price.symbol), bytes);
        Ok(())
    }

    pub async fn put_raw(&self, key: impl Into<String>, value: Vec<u8>) {
        self.entries.write().await.insert(key.into(), value);
    }
}

#[async_trait]
impl LastPriceCache for MemoryPriceCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_then_read() {
        let cache = MemoryPriceCache::new();
        let price = Price {
            id:       "q9".into(),
            symbol:   "EURUSD3".into(),
            bid:      1.0,
            ask:      1.5,
            date:     chrono::DateTime::from_timestamp(1_650_000_000, 0).unwrap(),
            currency: "USD".into(),
        };
        cache.store(&price).await.unwrap();

        let got = last_price(&cache, "EURUSD3").await.unwrap();
        assert_eq!(got, price);
    }

    #[tokio::test]
    async fn test_missing_and_malformed() {
        let cache = MemoryPriceCache::new();
        assert!(matches!(last_price(&cache, "NOPE").await, Err(CacheError::NotFound(_))));

        cache.put_raw("BAD_last", b"{".to_vec()).await;
        assert!(matches!(last_price(&cache, "BAD").await, Err(CacheError::Decode(_))));
    }
}
