use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cryptodesk_models::market::MarketSnapshot;
use moka::future::Cache;

use crate::error::GatewayError;

#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: MarketSnapshot,
    expires_at: DateTime<Utc>,
}

/// Freshness cache for market snapshots, keyed by symbol and backed by moka.
///
/// Entries expire after the TTL. Concurrent misses for the same symbol share a
/// single upstream load; different symbols never block each other. Failed
/// loads are not cached.
pub struct SnapshotCache {
    inner: Cache<String, CacheEntry>,
    ttl: Duration,
}

impl SnapshotCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            ttl,
        }
    }

    /// Cached snapshot for `symbol`, if still fresh.
    pub async fn get(&self, symbol: &str) -> Option<MarketSnapshot> {
        let entry = self.inner.get(symbol).await?;
        if entry.expires_at <= Utc::now() {
            self.inner.invalidate(symbol).await;
            return None;
        }
        Some(entry.snapshot)
    }

    /// Return the cached snapshot or run `load` to produce one.
    pub async fn get_or_load<F>(&self, symbol: &str, load: F) -> Result<MarketSnapshot, GatewayError>
    where
        F: Future<Output = Result<MarketSnapshot, GatewayError>>,
    {
        if let Some(snapshot) = self.get(symbol).await {
            return Ok(snapshot);
        }

        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());
        let entry = self
            .inner
            .try_get_with(symbol.to_string(), async move {
                let snapshot = load.await?;
                Ok::<_, GatewayError>(CacheEntry {
                    snapshot,
                    expires_at: Utc::now() + ttl,
                })
            })
            .await
            .map_err(|e: Arc<GatewayError>| (*e).clone())?;

        Ok(entry.snapshot)
    }

    pub async fn invalidate(&self, symbol: &str) {
        self.inner.invalidate(symbol).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptodesk_models::market::Provenance;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn snapshot(symbol: &str) -> MarketSnapshot {
        MarketSnapshot::new(
            symbol,
            Utc::now(),
            dec!(100),
            dec!(5000),
            Provenance {
                source: "test".to_string(),
                fetched_at: Utc::now(),
            },
        )
    }

    #[tokio::test]
    async fn load_then_hit() {
        let cache = SnapshotCache::new(100, Duration::from_secs(60));
        let loads = AtomicU32::new(0);

        for _ in 0..3 {
            let result = cache
                .get_or_load("BTC", async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(snapshot("BTC"))
                })
                .await
                .unwrap();
            assert_eq!(result.symbol(), "BTC");
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_missing() {
        let cache = SnapshotCache::new(100, Duration::from_secs(60));
        assert!(cache.get("ETH").await.is_none());
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = SnapshotCache::new(100, Duration::from_secs(60));

        let err = cache
            .get_or_load("BTC", async {
                Err(GatewayError::Unavailable("upstream down".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Unavailable("upstream down".to_string()));

        let ok = cache
            .get_or_load("BTC", async { Ok(snapshot("BTC")) })
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn invalidate() {
        let cache = SnapshotCache::new(100, Duration::from_secs(60));
        cache
            .get_or_load("BTC", async { Ok(snapshot("BTC")) })
            .await
            .unwrap();
        cache.invalidate("BTC").await;
        assert!(cache.get("BTC").await.is_none());
    }

    #[tokio::test]
    async fn ttl_expiration() {
        let cache = SnapshotCache::new(100, Duration::from_millis(50));
        cache
            .get_or_load("BTC", async { Ok(snapshot("BTC")) })
            .await
            .unwrap();

        // Should exist immediately
        assert!(cache.get("BTC").await.is_some());

        // Wait for TTL
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Should be expired
        assert!(cache.get("BTC").await.is_none());
    }
}
