use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use cryptodesk_models::config::{GatewayConfig, SourceKind};
use cryptodesk_models::market::MarketSnapshot;
use tracing::{debug, info, warn};

use crate::cache::SnapshotCache;
use crate::error::{GatewayError, SourceError};
use crate::normalize::normalize_symbol;
use crate::rate_limit::TokenBucket;
use crate::retry::RetryPolicy;
use crate::sources::{BybitTickerSource, CoinRankingSource, MarketDataSource};

struct SourceSlot {
    source: Arc<dyn MarketDataSource>,
    bucket: TokenBucket,
}

/// Rate-limited, cached, retrying access to market data.
///
/// Shared across cycles as `Arc<Gateway>`. Sources are tried in order: a
/// source that is unavailable or out of rate budget falls through to the next
/// one, while an unknown symbol is final.
pub struct Gateway {
    sources: Vec<SourceSlot>,
    cache: SnapshotCache,
    retry: RetryPolicy,
    max_wait: Duration,
}

impl Gateway {
    pub fn new(cache_ttl: Duration, max_cache_entries: u64, retry: RetryPolicy, max_wait: Duration) -> Self {
        Self {
            sources: Vec::new(),
            cache: SnapshotCache::new(max_cache_entries, cache_ttl),
            retry,
            max_wait,
        }
    }

    /// Append a source with its own token bucket.
    pub fn with_source(mut self, source: Arc<dyn MarketDataSource>, bucket: TokenBucket) -> Self {
        self.sources.push(SourceSlot { source, bucket });
        self
    }

    /// Build the gateway and its HTTP sources from configuration.
    pub fn from_config(
        config: &GatewayConfig,
        coinranking_api_key: Option<String>,
    ) -> Result<Self, SourceError> {
        let mut gateway = Self::new(
            Duration::from_secs(config.cache_ttl_seconds),
            config.max_cache_entries,
            RetryPolicy::from(&config.retry),
            Duration::from_millis(config.rate_limit_wait_ms),
        );

        for source_config in &config.sources {
            let source: Arc<dyn MarketDataSource> = match source_config.kind {
                SourceKind::Bybit => Arc::new(BybitTickerSource::new(
                    source_config.base_url.clone(),
                    &source_config.quote_asset,
                    source_config.timeout_seconds,
                )?),
                SourceKind::CoinRanking => Arc::new(CoinRankingSource::new(
                    source_config.base_url.clone(),
                    coinranking_api_key.clone(),
                    source_config.timeout_seconds,
                )?),
            };
            let bucket = TokenBucket::new(source_config.capacity, source_config.refill_per_second);
            gateway = gateway.with_source(source, bucket);
        }

        info!(
            sources = ?gateway.source_names(),
            cache_ttl_seconds = config.cache_ttl_seconds,
            "Market data gateway configured"
        );
        Ok(gateway)
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|slot| slot.source.name()).collect()
    }

    /// Current snapshot for `symbol`, served from cache when fresh.
    pub async fn fetch(&self, symbol: &str) -> Result<MarketSnapshot, GatewayError> {
        let symbol = normalize_symbol(symbol)?;
        self.cache
            .get_or_load(&symbol, self.fetch_upstream(&symbol))
            .await
    }

    /// Top symbols by market cap from the first source that provides rankings.
    pub async fn top_symbols(&self, limit: usize) -> Result<Vec<String>, GatewayError> {
        let mut last_err = None;
        for slot in &self.sources {
            let name = slot.source.name();
            let result = self
                .retry
                .run(name, SourceError::is_transient, |_attempt| async move {
                    slot.bucket
                        .acquire(self.max_wait)
                        .await
                        .map_err(|_| SourceError::RateLimited)?;
                    slot.source.top_symbols(limit).await
                })
                .await;

            match result {
                Ok(symbols) => return Ok(symbols),
                Err(SourceError::Unsupported(_)) => continue,
                Err(e) => {
                    warn!(source = name, error = %e, "Rankings fetch failed");
                    last_err = Some(e.into_gateway(name));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            GatewayError::Unavailable("no configured source provides rankings".to_string())
        }))
    }

    async fn fetch_upstream(&self, symbol: &str) -> Result<MarketSnapshot, GatewayError> {
        let mut last_err = None;

        for slot in &self.sources {
            match self.fetch_from(slot, symbol).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(GatewayError::InvalidSymbol(s)) => return Err(GatewayError::InvalidSymbol(s)),
                Err(e) => {
                    warn!(
                        source = slot.source.name(),
                        symbol,
                        error = %e,
                        "Market data source failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            GatewayError::Unavailable("no market data sources configured".to_string())
        }))
    }

    async fn fetch_from(&self, slot: &SourceSlot, symbol: &str) -> Result<MarketSnapshot, GatewayError> {
        let name = slot.source.name();
        let start = Instant::now();

        let payload = self
            .retry
            .run(name, SourceError::is_transient, |attempt| async move {
                slot.bucket
                    .acquire(self.max_wait)
                    .await
                    .map_err(|_| SourceError::RateLimited)?;
                debug!(source = name, symbol, attempt, "Fetching market data");
                slot.source.fetch_raw(symbol).await
            })
            .await
            .map_err(|e| e.into_gateway(name))?;

        let snapshot = slot.source.normalize(symbol, &payload, Utc::now())?;
        debug!(
            source = name,
            symbol,
            price = %snapshot.price(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Market data fetched"
        );
        Ok(snapshot)
    }
}
