//! Scripted market data sources for gateway and engine tests.
//!
//! `MockSource` replays a queue of scripted results, then falls back to a
//! fixed ticker payload. Every upstream call is counted so tests can assert
//! on cache hits and retries.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cryptodesk_models::market::{MarketSnapshot, Provenance};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::error::{GatewayError, SourceError};
use crate::gateway::Gateway;
use crate::rate_limit::TokenBucket;
use crate::retry::RetryPolicy;
use crate::sources::MarketDataSource;

pub struct MockSource {
    name: String,
    script: Mutex<VecDeque<Result<Value, SourceError>>>,
    fallback: Option<Value>,
    rankings: Option<Vec<String>>,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl MockSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            rankings: None,
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Answer every unscripted call with this price.
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.fallback = Some(ticker_payload(price, Decimal::new(1_000, 0)));
        self
    }

    /// Queue one scripted result, consumed before the fallback.
    pub fn then(self, result: Result<Value, SourceError>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
        self
    }

    /// Queue `n` copies of `err`.
    pub fn failing_times(mut self, n: usize, err: SourceError) -> Self {
        for _ in 0..n {
            self = self.then(Err(err.clone()));
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_rankings(mut self, symbols: &[&str]) -> Self {
        self.rankings = Some(symbols.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Number of `fetch_raw` calls so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Payload shape understood by `MockSource::normalize`.
pub fn ticker_payload(price: Decimal, volume: Decimal) -> Value {
    json!({
        "price": price.to_string(),
        "volume": volume.to_string(),
    })
}

#[async_trait]
impl MarketDataSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_raw(&self, symbol: &str) -> Result<Value, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match scripted {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| SourceError::InvalidSymbol(symbol.to_string())),
        }
    }

    fn normalize(
        &self,
        symbol: &str,
        payload: &Value,
        fetched_at: DateTime<Utc>,
    ) -> Result<MarketSnapshot, GatewayError> {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .and_then(|s| Decimal::from_str(s).ok())
                .ok_or_else(|| {
                    GatewayError::Unavailable(format!("{}: payload missing field {name}", self.name))
                })
        };
        let price = field("price")?;
        if price <= Decimal::ZERO {
            return Err(GatewayError::Unavailable(format!(
                "{}: non-positive price {price}",
                self.name
            )));
        }

        Ok(MarketSnapshot::new(
            symbol,
            fetched_at,
            price,
            field("volume")?,
            Provenance {
                source: self.name.clone(),
                fetched_at,
            },
        ))
    }

    async fn top_symbols(&self, limit: usize) -> Result<Vec<String>, SourceError> {
        match &self.rankings {
            Some(symbols) => Ok(symbols.iter().take(limit).cloned().collect()),
            None => Err(SourceError::Unsupported(format!(
                "{} does not provide rankings",
                self.name
            ))),
        }
    }
}

/// Retry policy with millisecond delays for tests.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter_factor: 0.0,
    }
}

/// A gateway over the given sources with a generous rate budget.
pub fn gateway_with(sources: Vec<Arc<MockSource>>, cache_ttl: Duration) -> Gateway {
    sources.into_iter().fold(
        Gateway::new(cache_ttl, 100, fast_retry(3), Duration::from_secs(1)),
        |gateway, source| gateway.with_source(source, TokenBucket::new(100, 100.0)),
    )
}

/// A snapshot with fixed volume, for tests that do not go through a gateway.
pub fn snapshot(symbol: &str, price: Decimal) -> MarketSnapshot {
    let now = Utc::now();
    MarketSnapshot::new(
        symbol,
        now,
        price,
        Decimal::new(1_000, 0),
        Provenance {
            source: "mock".to_string(),
            fetched_at: now,
        },
    )
}
