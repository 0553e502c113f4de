pub mod bybit;
pub mod coinranking;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cryptodesk_models::market::MarketSnapshot;
use serde_json::Value;

use crate::error::{GatewayError, SourceError};

pub use bybit::BybitTickerSource;
pub use coinranking::CoinRankingSource;

/// One upstream market data provider.
///
/// Sources only speak HTTP and JSON. Retry, rate limiting and caching are
/// applied around them by the `Gateway`.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Stable name used in provenance, logs and error messages.
    fn name(&self) -> &str;

    /// Fetch the raw provider payload for `symbol` (already normalized, e.g. "BTC").
    async fn fetch_raw(&self, symbol: &str) -> Result<Value, SourceError>;

    /// Map a payload returned by `fetch_raw` into a snapshot.
    fn normalize(
        &self,
        symbol: &str,
        payload: &Value,
        fetched_at: DateTime<Utc>,
    ) -> Result<MarketSnapshot, GatewayError>;

    /// Top symbols by market capitalization.
    async fn top_symbols(&self, _limit: usize) -> Result<Vec<String>, SourceError> {
        Err(SourceError::Unsupported(format!(
            "{} does not provide rankings",
            self.name()
        )))
    }
}

/// Read a non-2xx response into a `SourceError::Http`.
pub(crate) async fn http_error(response: reqwest::Response) -> SourceError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    SourceError::Http {
        status,
        body: truncate(&body, 256),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
