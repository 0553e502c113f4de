use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cryptodesk_models::market::MarketSnapshot;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{http_error, MarketDataSource};
use crate::error::{GatewayError, SourceError};
use crate::normalize::from_bybit_ticker;

pub const DEFAULT_BASE_URL: &str = "https://api.bybit.com";

/// Bybit v5 spot tickers. Public endpoint, no credentials needed.
pub struct BybitTickerSource {
    client: Client,
    base_url: String,
    quote_asset: String,
    timeout_secs: u64,
}

impl BybitTickerSource {
    pub fn new(
        base_url: Option<String>,
        quote_asset: &str,
        timeout_secs: u64,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            quote_asset: quote_asset.to_ascii_uppercase(),
            timeout_secs,
        })
    }

    fn pair(&self, symbol: &str) -> String {
        format!("{symbol}{}", self.quote_asset)
    }
}

/// Map a Bybit `retCode` envelope onto a source error. HTTP status is 200 even
/// for most failures, so the envelope is authoritative.
pub(crate) fn check_ret_code(body: &Value, symbol: &str) -> Result<(), SourceError> {
    let code = body
        .get("retCode")
        .and_then(Value::as_i64)
        .ok_or_else(|| SourceError::Payload("missing retCode".to_string()))?;
    if code == 0 {
        return Ok(());
    }

    let message = body
        .get("retMsg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Err(match code {
        10001 if message.to_ascii_lowercase().contains("symbol") => {
            SourceError::InvalidSymbol(symbol.to_string())
        }
        10006 | 10018 => SourceError::Http {
            status: 429,
            body: message,
        },
        10000 | 10016 => SourceError::Http {
            status: 503,
            body: message,
        },
        10003..=10005 | 10007 | 10010 => SourceError::Auth(message),
        _ => SourceError::Payload(format!("retCode {code}: {message}")),
    })
}

#[async_trait]
impl MarketDataSource for BybitTickerSource {
    fn name(&self) -> &str {
        "bybit"
    }

    async fn fetch_raw(&self, symbol: &str) -> Result<Value, SourceError> {
        let url = format!("{}/v5/market/tickers", self.base_url);
        let pair = self.pair(symbol);
        debug!(url = %url, pair = %pair, "Bybit ticker request");

        let response = self
            .client
            .get(&url)
            .query(&[("category", "spot"), ("symbol", pair.as_str())])
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(e, self.timeout_secs))?;

        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::from_reqwest(e, self.timeout_secs))?;

        check_ret_code(&body, symbol)?;

        let listed = body
            .pointer("/result/list")
            .and_then(Value::as_array)
            .is_some_and(|list| !list.is_empty());
        if !listed {
            return Err(SourceError::InvalidSymbol(symbol.to_string()));
        }

        Ok(body)
    }

    fn normalize(
        &self,
        symbol: &str,
        payload: &Value,
        fetched_at: DateTime<Utc>,
    ) -> Result<MarketSnapshot, GatewayError> {
        from_bybit_ticker(symbol, payload, fetched_at)
    }
}
