use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cryptodesk_models::market::MarketSnapshot;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::{http_error, MarketDataSource};
use crate::error::{GatewayError, SourceError};
use crate::normalize::from_coinranking_coin;

pub const DEFAULT_BASE_URL: &str = "https://api.coinranking.com/v2";

/// CoinRanking REST v2.
///
/// Coins are addressed by uuid, so the first fetch of a symbol resolves it via
/// `/coins?symbols[]=` and remembers the uuid for later fetches.
pub struct CoinRankingSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout_secs: u64,
    uuids: Mutex<HashMap<String, String>>,
}

impl CoinRankingSource {
    pub fn new(
        base_url: Option<String>,
        api_key: Option<String>,
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
            api_key,
            timeout_secs,
            uuids: Mutex::new(HashMap::new()),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "CoinRanking request");

        let mut request = self.client.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.header("x-access-token", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(e, self.timeout_secs))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SourceError::Auth(http_error(response).await.to_string()));
            }
            _ => return Err(http_error(response).await),
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::from_reqwest(e, self.timeout_secs))?;

        if body.get("status").and_then(Value::as_str) == Some("fail") {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(SourceError::Payload(message.to_string()));
        }
        Ok(body)
    }

    fn cached_uuid(&self, symbol: &str) -> Option<String> {
        self.uuids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(symbol)
            .cloned()
    }

    fn remember_uuid(&self, symbol: &str, uuid: &str) {
        self.uuids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(symbol.to_string(), uuid.to_string());
    }

    fn forget_uuid(&self, symbol: &str) {
        self.uuids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(symbol);
    }

    async fn resolve_uuid(&self, symbol: &str) -> Result<String, SourceError> {
        if let Some(uuid) = self.cached_uuid(symbol) {
            return Ok(uuid);
        }

        let body = self
            .get("/coins", &[("symbols[]", symbol.to_string())])
            .await?;
        let uuid = uuid_for_symbol(&body, symbol)?;
        self.remember_uuid(symbol, &uuid);
        Ok(uuid)
    }
}

/// Pick the uuid of `symbol` out of a `/coins` listing. Listings are ordered by
/// market cap, so the first match is the canonical coin for a shared ticker.
fn uuid_for_symbol(body: &Value, symbol: &str) -> Result<String, SourceError> {
    let coins = body
        .pointer("/data/coins")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Payload("missing data.coins".to_string()))?;

    coins
        .iter()
        .find(|coin| {
            coin.get("symbol")
                .and_then(Value::as_str)
                .is_some_and(|s| s.eq_ignore_ascii_case(symbol))
        })
        .and_then(|coin| coin.get("uuid").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| SourceError::InvalidSymbol(symbol.to_string()))
}

fn ranked_symbols(body: &Value) -> Result<Vec<String>, SourceError> {
    let coins = body
        .pointer("/data/coins")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Payload("missing data.coins".to_string()))?;

    Ok(coins
        .iter()
        .filter_map(|coin| coin.get("symbol").and_then(Value::as_str))
        .map(str::to_ascii_uppercase)
        .collect())
}

#[async_trait]
impl MarketDataSource for CoinRankingSource {
    fn name(&self) -> &str {
        "coinranking"
    }

    async fn fetch_raw(&self, symbol: &str) -> Result<Value, SourceError> {
        let uuid = self.resolve_uuid(symbol).await?;

        let body = match self.get(&format!("/coin/{uuid}"), &[]).await {
            Err(SourceError::Http { status: 404, .. }) => {
                self.forget_uuid(symbol);
                return Err(SourceError::InvalidSymbol(symbol.to_string()));
            }
            other => other?,
        };

        body.pointer("/data/coin")
            .cloned()
            .ok_or_else(|| SourceError::Payload("missing data.coin".to_string()))
    }

    fn normalize(
        &self,
        symbol: &str,
        payload: &Value,
        fetched_at: DateTime<Utc>,
    ) -> Result<MarketSnapshot, GatewayError> {
        from_coinranking_coin(symbol, payload, fetched_at)
    }

    async fn top_symbols(&self, limit: usize) -> Result<Vec<String>, SourceError> {
        let body = self.get("/coins", &[("limit", limit.to_string())]).await?;

        // Listing responses carry uuids, so warm the lookup table while here.
        if let Some(coins) = body.pointer("/data/coins").and_then(Value::as_array) {
            for coin in coins {
                if let (Some(symbol), Some(uuid)) = (
                    coin.get("symbol").and_then(Value::as_str),
                    coin.get("uuid").and_then(Value::as_str),
                ) {
                    let symbol = symbol.to_ascii_uppercase();
                    if self.cached_uuid(&symbol).is_none() {
                        self.remember_uuid(&symbol, uuid);
                    }
                }
            }
        }

        ranked_symbols(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing() -> Value {
        json!({
            "status": "success",
            "data": {
                "coins": [
                    {"uuid": "Qwsogvtv82FCd", "symbol": "BTC", "name": "Bitcoin"},
                    {"uuid": "razxDUgYGNAdQ", "symbol": "ETH", "name": "Ethereum"},
                    {"uuid": "HIVsRcGKkPFtW", "symbol": "usdt", "name": "Tether USD"}
                ]
            }
        })
    }

    #[test]
    fn resolves_uuid_case_insensitively() {
        assert_eq!(uuid_for_symbol(&listing(), "ETH").unwrap(), "razxDUgYGNAdQ");
        assert_eq!(uuid_for_symbol(&listing(), "USDT").unwrap(), "HIVsRcGKkPFtW");
    }

    #[test]
    fn unknown_symbol_is_invalid() {
        assert_eq!(
            uuid_for_symbol(&listing(), "NOPE").unwrap_err(),
            SourceError::InvalidSymbol("NOPE".to_string())
        );
    }

    #[test]
    fn listing_without_coins_is_payload_error() {
        let body = json!({"status": "success", "data": {}});
        assert!(matches!(
            uuid_for_symbol(&body, "BTC"),
            Err(SourceError::Payload(_))
        ));
    }

    #[test]
    fn ranked_symbols_preserve_order() {
        assert_eq!(ranked_symbols(&listing()).unwrap(), vec!["BTC", "ETH", "USDT"]);
    }

    #[test]
    fn uuid_cache() {
        let source = CoinRankingSource::new(None, None, 5).unwrap();
        assert_eq!(source.base_url, DEFAULT_BASE_URL);
        assert!(source.cached_uuid("BTC").is_none());

        source.remember_uuid("BTC", "Qwsogvtv82FCd");
        assert_eq!(source.cached_uuid("BTC").as_deref(), Some("Qwsogvtv82FCd"));

        source.forget_uuid("BTC");
        assert!(source.cached_uuid("BTC").is_none());
    }
}
