//! Order submission to the Bybit v5 demo (testnet) venue.
//!
//! Requests are signed with HMAC-SHA256 over
//! `timestamp + api_key + recv_window + payload`, where the payload is the raw
//! JSON body for POST and the query string for GET.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cryptodesk_models::config::ExecutionConfig;
use cryptodesk_models::trade_decision::{ExecutionReceipt, OrderRequest};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::execution::{ExecutionError, TradeExecutor};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_BASE_URL: &str = "https://api-testnet.bybit.com";

/// retCodes Bybit returns when an orderLinkId was already used.
const DUPLICATE_LINK_ID: [i64; 2] = [110072, 170141];

pub struct BybitDemoExecutor {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    quote_asset: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrder<'a> {
    category: &'static str,
    symbol: String,
    side: String,
    order_type: &'static str,
    qty: String,
    market_unit: &'static str,
    order_link_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    take_profit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_loss: Option<String>,
}

impl BybitDemoExecutor {
    pub fn new(
        base_url: Option<String>,
        api_key: String,
        api_secret: String,
        recv_window_ms: u64,
        quote_asset: &str,
        timeout_secs: u64,
    ) -> Result<Self, ExecutionError> {
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(ExecutionError::Auth("API key and secret are required".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExecutionError::Transient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            api_secret,
            recv_window_ms,
            quote_asset: quote_asset.to_ascii_uppercase(),
        })
    }

    pub fn from_config(
        config: &ExecutionConfig,
        api_key: String,
        api_secret: String,
    ) -> Result<Self, ExecutionError> {
        Self::new(
            config.base_url.clone(),
            api_key,
            api_secret,
            config.recv_window_ms,
            &config.quote_asset,
            config.timeout_seconds,
        )
    }

    fn pair(&self, symbol: &str) -> String {
        format!("{symbol}{}", self.quote_asset)
    }

    fn signed(&self, request: RequestBuilder, payload: &str) -> Result<RequestBuilder, ExecutionError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let recv_window = self.recv_window_ms.to_string();
        let signature = sign(&self.api_secret, &timestamp, &self.api_key, &recv_window, payload)?;
        Ok(request
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp)
            .header("X-BAPI-RECV-WINDOW", recv_window)
            .header("X-BAPI-SIGN", signature))
    }

    async fn create(&self, order: &OrderRequest) -> Result<Value, ExecutionError> {
        let body = serde_json::to_string(&create_body(order, &self.pair(&order.symbol)))
            .map_err(|e| ExecutionError::Rejected(e.to_string()))?;
        let url = format!("{}/v5/order/create", self.base_url);
        debug!(url = %url, client_order_id = %order.client_order_id, "Bybit order request");

        let request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone());
        let response = self
            .signed(request, &body)?
            .send()
            .await
            .map_err(transport_error)?;
        read_envelope(response).await
    }

    /// Look up an order previously placed under `client_order_id`.
    async fn find(&self, client_order_id: &str) -> Result<Value, ExecutionError> {
        let query = format!("category=spot&orderLinkId={client_order_id}");
        let url = format!("{}/v5/order/realtime?{query}", self.base_url);
        let response = self
            .signed(self.client.get(&url), &query)?
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_envelope(response).await?;
        body.pointer("/result/list/0")
            .cloned()
            .ok_or_else(|| {
                ExecutionError::Transient(format!(
                    "order {client_order_id} reported as duplicate but not found"
                ))
            })
    }

    fn receipt(&self, order: &OrderRequest, exchange_order_id: String, fill_price: Decimal) -> ExecutionReceipt {
        ExecutionReceipt {
            client_order_id: order.client_order_id.clone(),
            exchange_order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            fill_price,
            executed_at: Utc::now(),
            venue: self.venue().to_string(),
        }
    }
}

#[async_trait]
impl TradeExecutor for BybitDemoExecutor {
    fn venue(&self) -> &str {
        "bybit-demo"
    }

    async fn submit(&self, order: &OrderRequest) -> Result<ExecutionReceipt, ExecutionError> {
        match self.create(order).await {
            Ok(body) => {
                let order_id = string_at(&body, "/result/orderId")?;
                info!(
                    client_order_id = %order.client_order_id,
                    exchange_order_id = %order_id,
                    symbol = %order.symbol,
                    side = %order.side,
                    quantity = %order.quantity,
                    "Bybit order accepted"
                );
                // Market orders are not reported filled synchronously; record
                // the reference price.
                Ok(self.receipt(order, order_id, order.price))
            }
            Err(ExecutionError::Rejected(message)) if is_duplicate(&message) => {
                warn!(
                    client_order_id = %order.client_order_id,
                    "Order link id already used, resolving the original order"
                );
                let existing = self.find(&order.client_order_id).await?;
                let order_id = string_at(&existing, "/orderId")?;
                let fill_price = existing
                    .get("avgPrice")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<Decimal>().ok())
                    .filter(|p| *p > Decimal::ZERO)
                    .unwrap_or(order.price);
                Ok(self.receipt(order, order_id, fill_price))
            }
            Err(e) => Err(e),
        }
    }
}

/// Hex HMAC-SHA256 signature for a v5 request.
pub fn sign(
    secret: &str,
    timestamp: &str,
    api_key: &str,
    recv_window: &str,
    payload: &str,
) -> Result<String, ExecutionError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExecutionError::Auth(format!("HMAC error: {e}")))?;
    mac.update(timestamp.as_bytes());
    mac.update(api_key.as_bytes());
    mac.update(recv_window.as_bytes());
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn create_body<'a>(order: &'a OrderRequest, pair: &str) -> CreateOrder<'a> {
    CreateOrder {
        category: "spot",
        symbol: pair.to_string(),
        side: order.side.to_string(),
        order_type: "Market",
        qty: order.quantity.normalize().to_string(),
        market_unit: "baseCoin",
        order_link_id: &order.client_order_id,
        take_profit: order.take_profit.map(|p| p.normalize().to_string()),
        stop_loss: order.stop_loss.map(|p| p.normalize().to_string()),
    }
}

async fn read_envelope(response: Response) -> Result<Value, ExecutionError> {
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, body));
    }
    let body: Value = response
        .json()
        .await
        .map_err(|e| ExecutionError::Transient(format!("unreadable response: {e}")))?;
    check_ret_code(&body)?;
    Ok(body)
}

fn classify_status(status: u16, body: String) -> ExecutionError {
    let message = format!("HTTP {status}: {body}");
    match status {
        401 | 403 => ExecutionError::Auth(message),
        408 | 429 | 500..=599 => ExecutionError::Transient(message),
        _ => ExecutionError::Rejected(message),
    }
}

/// Map the response envelope's `retCode` onto an execution error.
fn check_ret_code(body: &Value) -> Result<(), ExecutionError> {
    let code = body
        .get("retCode")
        .and_then(Value::as_i64)
        .ok_or_else(|| ExecutionError::Transient("missing retCode".to_string()))?;
    if code == 0 {
        return Ok(());
    }
    let message = body
        .get("retMsg")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Err(match code {
        10000 | 10002 | 10006 | 10016 | 10018 => {
            ExecutionError::Transient(format!("retCode {code}: {message}"))
        }
        10003..=10005 | 10007 | 10010 | 33004 => {
            ExecutionError::Auth(format!("retCode {code}: {message}"))
        }
        _ => ExecutionError::Rejected(format!("retCode {code}: {message}")),
    })
}

fn is_duplicate(message: &str) -> bool {
    DUPLICATE_LINK_ID
        .iter()
        .any(|code| message.starts_with(&format!("retCode {code}:")))
        || message.to_ascii_lowercase().contains("duplicate")
}

fn string_at(body: &Value, pointer: &str) -> Result<String, ExecutionError> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ExecutionError::Transient(format!("response missing {pointer}")))
}

fn transport_error(err: reqwest::Error) -> ExecutionError {
    ExecutionError::Transient(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptodesk_models::trade_decision::OrderSide;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn order() -> OrderRequest {
        OrderRequest {
            client_order_id: "abc-0".to_string(),
            symbol: "BTC".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(0.70),
            price: dec!(50000),
            stop_loss: Some(dec!(47500.00)),
            take_profit: None,
        }
    }

    #[test]
    fn signature_matches_reference_vector() {
        let sig = sign(
            "test-secret",
            "1700000000000",
            "test-key",
            "5000",
            r#"{"category":"spot"}"#,
        )
        .unwrap();
        assert_eq!(
            sig,
            "84578fd0b14f4e409125fac953a222d01b9795fe709769c4e225a9728c49ba8a"
        );

        let query_sig = sign(
            "test-secret",
            "1700000000000",
            "test-key",
            "5000",
            "category=spot&orderLinkId=abc-0",
        )
        .unwrap();
        assert_eq!(
            query_sig,
            "b8c27c92adabcefce3c61d3531d588934c7da1ab69ef85cb3db6b761cf981eff"
        );
    }

    #[test]
    fn order_body_shape() {
        let order = order();
        let body = serde_json::to_value(create_body(&order, "BTCUSDT")).unwrap();
        assert_eq!(
            body,
            json!({
                "category": "spot",
                "symbol": "BTCUSDT",
                "side": "Buy",
                "orderType": "Market",
                "qty": "0.7",
                "marketUnit": "baseCoin",
                "orderLinkId": "abc-0",
                "stopLoss": "47500",
            })
        );
    }

    #[test]
    fn ret_codes_map_to_error_kinds() {
        assert!(check_ret_code(&json!({"retCode": 0, "retMsg": "OK"})).is_ok());
        assert!(matches!(
            check_ret_code(&json!({"retCode": 10006, "retMsg": "Too many visits"})),
            Err(ExecutionError::Transient(_))
        ));
        assert!(matches!(
            check_ret_code(&json!({"retCode": 10003, "retMsg": "API key is invalid"})),
            Err(ExecutionError::Auth(_))
        ));
        assert!(matches!(
            check_ret_code(&json!({"retCode": 170131, "retMsg": "Insufficient balance"})),
            Err(ExecutionError::Rejected(_))
        ));
        assert!(matches!(
            check_ret_code(&json!({"result": {}})),
            Err(ExecutionError::Transient(_))
        ));
    }

    #[test]
    fn duplicate_detection() {
        assert!(is_duplicate("retCode 170141: Duplicate clientOrderId"));
        assert!(is_duplicate("retCode 110072: OrderLinkedID is duplicate"));
        assert!(!is_duplicate("retCode 170131: Insufficient balance"));
    }

    #[test]
    fn http_status_classification() {
        assert!(matches!(classify_status(503, String::new()), ExecutionError::Transient(_)));
        assert!(matches!(classify_status(401, String::new()), ExecutionError::Auth(_)));
        assert!(matches!(classify_status(400, String::new()), ExecutionError::Rejected(_)));
    }

    #[test]
    fn credentials_are_required() {
        assert!(matches!(
            BybitDemoExecutor::new(None, String::new(), "s".into(), 5000, "USDT", 10),
            Err(ExecutionError::Auth(_))
        ));
        let executor =
            BybitDemoExecutor::new(None, "k".into(), "s".into(), 5000, "usdt", 10).unwrap();
        assert_eq!(executor.pair("ETH"), "ETHUSDT");
        assert_eq!(executor.base_url, DEFAULT_BASE_URL);
    }
}
