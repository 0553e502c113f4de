//! Mapping of provider payloads onto `MarketSnapshot`.
//!
//! Every required field must be present and parseable. A payload that cannot
//! be fully mapped is rejected with `GatewayError::Unavailable` rather than
//! producing a partially-populated snapshot.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use cryptodesk_models::market::{MarketSnapshot, Provenance};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::GatewayError;

/// Normalize a symbol as typed by a user or config file (`" btc "` → `"BTC"`).
pub fn normalize_symbol(symbol: &str) -> Result<String, GatewayError> {
    let trimmed = symbol.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(GatewayError::InvalidSymbol(symbol.to_string()));
    }
    Ok(trimmed.to_ascii_uppercase())
}

/// Map a Bybit v5 `/market/tickers` response envelope.
///
/// Expected shape: `{"retCode":0,"result":{"list":[{"symbol","lastPrice","bid1Price","ask1Price","volume24h"}]},"time":<ms>}`.
pub fn from_bybit_ticker(
    symbol: &str,
    payload: &Value,
    fetched_at: DateTime<Utc>,
) -> Result<MarketSnapshot, GatewayError> {
    let ticker = payload
        .pointer("/result/list/0")
        .ok_or_else(|| missing("bybit", "result.list[0]"))?;

    required_str(ticker, "symbol", "bybit")?;
    let price = positive_price(required_decimal(ticker, "lastPrice", "bybit")?, "bybit")?;
    let volume = non_negative(required_decimal(ticker, "volume24h", "bybit")?, "volume24h", "bybit")?;
    let bid = optional_decimal(ticker, "bid1Price");
    let ask = optional_decimal(ticker, "ask1Price");

    let timestamp = payload
        .get("time")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(fetched_at);

    Ok(MarketSnapshot::new(
        symbol,
        timestamp,
        price,
        volume,
        Provenance {
            source: "bybit".to_string(),
            fetched_at,
        },
    )
    .with_quote(bid, ask))
}

/// Map a CoinRanking v2 coin object (`data.coin` of `/coin/{uuid}`).
///
/// Expected shape: `{"symbol","price","24hVolume","priceAt"}` with prices as strings.
pub fn from_coinranking_coin(
    symbol: &str,
    coin: &Value,
    fetched_at: DateTime<Utc>,
) -> Result<MarketSnapshot, GatewayError> {
    let reported = required_str(coin, "symbol", "coinranking")?;
    if !reported.eq_ignore_ascii_case(symbol) {
        return Err(GatewayError::Unavailable(format!(
            "coinranking: payload is for {reported}, expected {symbol}"
        )));
    }

    let price = positive_price(required_decimal(coin, "price", "coinranking")?, "coinranking")?;
    let volume = non_negative(
        required_decimal(coin, "24hVolume", "coinranking")?,
        "24hVolume",
        "coinranking",
    )?;

    let timestamp = coin
        .get("priceAt")
        .and_then(Value::as_i64)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or(fetched_at);

    Ok(MarketSnapshot::new(
        symbol,
        timestamp,
        price,
        volume,
        Provenance {
            source: "coinranking".to_string(),
            fetched_at,
        },
    ))
}

fn missing(source: &str, field: &str) -> GatewayError {
    GatewayError::Unavailable(format!("{source}: payload missing field {field}"))
}

fn required_str<'a>(obj: &'a Value, field: &str, source: &str) -> Result<&'a str, GatewayError> {
    obj.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing(source, field))
}

fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) if !s.is_empty() => Decimal::from_str(s)
            .or_else(|_| Decimal::from_scientific(s))
            .ok(),
        Value::Number(n) => n
            .as_f64()
            .and_then(|f| Decimal::from_str(&f.to_string()).ok()),
        _ => None,
    }
}

fn required_decimal(obj: &Value, field: &str, source: &str) -> Result<Decimal, GatewayError> {
    let value = obj.get(field).ok_or_else(|| missing(source, field))?;
    parse_decimal(value).ok_or_else(|| {
        GatewayError::Unavailable(format!("{source}: field {field} is not a number: {value}"))
    })
}

fn optional_decimal(obj: &Value, field: &str) -> Option<Decimal> {
    obj.get(field)
        .and_then(parse_decimal)
        .filter(|d| *d > Decimal::ZERO)
}

fn positive_price(price: Decimal, source: &str) -> Result<Decimal, GatewayError> {
    if price <= Decimal::ZERO {
        return Err(GatewayError::Unavailable(format!(
            "{source}: non-positive price {price}"
        )));
    }
    Ok(price)
}

fn non_negative(value: Decimal, field: &str, source: &str) -> Result<Decimal, GatewayError> {
    if value < Decimal::ZERO {
        return Err(GatewayError::Unavailable(format!(
            "{source}: negative {field} {value}"
        )));
    }
    Ok(value)
}
