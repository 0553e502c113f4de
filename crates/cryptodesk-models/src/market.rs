use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where a snapshot came from and when it was fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provenance {
    /// Name of the upstream source (e.g., "coinranking", "bybit").
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

/// Normalized market state for one symbol at one point in time.
///
/// Built by the gateway from a provider payload and shared read-only with
/// every downstream component. There are no mutating methods; downstream code
/// clones the value when it needs ownership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    symbol: String,
    timestamp: DateTime<Utc>,
    price: Decimal,
    volume: Decimal,
    bid: Option<Decimal>,
    ask: Option<Decimal>,
    provenance: Provenance,
}

impl MarketSnapshot {
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        price: Decimal,
        volume: Decimal,
        provenance: Provenance,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            price,
            volume,
            bid: None,
            ask: None,
            provenance,
        }
    }

    /// Attach top-of-book prices. Only used while constructing a snapshot.
    pub fn with_quote(mut self, bid: Option<Decimal>, ask: Option<Decimal>) -> Self {
        self.bid = bid;
        self.ask = ask;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    /// 24h traded volume as reported by the source.
    pub fn volume(&self) -> Decimal {
        self.volume
    }

    pub fn bid(&self) -> Option<Decimal> {
        self.bid
    }

    pub fn ask(&self) -> Option<Decimal> {
        self.ask
    }

    /// Ask minus bid, when the source reports both sides.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }
}
