use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::position::PositionSide;

/// Outcome of risk evaluation for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TradeDecision {
    Open {
        symbol: String,
        side: PositionSide,
        quantity: Decimal,
        price: Decimal,
    },
    /// Close the whole open position. `side` is the side of the position being closed.
    Close {
        symbol: String,
        side: PositionSide,
        quantity: Decimal,
        price: Decimal,
    },
    Hold {
        reason: String,
    },
    Reject {
        reason: RejectReason,
    },
}

impl TradeDecision {
    /// True for decisions that must be sent to the execution venue.
    pub fn is_trade(&self) -> bool {
        matches!(self, TradeDecision::Open { .. } | TradeDecision::Close { .. })
    }

    /// Order side needed to carry out this decision, if it is a trade.
    pub fn order_side(&self) -> Option<OrderSide> {
        match self {
            TradeDecision::Open { side, .. } => Some(side.opening_order()),
            TradeDecision::Close { side, .. } => Some(side.closing_order()),
            TradeDecision::Hold { .. } | TradeDecision::Reject { .. } => None,
        }
    }
}

/// Why a proposed action was refused by the risk manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    MaxOpenPositions { limit: usize },
    MaxPositionSize { requested: Decimal, limit: Decimal },
    MaxDrawdown { drawdown: Decimal, limit: Decimal },
    InvalidQuantity,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MaxOpenPositions { limit } => {
                write!(f, "max open positions reached ({limit})")
            }
            RejectReason::MaxPositionSize { requested, limit } => {
                write!(f, "size {requested} exceeds max position size {limit}")
            }
            RejectReason::MaxDrawdown { drawdown, limit } => {
                write!(f, "drawdown {drawdown} at or beyond limit {limit}")
            }
            RejectReason::InvalidQuantity => write!(f, "sized quantity is zero"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("Buy"),
            OrderSide::Sell => f.write_str("Sell"),
        }
    }
}

/// A single order sent to the execution venue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRequest {
    /// Idempotency key. Derived from the cycle id, so a retried submission
    /// reuses the same value.
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Reference price at decision time; simulated fills use it directly.
    pub price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

/// Confirmation that an order was filled by the venue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionReceipt {
    pub client_order_id: String,
    pub exchange_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub fill_price: Decimal,
    pub executed_at: DateTime<Utc>,
    /// Venue label (e.g., "paper", "bybit-demo").
    pub venue: String,
}
