use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::analysis::Verdict;
use crate::trade_decision::OrderSide;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// The side a directional verdict asks for. Neutral and abstain have none.
    pub fn from_verdict(verdict: Verdict) -> Option<Self> {
        match verdict {
            Verdict::Bullish => Some(PositionSide::Long),
            Verdict::Bearish => Some(PositionSide::Short),
            Verdict::Neutral | Verdict::Abstain => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    /// Order side that opens a position on this side.
    pub fn opening_order(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position on this side.
    pub fn closing_order(&self) -> OrderSide {
        self.opening_order().opposite()
    }
}

/// An open simulated position. A symbol with no Position is flat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    /// Always positive; direction lives in `side`.
    pub quantity: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Unrealized P&L at the given mark price. Derived, never stored.
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => (mark - self.entry_price) * self.quantity,
            PositionSide::Short => (self.entry_price - mark) * self.quantity,
        }
    }

    pub fn notional(&self, mark: Decimal) -> Decimal {
        mark * self.quantity
    }
}

/// Risk limits applied before any simulated order is placed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskLimits {
    /// Maximum quantity held per symbol. A confidence of 1.0 sizes to exactly this.
    pub max_position_size: Decimal,
    /// Maximum number of symbols with an open position at once.
    pub max_open_positions: usize,
    /// Fraction of peak equity (e.g., 0.20 = 20%) beyond which new positions are refused.
    pub max_drawdown: Decimal,
    /// Paper account equity used as the drawdown baseline.
    pub starting_equity: Decimal,
    /// Recommendations below this confidence hold instead of trading.
    pub min_confidence: Decimal,
    /// Optional protective stop, as a fraction of entry price.
    pub stop_loss_pct: Option<Decimal>,
    /// Optional profit target, as a fraction of entry price.
    pub take_profit_pct: Option<Decimal>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::ONE,
            max_open_positions: 3,
            max_drawdown: Decimal::new(20, 2),
            starting_equity: Decimal::new(100_000, 0),
            min_confidence: Decimal::new(50, 2),
            stop_loss_pct: None,
            take_profit_pct: None,
        }
    }
}
