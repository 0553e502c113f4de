use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use cryptodesk_models::analysis::AggregatedRecommendation;
use cryptodesk_models::position::{Position, PositionSide, RiskLimits};
use cryptodesk_models::trade_decision::{ExecutionReceipt, RejectReason, TradeDecision};
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;
use tracing::{debug, info};

/// Decimal places kept when sizing an order.
const QUANTITY_SCALE: u32 = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Position already open for {0}")]
    AlreadyOpen(String),

    #[error("No open position for {0}")]
    NotOpen(String),

    #[error("Decision is not a trade")]
    NotATrade,
}

/// Portfolio state the risk rules read, excluding the symbol under evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerView {
    /// Open positions on other symbols.
    pub open_positions: usize,
    /// Opens reserved by in-flight cycles on other symbols.
    pub pending_opens: usize,
    pub equity: Decimal,
    pub peak_equity: Decimal,
}

impl LedgerView {
    /// Fractional decline of equity from its peak; zero at or above the peak.
    pub fn drawdown(&self) -> Decimal {
        if self.peak_equity <= Decimal::ZERO || self.equity >= self.peak_equity {
            return Decimal::ZERO;
        }
        (self.peak_equity - self.equity) / self.peak_equity
    }
}

/// Turn a recommendation into trade decisions for one symbol.
///
/// Pure: the same inputs always yield the same decisions. `position` is the
/// current position on the recommendation's symbol, if any, and `mark` is the
/// snapshot price used as the order reference.
pub fn evaluate(
    rec: &AggregatedRecommendation,
    position: Option<&Position>,
    view: &LedgerView,
    limits: &RiskLimits,
    mark: Decimal,
) -> Vec<TradeDecision> {
    let Some(desired) = PositionSide::from_verdict(rec.verdict) else {
        return vec![TradeDecision::Hold {
            reason: format!("{} recommendation", rec.verdict),
        }];
    };

    if rec.confidence < limits.min_confidence {
        return vec![TradeDecision::Hold {
            reason: format!(
                "confidence {} below minimum {}",
                rec.confidence, limits.min_confidence
            ),
        }];
    }

    match position {
        Some(p) if p.side == desired => vec![TradeDecision::Hold {
            reason: format!("already {} {}", side_label(p.side), p.symbol),
        }],
        Some(p) => vec![
            TradeDecision::Close {
                symbol: p.symbol.clone(),
                side: p.side,
                quantity: p.quantity,
                price: mark,
            },
            open_or_reject(rec, desired, view, limits, mark),
        ],
        None => vec![open_or_reject(rec, desired, view, limits, mark)],
    }
}

fn open_or_reject(
    rec: &AggregatedRecommendation,
    side: PositionSide,
    view: &LedgerView,
    limits: &RiskLimits,
    mark: Decimal,
) -> TradeDecision {
    let drawdown = view.drawdown();
    if drawdown >= limits.max_drawdown {
        return TradeDecision::Reject {
            reason: RejectReason::MaxDrawdown {
                drawdown,
                limit: limits.max_drawdown,
            },
        };
    }

    if view.open_positions + view.pending_opens >= limits.max_open_positions {
        return TradeDecision::Reject {
            reason: RejectReason::MaxOpenPositions {
                limit: limits.max_open_positions,
            },
        };
    }

    let quantity = size_for(rec.confidence, limits.max_position_size);
    if quantity <= Decimal::ZERO {
        return TradeDecision::Reject {
            reason: RejectReason::InvalidQuantity,
        };
    }
    if quantity > limits.max_position_size {
        return TradeDecision::Reject {
            reason: RejectReason::MaxPositionSize {
                requested: quantity,
                limit: limits.max_position_size,
            },
        };
    }

    TradeDecision::Open {
        symbol: rec.symbol.clone(),
        side,
        quantity,
        price: mark,
    }
}

/// Confidence-scaled size, rounded toward zero.
pub fn size_for(confidence: Decimal, max_position_size: Decimal) -> Decimal {
    (confidence * max_position_size)
        .round_dp_with_strategy(QUANTITY_SCALE, RoundingStrategy::ToZero)
        .normalize()
}

fn side_label(side: PositionSide) -> &'static str {
    match side {
        PositionSide::Long => "long",
        PositionSide::Short => "short",
    }
}

#[derive(Debug)]
struct Ledger {
    positions: HashMap<String, Position>,
    reserved: HashSet<String>,
    realized_pnl: Decimal,
    peak_equity: Decimal,
}

/// Owns the simulated portfolio and applies the risk rules against it.
///
/// An `Open` decision reserves a slot for its symbol until the cycle settles
/// or releases it, so concurrent cycles cannot overshoot `max_open_positions`.
#[derive(Debug)]
pub struct RiskManager {
    limits: RiskLimits,
    ledger: Mutex<Ledger>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        let peak_equity = limits.starting_equity;
        Self {
            limits,
            ledger: Mutex::new(Ledger {
                positions: HashMap::new(),
                reserved: HashSet::new(),
                realized_pnl: Decimal::ZERO,
                peak_equity,
            }),
        }
    }

    /// Seed an open position, e.g. when resuming a paper session.
    pub fn with_position(self, position: Position) -> Self {
        self.lock().positions.insert(position.symbol.clone(), position);
        self
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Evaluate `rec` against the current ledger and reserve a slot for any
    /// resulting `Open`.
    pub fn evaluate(&self, rec: &AggregatedRecommendation, mark: Decimal) -> Vec<TradeDecision> {
        let mut ledger = self.lock();
        let view = self.view_locked(&ledger, &rec.symbol);
        let position = ledger.positions.get(&rec.symbol).cloned();

        let decisions = evaluate(rec, position.as_ref(), &view, &self.limits, mark);

        if decisions
            .iter()
            .any(|d| matches!(d, TradeDecision::Open { .. }))
        {
            ledger.reserved.insert(rec.symbol.clone());
        }
        for decision in &decisions {
            debug!(symbol = %rec.symbol, decision = ?decision, "Risk decision");
        }
        decisions
    }

    /// Apply a filled decision to the ledger. Returns realized P&L for closes.
    pub fn settle(
        &self,
        decision: &TradeDecision,
        receipt: &ExecutionReceipt,
    ) -> Result<Option<Decimal>, LedgerError> {
        let mut ledger = self.lock();
        match decision {
            TradeDecision::Open { symbol, side, .. } => {
                ledger.reserved.remove(symbol);
                if ledger.positions.contains_key(symbol) {
                    return Err(LedgerError::AlreadyOpen(symbol.clone()));
                }
                let position = Position {
                    symbol: symbol.clone(),
                    side: *side,
                    entry_price: receipt.fill_price,
                    quantity: receipt.quantity,
                    opened_at: receipt.executed_at,
                };
                info!(
                    symbol = %symbol,
                    side = side_label(*side),
                    quantity = %position.quantity,
                    entry_price = %position.entry_price,
                    "Position opened"
                );
                ledger.positions.insert(symbol.clone(), position);
                Ok(None)
            }
            TradeDecision::Close { symbol, .. } => {
                let position = ledger
                    .positions
                    .remove(symbol)
                    .ok_or_else(|| LedgerError::NotOpen(symbol.clone()))?;
                let pnl = position.unrealized_pnl(receipt.fill_price);
                ledger.realized_pnl += pnl;
                let equity = self.limits.starting_equity + ledger.realized_pnl;
                if equity > ledger.peak_equity {
                    ledger.peak_equity = equity;
                }
                info!(
                    symbol = %symbol,
                    realized_pnl = %pnl,
                    equity = %equity,
                    "Position closed"
                );
                Ok(Some(pnl))
            }
            TradeDecision::Hold { .. } | TradeDecision::Reject { .. } => Err(LedgerError::NotATrade),
        }
    }

    /// Drop any reservation held for `symbol`. Safe to call when none exists.
    pub fn release(&self, symbol: &str) {
        self.lock().reserved.remove(symbol);
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.lock().positions.get(symbol).cloned()
    }

    pub fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.lock().positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.lock().realized_pnl
    }

    /// Portfolio view as seen by an evaluation of `symbol`.
    pub fn view(&self, symbol: &str) -> LedgerView {
        let ledger = self.lock();
        self.view_locked(&ledger, symbol)
    }

    fn view_locked(&self, ledger: &Ledger, symbol: &str) -> LedgerView {
        LedgerView {
            open_positions: ledger.positions.keys().filter(|s| *s != symbol).count(),
            pending_opens: ledger.reserved.iter().filter(|s| *s != symbol).count(),
            equity: self.limits.starting_equity + ledger.realized_pnl,
            peak_equity: ledger.peak_equity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cryptodesk_models::analysis::{Verdict, VerdictWeights};
    use cryptodesk_models::trade_decision::OrderSide;
    use rust_decimal_macros::dec;

    fn rec(symbol: &str, verdict: Verdict, confidence: Decimal) -> AggregatedRecommendation {
        AggregatedRecommendation {
            symbol: symbol.to_string(),
            verdict,
            confidence,
            weights: VerdictWeights::default(),
            contributions: vec![],
            decided_at: Utc::now(),
        }
    }

    fn flat_view() -> LedgerView {
        LedgerView {
            open_positions: 0,
            pending_opens: 0,
            equity: dec!(100000),
            peak_equity: dec!(100000),
        }
    }

    fn long_btc(quantity: Decimal) -> Position {
        Position {
            symbol: "BTC".to_string(),
            side: PositionSide::Long,
            entry_price: dec!(50000),
            quantity,
            opened_at: Utc::now(),
        }
    }

    fn receipt(side: OrderSide, quantity: Decimal, fill_price: Decimal) -> ExecutionReceipt {
        ExecutionReceipt {
            client_order_id: "c-0".to_string(),
            exchange_order_id: "x-1".to_string(),
            symbol: "BTC".to_string(),
            side,
            quantity,
            fill_price,
            executed_at: Utc::now(),
            venue: "paper".to_string(),
        }
    }

    #[test]
    fn flat_bullish_opens_confidence_sized_long() {
        let decisions = evaluate(
            &rec("BTC", Verdict::Bullish, dec!(0.7)),
            None,
            &flat_view(),
            &RiskLimits::default(),
            dec!(50000),
        );
        assert_eq!(
            decisions,
            vec![TradeDecision::Open {
                symbol: "BTC".to_string(),
                side: PositionSide::Long,
                quantity: dec!(0.7),
                price: dec!(50000),
            }]
        );
    }

    #[test]
    fn same_direction_holds() {
        let position = long_btc(dec!(0.5));
        let decisions = evaluate(
            &rec("BTC", Verdict::Bullish, dec!(0.9)),
            Some(&position),
            &flat_view(),
            &RiskLimits::default(),
            dec!(51000),
        );
        assert_eq!(decisions.len(), 1);
        assert!(matches!(&decisions[0], TradeDecision::Hold { reason } if reason.contains("already long")));
    }

    #[test]
    fn opposite_direction_closes_then_opens() {
        let position = long_btc(dec!(0.5));
        let decisions = evaluate(
            &rec("BTC", Verdict::Bearish, dec!(0.6)),
            Some(&position),
            &flat_view(),
            &RiskLimits::default(),
            dec!(48000),
        );
        assert_eq!(decisions.len(), 2);
        assert_eq!(
            decisions[0],
            TradeDecision::Close {
                symbol: "BTC".to_string(),
                side: PositionSide::Long,
                quantity: dec!(0.5),
                price: dec!(48000),
            }
        );
        assert!(matches!(
            &decisions[1],
            TradeDecision::Open { side: PositionSide::Short, quantity, .. } if *quantity == dec!(0.6)
        ));
    }

    #[test]
    fn neutral_and_low_confidence_hold() {
        let limits = RiskLimits::default();
        let neutral = evaluate(
            &rec("ETH", Verdict::Neutral, dec!(0.9)),
            None,
            &flat_view(),
            &limits,
            dec!(3000),
        );
        assert!(matches!(&neutral[0], TradeDecision::Hold { .. }));

        let weak = evaluate(
            &rec("ETH", Verdict::Bullish, dec!(0.49)),
            None,
            &flat_view(),
            &limits,
            dec!(3000),
        );
        assert!(matches!(&weak[0], TradeDecision::Hold { reason } if reason.contains("below minimum")));
    }

    #[test]
    fn open_position_cap_counts_pending_reservations() {
        let limits = RiskLimits {
            max_open_positions: 2,
            ..RiskLimits::default()
        };
        let view = LedgerView {
            open_positions: 1,
            pending_opens: 1,
            ..flat_view()
        };
        let decisions = evaluate(
            &rec("SOL", Verdict::Bullish, dec!(0.8)),
            None,
            &view,
            &limits,
            dec!(150),
        );
        assert_eq!(
            decisions,
            vec![TradeDecision::Reject {
                reason: RejectReason::MaxOpenPositions { limit: 2 }
            }]
        );
    }

    #[test]
    fn drawdown_blocks_new_positions() {
        let view = LedgerView {
            equity: dec!(75000),
            peak_equity: dec!(100000),
            ..flat_view()
        };
        let decisions = evaluate(
            &rec("BTC", Verdict::Bullish, dec!(0.8)),
            None,
            &view,
            &RiskLimits::default(),
            dec!(50000),
        );
        assert_eq!(
            decisions,
            vec![TradeDecision::Reject {
                reason: RejectReason::MaxDrawdown {
                    drawdown: dec!(0.25),
                    limit: dec!(0.20),
                }
            }]
        );
    }

    #[test]
    fn tiny_size_is_rejected() {
        let limits = RiskLimits {
            max_position_size: dec!(0.00000001),
            min_confidence: dec!(0),
            ..RiskLimits::default()
        };
        let decisions = evaluate(
            &rec("BTC", Verdict::Bullish, dec!(0.5)),
            None,
            &flat_view(),
            &limits,
            dec!(50000),
        );
        assert_eq!(
            decisions,
            vec![TradeDecision::Reject {
                reason: RejectReason::InvalidQuantity
            }]
        );
    }

    #[test]
    fn sizing_rounds_down() {
        assert_eq!(size_for(dec!(0.333333333333), dec!(1)), dec!(0.33333333));
        assert_eq!(size_for(dec!(1), dec!(2.5)), dec!(2.5));
    }

    #[test]
    fn open_reserves_until_settled_or_released() {
        let risk = RiskManager::new(RiskLimits::default());
        let decisions = risk.evaluate(&rec("BTC", Verdict::Bullish, dec!(0.7)), dec!(50000));
        assert!(matches!(decisions[0], TradeDecision::Open { .. }));
        assert_eq!(risk.view("ETH").pending_opens, 1);
        assert_eq!(risk.view("BTC").pending_opens, 0);

        risk.release("BTC");
        assert_eq!(risk.view("ETH").pending_opens, 0);
    }

    #[test]
    fn settle_round_trip_updates_equity() {
        let risk = RiskManager::new(RiskLimits::default());
        let decisions = risk.evaluate(&rec("BTC", Verdict::Bullish, dec!(0.5)), dec!(50000));
        risk.settle(&decisions[0], &receipt(OrderSide::Buy, dec!(0.5), dec!(50000)))
            .unwrap();
        assert_eq!(risk.position("BTC").unwrap().quantity, dec!(0.5));
        assert_eq!(risk.view("ETH").open_positions, 1);
        assert_eq!(risk.view("ETH").pending_opens, 0);

        let close = TradeDecision::Close {
            symbol: "BTC".to_string(),
            side: PositionSide::Long,
            quantity: dec!(0.5),
            price: dec!(52000),
        };
        let pnl = risk
            .settle(&close, &receipt(OrderSide::Sell, dec!(0.5), dec!(52000)))
            .unwrap();
        assert_eq!(pnl, Some(dec!(1000)));
        assert!(risk.position("BTC").is_none());
        assert_eq!(risk.view("BTC").peak_equity, dec!(101000));
    }

    #[test]
    fn settle_refuses_double_open() {
        let risk = RiskManager::new(RiskLimits::default()).with_position(long_btc(dec!(0.5)));
        let open = TradeDecision::Open {
            symbol: "BTC".to_string(),
            side: PositionSide::Long,
            quantity: dec!(0.5),
            price: dec!(50000),
        };
        assert_eq!(
            risk.settle(&open, &receipt(OrderSide::Buy, dec!(0.5), dec!(50000))),
            Err(LedgerError::AlreadyOpen("BTC".to_string()))
        );
    }

    #[test]
    fn losses_produce_drawdown_from_peak() {
        let risk = RiskManager::new(RiskLimits::default())
            .with_position(long_btc(dec!(1)));
        let close = TradeDecision::Close {
            symbol: "BTC".to_string(),
            side: PositionSide::Long,
            quantity: dec!(1),
            price: dec!(30000),
        };
        risk.settle(&close, &receipt(OrderSide::Sell, dec!(1), dec!(30000)))
            .unwrap();
        let view = risk.view("BTC");
        assert_eq!(view.equity, dec!(80000));
        assert_eq!(view.drawdown(), dec!(0.2));

        let decisions = risk.evaluate(&rec("BTC", Verdict::Bullish, dec!(0.9)), dec!(30000));
        assert!(matches!(
            &decisions[0],
            TradeDecision::Reject { reason: RejectReason::MaxDrawdown { .. } }
        ));
    }
}
