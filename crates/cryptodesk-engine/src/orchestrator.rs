use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use cryptodesk_agents::{aggregate, AgentPool, AggregateError};
use cryptodesk_gateway::{Gateway, GatewayError, RetryPolicy};
use cryptodesk_models::config::BreakerConfig;
use cryptodesk_models::cycle::{CycleOutcome, CycleRecord};
use cryptodesk_models::position::PositionSide;
use cryptodesk_models::trade_decision::{ExecutionReceipt, OrderRequest, TradeDecision};
use rust_decimal::Decimal;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::circuit::{BreakerError, CircuitBreaker};
use crate::error::EngineError;
use crate::execution::{ExecutionError, TradeExecutor};
use crate::journal::CycleSink;
use crate::risk::RiskManager;

const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);

/// Runs trading cycles: fetch, analyze, aggregate, evaluate, execute, record.
///
/// Each dependency call goes through its own circuit breaker. The deadline
/// bounds everything up to the risk decision; once an order is submitted the
/// cycle runs to completion so the ledger matches the venue.
pub struct Orchestrator {
    gateway: Arc<Gateway>,
    pool: AgentPool,
    risk: Arc<RiskManager>,
    executor: Arc<dyn TradeExecutor>,
    journal: Arc<dyn CycleSink>,
    gateway_breaker: CircuitBreaker,
    execution_breaker: CircuitBreaker,
    submission_retry: RetryPolicy,
    deadline: Duration,
    in_flight: Mutex<HashSet<String>>,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<Gateway>,
        pool: AgentPool,
        risk: Arc<RiskManager>,
        executor: Arc<dyn TradeExecutor>,
        journal: Arc<dyn CycleSink>,
    ) -> Self {
        let breaker = BreakerConfig::default();
        Self {
            gateway,
            pool,
            risk,
            executor,
            journal,
            gateway_breaker: CircuitBreaker::from_config("gateway", &breaker),
            execution_breaker: CircuitBreaker::from_config("execution", &breaker),
            submission_retry: RetryPolicy::default(),
            deadline: DEFAULT_DEADLINE,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_breakers(mut self, config: &BreakerConfig) -> Self {
        self.gateway_breaker = CircuitBreaker::from_config("gateway", config);
        self.execution_breaker = CircuitBreaker::from_config("execution", config);
        self
    }

    pub fn with_submission_retry(mut self, retry: RetryPolicy) -> Self {
        self.submission_retry = retry;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn gateway_breaker(&self) -> &CircuitBreaker {
        &self.gateway_breaker
    }

    pub fn execution_breaker(&self) -> &CircuitBreaker {
        &self.execution_breaker
    }

    /// Run one cycle for `symbol`. Never fails: every outcome, including an
    /// abort, is returned as a record and written to the journal.
    pub async fn run_cycle(&self, symbol: &str) -> CycleRecord {
        let symbol = symbol.trim().to_ascii_uppercase();
        let started_at = Utc::now();
        let record = CycleRecord {
            cycle_id: Uuid::new_v4(),
            symbol: symbol.clone(),
            started_at,
            finished_at: started_at,
            snapshot: None,
            recommendation: None,
            decisions: Vec::new(),
            executions: Vec::new(),
            outcome: CycleOutcome::Traded,
            leg_error: None,
        };
        let span = info_span!("cycle", cycle_id = %record.cycle_id, symbol = %symbol);
        self.complete(record).instrument(span).await
    }

    async fn complete(&self, mut record: CycleRecord) -> CycleRecord {
        let outcome = match InFlight::claim(&self.in_flight, &record.symbol) {
            Some(_claim) => self.drive(&mut record).await,
            None => Err(EngineError::CycleInFlight(record.symbol.clone())),
        };

        record.outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, class = ?e.class(), "Cycle aborted");
                CycleOutcome::Aborted {
                    reason: e.abort_reason(),
                }
            }
        };
        record.finished_at = Utc::now();

        if let Err(e) = self.journal.record(&record).await {
            error!(error = %e, "Failed to journal cycle record");
        }
        info!(
            outcome = ?record.outcome,
            executions = record.executions.len(),
            elapsed_ms = record.elapsed_ms(),
            "Cycle complete"
        );
        record
    }

    async fn drive(&self, record: &mut CycleRecord) -> Result<CycleOutcome, EngineError> {
        let symbol = record.symbol.clone();
        let prepared = tokio::time::timeout(self.deadline, self.prepare(&symbol, record)).await;

        let outcome = match prepared {
            Ok(Ok(decisions)) => {
                record.decisions = decisions.clone();
                self.execute(record, &decisions).await
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::DeadlineExceeded {
                after_ms: self.deadline.as_millis() as u64,
            }),
        };
        self.risk.release(&symbol);
        outcome
    }

    /// Everything before the first order: bounded by the cycle deadline.
    async fn prepare(
        &self,
        symbol: &str,
        record: &mut CycleRecord,
    ) -> Result<Vec<TradeDecision>, EngineError> {
        let snapshot = self
            .gateway_breaker
            .call(
                |e: &GatewayError| matches!(e, GatewayError::Unavailable(_)),
                || self.gateway.fetch(symbol),
            )
            .await
            .map_err(|e| match e {
                BreakerError::Open(dependency) => EngineError::CircuitOpen { dependency },
                BreakerError::Inner(e) => EngineError::MarketData(e),
            })?;
        record.snapshot = Some(snapshot.clone());

        let results = self.pool.analyze(&snapshot).await;
        let rec = aggregate(symbol, results, Utc::now()).map_err(
            |AggregateError::NoViableAnalysis { total }| EngineError::NoViableAnalysis { total },
        )?;

        let decisions = self.risk.evaluate(&rec, snapshot.price());
        record.recommendation = Some(rec);
        Ok(decisions)
    }

    async fn execute(
        &self,
        record: &mut CycleRecord,
        decisions: &[TradeDecision],
    ) -> Result<CycleOutcome, EngineError> {
        for (leg, decision) in decisions.iter().enumerate() {
            let Some(order) = self.order_for(record.cycle_id, leg, decision) else {
                continue;
            };
            let receipt = match self.submit(&order).await {
                Ok(receipt) => receipt,
                Err(e) if record.executions.is_empty() => return Err(e),
                Err(e) => {
                    error!(
                        error = %e,
                        leg,
                        client_order_id = %order.client_order_id,
                        "Leg failed after earlier legs executed"
                    );
                    record.leg_error = Some(e.to_string());
                    break;
                }
            };
            match self.risk.settle(decision, &receipt) {
                Ok(Some(pnl)) => info!(realized_pnl = %pnl, "Close settled"),
                Ok(None) => {}
                Err(e) => error!(error = %e, client_order_id = %order.client_order_id, "Ledger rejected fill"),
            }
            record.executions.push(receipt);
        }

        if record.executions.is_empty() {
            Ok(CycleOutcome::NoTrade {
                reason: no_trade_reason(decisions),
            })
        } else {
            Ok(CycleOutcome::Traded)
        }
    }

    async fn submit(&self, order: &OrderRequest) -> Result<ExecutionReceipt, EngineError> {
        self.execution_breaker
            .call(
                |e: &ExecutionError| !matches!(e, ExecutionError::Rejected(_)),
                || {
                    self.submission_retry.run(
                        "submit_order",
                        ExecutionError::is_transient,
                        |_attempt| self.executor.submit(order),
                    )
                },
            )
            .await
            .map_err(|e| match e {
                BreakerError::Open(dependency) => EngineError::CircuitOpen { dependency },
                BreakerError::Inner(e) => EngineError::Execution(e),
            })
    }

    /// Order for one decision leg. The id is stable across retries of the leg.
    fn order_for(&self, cycle_id: Uuid, leg: usize, decision: &TradeDecision) -> Option<OrderRequest> {
        let client_order_id = format!("{cycle_id}-{leg}");
        match decision {
            TradeDecision::Open {
                symbol,
                side,
                quantity,
                price,
            } => {
                let limits = self.risk.limits();
                Some(OrderRequest {
                    client_order_id,
                    symbol: symbol.clone(),
                    side: side.opening_order(),
                    quantity: *quantity,
                    price: *price,
                    stop_loss: limits
                        .stop_loss_pct
                        .map(|pct| protective_price(*price, *side, -pct)),
                    take_profit: limits
                        .take_profit_pct
                        .map(|pct| protective_price(*price, *side, pct)),
                })
            }
            TradeDecision::Close {
                symbol,
                side,
                quantity,
                price,
            } => Some(OrderRequest {
                client_order_id,
                symbol: symbol.clone(),
                side: side.closing_order(),
                quantity: *quantity,
                price: *price,
                stop_loss: None,
                take_profit: None,
            }),
            TradeDecision::Hold { .. } | TradeDecision::Reject { .. } => None,
        }
    }
}

/// Price `pct` away from `entry` in the position's favour (negative for a stop).
fn protective_price(entry: Decimal, side: PositionSide, pct: Decimal) -> Decimal {
    let offset = match side {
        PositionSide::Long => pct,
        PositionSide::Short => -pct,
    };
    (entry * (Decimal::ONE + offset)).round_dp(8).normalize()
}

fn no_trade_reason(decisions: &[TradeDecision]) -> String {
    let reasons: Vec<String> = decisions
        .iter()
        .filter_map(|d| match d {
            TradeDecision::Hold { reason } => Some(reason.clone()),
            TradeDecision::Reject { reason } => Some(format!("rejected: {reason}")),
            TradeDecision::Open { .. } | TradeDecision::Close { .. } => None,
        })
        .collect();
    if reasons.is_empty() {
        "no action".to_string()
    } else {
        reasons.join("; ")
    }
}

/// Marks a symbol as having a running cycle until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    symbol: String,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<String>>, symbol: &str) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(symbol.to_string());
        inserted.then(|| Self {
            set,
            symbol: symbol.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptodesk_models::trade_decision::RejectReason;
    use rust_decimal_macros::dec;

    #[test]
    fn protective_prices_by_side() {
        assert_eq!(protective_price(dec!(50000), PositionSide::Long, dec!(-0.05)), dec!(47500));
        assert_eq!(protective_price(dec!(50000), PositionSide::Long, dec!(0.10)), dec!(55000));
        assert_eq!(protective_price(dec!(50000), PositionSide::Short, dec!(-0.05)), dec!(52500));
        assert_eq!(protective_price(dec!(50000), PositionSide::Short, dec!(0.10)), dec!(45000));
    }

    #[test]
    fn no_trade_reason_lists_holds_and_rejects() {
        let decisions = vec![TradeDecision::Reject {
            reason: RejectReason::MaxOpenPositions { limit: 3 },
        }];
        assert_eq!(
            no_trade_reason(&decisions),
            "rejected: max open positions reached (3)"
        );
        assert_eq!(no_trade_reason(&[]), "no action");
    }

    #[test]
    fn in_flight_claim_is_exclusive_until_dropped() {
        let set = Mutex::new(HashSet::new());
        let claim = InFlight::claim(&set, "BTC");
        assert!(claim.is_some());
        assert!(InFlight::claim(&set, "BTC").is_none());
        assert!(InFlight::claim(&set, "ETH").is_some());
        drop(claim);
        assert!(InFlight::claim(&set, "BTC").is_some());
    }
}
