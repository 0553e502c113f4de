use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::AggregatedRecommendation;
use crate::market::MarketSnapshot;
use crate::trade_decision::{ExecutionReceipt, TradeDecision};

/// Audit trail of one fetch → analyze → aggregate → risk → execute pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleRecord {
    pub cycle_id: Uuid,
    pub symbol: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub snapshot: Option<MarketSnapshot>,
    pub recommendation: Option<AggregatedRecommendation>,
    pub decisions: Vec<TradeDecision>,
    pub executions: Vec<ExecutionReceipt>,
    pub outcome: CycleOutcome,
    /// Failure of a leg that came after an already executed one. The cycle
    /// still counts as traded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leg_error: Option<String>,
}

impl CycleRecord {
    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Aborted { .. })
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// How a cycle ended.
///
/// `NoTrade` means the analysis completed and the decision was to hold or the
/// risk manager rejected the action. `Aborted` means the analysis could not
/// complete. The two are never merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Traded,
    NoTrade { reason: String },
    Aborted { reason: AbortReason },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    MarketData(String),
    NoViableAnalysis,
    CircuitOpen { dependency: String },
    Execution(String),
    DeadlineExceeded { after_ms: u64 },
    CycleInFlight,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::MarketData(msg) => write!(f, "market data unavailable: {msg}"),
            AbortReason::NoViableAnalysis => write!(f, "no agent produced a usable verdict"),
            AbortReason::CircuitOpen { dependency } => {
                write!(f, "circuit open for {dependency}")
            }
            AbortReason::Execution(msg) => write!(f, "execution failed: {msg}"),
            AbortReason::DeadlineExceeded { after_ms } => {
                write!(f, "cycle deadline exceeded after {after_ms}ms")
            }
            AbortReason::CycleInFlight => write!(f, "another cycle for this symbol is running"),
        }
    }
}
