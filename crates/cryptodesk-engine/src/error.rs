use cryptodesk_gateway::GatewayError;
use cryptodesk_models::cycle::AbortReason;
use thiserror::Error;

use crate::execution::ExecutionError;

/// Errors that end a cycle before it reaches a trade decision, or while
/// carrying one out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Market data error: {0}")]
    MarketData(#[from] GatewayError),

    #[error("No viable analysis from {total} agents")]
    NoViableAnalysis { total: usize },

    #[error("Circuit open for {dependency}")]
    CircuitOpen { dependency: String },

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Cycle deadline exceeded after {after_ms}ms")]
    DeadlineExceeded { after_ms: u64 },

    #[error("A cycle for {0} is already running")]
    CycleInFlight(String),
}

/// How the orchestrator treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth another attempt on the next tick; the dependency is degraded.
    Retryable,
    /// This cycle cannot complete, but nothing is broken.
    Abortable,
    /// Needs an operator: credentials or venue rejections.
    Fatal,
}

impl EngineError {
    pub fn class(&self) -> FailureClass {
        match self {
            EngineError::MarketData(GatewayError::InvalidSymbol(_)) => FailureClass::Abortable,
            EngineError::MarketData(_) => FailureClass::Retryable,
            EngineError::Execution(e) if e.is_transient() => FailureClass::Retryable,
            EngineError::Execution(_) => FailureClass::Fatal,
            EngineError::NoViableAnalysis { .. }
            | EngineError::CircuitOpen { .. }
            | EngineError::DeadlineExceeded { .. }
            | EngineError::CycleInFlight(_) => FailureClass::Abortable,
        }
    }

    /// The reason recorded on an aborted cycle.
    pub fn abort_reason(&self) -> AbortReason {
        match self {
            EngineError::MarketData(e) => AbortReason::MarketData(e.to_string()),
            EngineError::NoViableAnalysis { .. } => AbortReason::NoViableAnalysis,
            EngineError::CircuitOpen { dependency } => AbortReason::CircuitOpen {
                dependency: dependency.clone(),
            },
            EngineError::Execution(e) => AbortReason::Execution(e.to_string()),
            EngineError::DeadlineExceeded { after_ms } => AbortReason::DeadlineExceeded {
                after_ms: *after_ms,
            },
            EngineError::CycleInFlight(_) => AbortReason::CycleInFlight,
        }
    }
}
