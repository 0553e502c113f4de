pub mod analysis;
pub mod config;
pub mod cycle;
pub mod market;
pub mod position;
pub mod trade_decision;

pub use analysis::{
    AgentFailure, AgentFailureKind, AgentKind, AggregatedRecommendation, AnalysisResult,
    InvalidConfidence, Verdict, VerdictWeights,
};
pub use config::{
    AgentsConfig, AnalystConfig, BreakerConfig, CryptodeskConfig, ExecutionConfig, GatewayConfig,
    JournalConfig, RetryConfig, SchedulerConfig, SourceConfig, SourceKind, VenueKind,
};
pub use cycle::{AbortReason, CycleOutcome, CycleRecord};
pub use market::{MarketSnapshot, Provenance};
pub use position::{Position, PositionSide, RiskLimits};
pub use trade_decision::{ExecutionReceipt, OrderRequest, OrderSide, RejectReason, TradeDecision};
