pub mod bybit;
pub mod circuit;
pub mod error;
pub mod execution;
pub mod journal;
pub mod orchestrator;
pub mod risk;
pub mod scheduler;

pub mod test_support;

pub use bybit::BybitDemoExecutor;
pub use circuit::{BreakerError, CircuitBreaker, CircuitState};
pub use error::{EngineError, FailureClass};
pub use execution::{ExecutionError, PaperExchange, TradeExecutor};
pub use journal::{CycleSink, JournalError, MemoryJournal, SqliteJournal};
pub use orchestrator::Orchestrator;
pub use risk::{evaluate, LedgerError, LedgerView, RiskManager};
pub use scheduler::Scheduler;
