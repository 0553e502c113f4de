pub mod aggregator;
pub mod analyst;
pub mod claude_cli;
pub mod error;
pub mod parser;
pub mod pool;
pub mod prompts;
pub mod registry;

pub mod test_support;

pub use aggregator::{aggregate, AggregateError};
pub use analyst::{Analysis, Analyst, ClaudeAnalyst};
pub use error::AgentError;
pub use pool::AgentPool;
pub use registry::AgentRegistry;
