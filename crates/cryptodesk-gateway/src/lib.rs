pub mod cache;
pub mod error;
pub mod gateway;
pub mod normalize;
pub mod rate_limit;
pub mod retry;
pub mod sources;

pub mod test_support;

pub use error::{GatewayError, SourceError};
pub use gateway::Gateway;
pub use rate_limit::TokenBucket;
pub use retry::RetryPolicy;
pub use sources::{BybitTickerSource, CoinRankingSource, MarketDataSource};
