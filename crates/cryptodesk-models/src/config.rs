use serde::{Deserialize, Serialize};

use crate::analysis::AgentKind;
use crate::position::RiskLimits;

/// Top-level configuration for cryptodesk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CryptodeskConfig {
    pub gateway: GatewayConfig,
    pub agents: AgentsConfig,
    pub risk: RiskLimits,
    pub breaker: BreakerConfig,
    pub execution: ExecutionConfig,
    pub scheduler: SchedulerConfig,
    pub journal: JournalConfig,
}

/// Configuration for the market data gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Freshness window: a fetch younger than this is served from cache.
    pub cache_ttl_seconds: u64,
    /// Maximum number of symbols held in the snapshot cache.
    pub max_cache_entries: u64,
    /// Longest a caller will wait for a rate-limit token before failing.
    pub rate_limit_wait_ms: u64,
    pub retry: RetryConfig,
    /// Upstream sources, tried in order.
    pub sources: Vec<SourceConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 5,
            max_cache_entries: 1_000,
            rate_limit_wait_ms: 2_000,
            retry: RetryConfig::default(),
            sources: vec![SourceConfig::default()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Bybit,
    #[serde(rename = "coinranking")]
    CoinRanking,
}

/// One upstream market data source and its rate budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Override the provider's default base URL.
    pub base_url: Option<String>,
    /// Token bucket burst size.
    pub capacity: u32,
    /// Token bucket refill rate.
    pub refill_per_second: f64,
    pub timeout_seconds: u64,
    /// Quote currency appended to symbols for pair-based venues (e.g., BTC → BTCUSDT).
    pub quote_asset: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Bybit,
            base_url: None,
            capacity: 10,
            refill_per_second: 5.0,
            timeout_seconds: 10,
            quote_asset: "USDT".to_string(),
        }
    }
}

/// Retry schedule for transient failures: exponential backoff with jitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// ± fraction of the computed delay added as random jitter.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            jitter_factor: 0.3,
        }
    }
}

/// Configuration for the agent pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsConfig {
    /// Per-agent timeout in seconds.
    pub per_agent_timeout_seconds: u64,
    /// Maximum agents running at the same time within one cycle.
    pub max_concurrency: usize,
    /// Default model for analysts without an override.
    pub default_model: String,
    /// `claude` executable used by every analyst.
    pub cli_program: String,
    pub analysts: Vec<AnalystConfig>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            per_agent_timeout_seconds: 45,
            max_concurrency: 4,
            default_model: "claude-3-5-haiku-latest".to_string(),
            cli_program: "claude".to_string(),
            analysts: AgentKind::ALL
                .iter()
                .map(|kind| AnalystConfig {
                    kind: *kind,
                    enabled: true,
                    model: None,
                })
                .collect(),
        }
    }
}

/// Configuration for a single analyst.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalystConfig {
    pub kind: AgentKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Override model for this analyst. Falls back to `AgentsConfig::default_model`.
    pub model: Option<String>,
}

/// Circuit breaker thresholds, shared by every guarded dependency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    pub window_seconds: u64,
    /// How long an open breaker fails fast before admitting a probe.
    pub cooldown_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_seconds: 60,
            cooldown_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VenueKind {
    /// In-process simulated fills.
    #[default]
    Paper,
    /// Bybit demo-trading REST API.
    BybitDemo,
}

/// Configuration for the trade-execution boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub venue: VenueKind,
    /// Simulated slippage for the paper venue, in basis points.
    pub slippage_bps: u32,
    /// Override the venue's default base URL.
    pub base_url: Option<String>,
    pub recv_window_ms: u64,
    pub timeout_seconds: u64,
    pub quote_asset: String,
    pub retry: RetryConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            venue: VenueKind::Paper,
            slippage_bps: 0,
            base_url: None,
            recv_window_ms: 5_000,
            timeout_seconds: 10,
            quote_asset: "USDT".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

/// Configuration for the cycle scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub symbols: Vec<String>,
    /// Time between the starts of consecutive cycles for a symbol.
    pub interval_seconds: u64,
    /// Overall deadline for one cycle's fetch and analysis.
    pub cycle_deadline_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTC".to_string(), "ETH".to_string()],
            interval_seconds: 300,
            cycle_deadline_seconds: 120,
        }
    }
}

/// Where cycle records are persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JournalConfig {
    /// SQLite file for the append-only cycle journal. None keeps records in memory.
    pub sqlite_path: Option<String>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            sqlite_path: Some("data/cryptodesk_cycles.db".to_string()),
        }
    }
}

fn default_true() -> bool {
    true
}
