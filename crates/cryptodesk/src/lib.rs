//! cryptodesk - a multi-agent crypto paper-trading desk.
//!
//! Market snapshots are analyzed by a panel of Claude CLI analysts, their
//! verdicts are combined into one recommendation, and a risk manager turns it
//! into simulated trades against a paper or demo venue.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use cryptodesk::models::config::CryptodeskConfig;
//! use cryptodesk::{build_orchestrator, Credentials};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = CryptodeskConfig::default();
//! let orchestrator = build_orchestrator(&config, &Credentials::from_env())?;
//! let record = orchestrator.run_cycle("BTC").await;
//! println!("{:?}", record.outcome);
//! # Ok(())
//! # }
//! ```

pub use cryptodesk_agents as agents;
pub use cryptodesk_engine as engine;
pub use cryptodesk_gateway as gateway;
pub use cryptodesk_models as models;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use cryptodesk_agents::{AgentPool, AgentRegistry};
use cryptodesk_engine::{
    BybitDemoExecutor, CycleSink, MemoryJournal, Orchestrator, PaperExchange, RiskManager,
    Scheduler, SqliteJournal, TradeExecutor,
};
use cryptodesk_gateway::{Gateway, RetryPolicy};
use cryptodesk_models::config::{CryptodeskConfig, ExecutionConfig, JournalConfig, VenueKind};

pub const COINRANKING_API_KEY: &str = "COINRANKING_API_KEY";
pub const BYBIT_DEMO_API_KEY: &str = "BYBIT_DEMO_API_KEY";
pub const BYBIT_DEMO_API_SECRET: &str = "BYBIT_DEMO_API_SECRET";

/// Secrets that never live in the config file.
#[derive(Default, Clone)]
pub struct Credentials {
    pub coinranking_api_key: Option<String>,
    pub bybit_api_key: Option<String>,
    pub bybit_api_secret: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            coinranking_api_key: var(COINRANKING_API_KEY),
            bybit_api_key: var(BYBIT_DEMO_API_KEY),
            bybit_api_secret: var(BYBIT_DEMO_API_SECRET),
        }
    }
}

/// Load configuration from a TOML file, or defaults when no path is given.
pub fn load_config(path: Option<&str>) -> anyhow::Result<CryptodeskConfig> {
    let Some(path) = path else {
        return Ok(CryptodeskConfig::default());
    };
    let config_str =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {path}"))?;
    toml::from_str(&config_str).with_context(|| format!("Failed to parse config: {path}"))
}

pub fn build_gateway(config: &CryptodeskConfig, credentials: &Credentials) -> anyhow::Result<Gateway> {
    Gateway::from_config(&config.gateway, credentials.coinranking_api_key.clone())
        .map_err(|e| anyhow::anyhow!("Failed to build market data gateway: {e}"))
}

pub fn build_executor(
    config: &ExecutionConfig,
    credentials: &Credentials,
) -> anyhow::Result<Arc<dyn TradeExecutor>> {
    match config.venue {
        VenueKind::Paper => Ok(Arc::new(PaperExchange::new(config.slippage_bps))),
        VenueKind::BybitDemo => {
            let (Some(key), Some(secret)) = (
                credentials.bybit_api_key.clone(),
                credentials.bybit_api_secret.clone(),
            ) else {
                bail!("bybit_demo venue needs {BYBIT_DEMO_API_KEY} and {BYBIT_DEMO_API_SECRET}");
            };
            let executor = BybitDemoExecutor::from_config(config, key, secret)
                .map_err(|e| anyhow::anyhow!("Failed to build Bybit demo executor: {e}"))?;
            Ok(Arc::new(executor))
        }
    }
}

pub fn build_journal(config: &JournalConfig) -> anyhow::Result<Arc<dyn CycleSink>> {
    match &config.sqlite_path {
        Some(path) => {
            let journal = SqliteJournal::open(path)
                .with_context(|| format!("Failed to open cycle journal: {path}"))?;
            Ok(Arc::new(journal))
        }
        None => Ok(Arc::new(MemoryJournal::new())),
    }
}

/// Wire gateway, analysts, risk, venue and journal from configuration.
pub fn build_orchestrator(
    config: &CryptodeskConfig,
    credentials: &Credentials,
) -> anyhow::Result<Orchestrator> {
    let gateway = Arc::new(build_gateway(config, credentials)?);

    let registry = AgentRegistry::from_config(&config.agents);
    if registry.is_empty() {
        bail!("No analysts enabled in [agents]");
    }
    let pool = AgentPool::from_config(registry, &config.agents);

    let orchestrator = Orchestrator::new(
        gateway,
        pool,
        Arc::new(RiskManager::new(config.risk.clone())),
        build_executor(&config.execution, credentials)?,
        build_journal(&config.journal)?,
    )
    .with_breakers(&config.breaker)
    .with_submission_retry(RetryPolicy::from(&config.execution.retry))
    .with_deadline(Duration::from_secs(config.scheduler.cycle_deadline_seconds));

    Ok(orchestrator)
}

pub fn build_scheduler(config: &CryptodeskConfig, orchestrator: Arc<Orchestrator>) -> Scheduler {
    Scheduler::new(
        orchestrator,
        config.scheduler.symbols.clone(),
        Duration::from_secs(config.scheduler.interval_seconds),
    )
}
