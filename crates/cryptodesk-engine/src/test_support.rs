//! Executors and a wired-up orchestrator for engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cryptodesk_agents::test_support::btc_scenario_registry;
use cryptodesk_agents::{AgentPool, AgentRegistry};
use cryptodesk_gateway::test_support::{fast_retry, gateway_with, MockSource};
use cryptodesk_models::config::BreakerConfig;
use cryptodesk_models::position::{Position, RiskLimits};
use cryptodesk_models::trade_decision::{ExecutionReceipt, OrderRequest};
use rust_decimal::Decimal;

use crate::execution::{ExecutionError, PaperExchange, TradeExecutor};
use crate::journal::MemoryJournal;
use crate::orchestrator::Orchestrator;
use crate::risk::RiskManager;

/// Paper exchange that first replays a script of passes and failures, and
/// records every request it sees.
pub struct ScriptedExecutor {
    inner: PaperExchange,
    script: Mutex<VecDeque<Option<ExecutionError>>>,
    requests: Mutex<Vec<OrderRequest>>,
    calls: AtomicU32,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            inner: PaperExchange::new(0),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` scripted submissions with `err`.
    pub fn failing_times(self, n: usize, err: ExecutionError) -> Self {
        self.extend_script(std::iter::repeat(Some(err)).take(n))
    }

    /// Let the next `n` scripted submissions fill normally.
    pub fn passing(self, n: usize) -> Self {
        self.extend_script(std::iter::repeat(None).take(n))
    }

    fn extend_script(self, steps: impl Iterator<Item = Option<ExecutionError>>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(steps);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request submitted, including failed attempts.
    pub fn requests(&self) -> Vec<OrderRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn exchange(&self) -> &PaperExchange {
        &self.inner
    }
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradeExecutor for ScriptedExecutor {
    fn venue(&self) -> &str {
        "scripted"
    }

    async fn submit(&self, order: &OrderRequest) -> Result<ExecutionReceipt, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(order.clone());

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .flatten();
        match scripted {
            Some(err) => Err(err),
            None => self.inner.submit(order).await,
        }
    }
}

/// Everything a test needs to drive and inspect cycles.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub source: Arc<MockSource>,
    pub executor: Arc<ScriptedExecutor>,
    pub journal: Arc<MemoryJournal>,
}

impl Harness {
    pub fn risk(&self) -> &RiskManager {
        self.orchestrator.risk()
    }
}

/// Builds a `Harness`. Defaults: a mock source at 50000, the reference BTC
/// analyst panel, default limits and a fault-free executor.
pub struct HarnessBuilder {
    source: MockSource,
    registry: AgentRegistry,
    limits: RiskLimits,
    positions: Vec<Position>,
    executor: ScriptedExecutor,
    breaker: BreakerConfig,
    deadline: Duration,
    agent_timeout: Duration,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            source: MockSource::new("mock").with_price(Decimal::new(50_000, 0)),
            registry: btc_scenario_registry(),
            limits: RiskLimits::default(),
            positions: Vec::new(),
            executor: ScriptedExecutor::new(),
            breaker: BreakerConfig::default(),
            deadline: Duration::from_secs(120),
            agent_timeout: Duration::from_secs(45),
        }
    }

    pub fn source(mut self, source: MockSource) -> Self {
        self.source = source;
        self
    }

    pub fn registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn limits(mut self, limits: RiskLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn position(mut self, position: Position) -> Self {
        self.positions.push(position);
        self
    }

    pub fn executor(mut self, executor: ScriptedExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    pub fn build(self) -> Harness {
        let source = Arc::new(self.source);
        let gateway = Arc::new(gateway_with(vec![source.clone()], Duration::from_millis(1)));
        let risk = self
            .positions
            .into_iter()
            .fold(RiskManager::new(self.limits), RiskManager::with_position);
        let executor = Arc::new(self.executor);
        let journal = Arc::new(MemoryJournal::new());

        let orchestrator = Orchestrator::new(
            gateway,
            AgentPool::new(self.registry, self.agent_timeout, 4),
            Arc::new(risk),
            executor.clone(),
            journal.clone(),
        )
        .with_breakers(&self.breaker)
        .with_submission_retry(fast_retry(3))
        .with_deadline(self.deadline);

        Harness {
            orchestrator: Arc::new(orchestrator),
            source,
            executor,
            journal,
        }
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}
