//! Scripted analysts for pool, orchestrator and scenario tests.
//!
//! `ScriptedAnalyst` answers with a fixed behaviour and counts how many
//! analyses started and finished, so cancellation can be observed.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cryptodesk_models::analysis::{AgentKind, Verdict};
use cryptodesk_models::market::{MarketSnapshot, Provenance};
use rust_decimal::Decimal;

use crate::analyst::{Analysis, Analyst};
use crate::error::AgentError;
use crate::registry::AgentRegistry;

#[derive(Debug, Clone)]
pub enum Behaviour {
    Respond(Analysis),
    /// Respond after sleeping.
    Delayed(Duration, Analysis),
    Fail(String),
    /// Never completes.
    Hang,
    Panic,
}

pub struct ScriptedAnalyst {
    kind: AgentKind,
    name: String,
    behaviour: Behaviour,
    started: AtomicU32,
    finished: AtomicU32,
}

impl ScriptedAnalyst {
    pub fn new(kind: AgentKind, behaviour: Behaviour) -> Self {
        Self {
            kind,
            name: format!("scripted_{kind}"),
            behaviour,
            started: AtomicU32::new(0),
            finished: AtomicU32::new(0),
        }
    }

    pub fn voting(kind: AgentKind, verdict: Verdict, confidence: Decimal) -> Self {
        Self::new(kind, Behaviour::Respond(analysis(verdict, confidence)))
    }

    pub fn slow(kind: AgentKind, delay: Duration, verdict: Verdict, confidence: Decimal) -> Self {
        Self::new(kind, Behaviour::Delayed(delay, analysis(verdict, confidence)))
    }

    pub fn failing(kind: AgentKind, message: &str) -> Self {
        Self::new(kind, Behaviour::Fail(message.to_string()))
    }

    pub fn hanging(kind: AgentKind) -> Self {
        Self::new(kind, Behaviour::Hang)
    }

    pub fn panicking(kind: AgentKind) -> Self {
        Self::new(kind, Behaviour::Panic)
    }

    pub fn started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> u32 {
        self.finished.load(Ordering::SeqCst)
    }
}

pub fn analysis(verdict: Verdict, confidence: Decimal) -> Analysis {
    Analysis {
        verdict,
        confidence,
        rationale: format!("scripted {verdict} at {confidence}"),
    }
}

#[async_trait]
impl Analyst for ScriptedAnalyst {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, _snapshot: &MarketSnapshot) -> Result<Analysis, AgentError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let outcome = match &self.behaviour {
            Behaviour::Respond(analysis) => Ok(analysis.clone()),
            Behaviour::Delayed(delay, analysis) => {
                tokio::time::sleep(*delay).await;
                Ok(analysis.clone())
            }
            Behaviour::Fail(message) => Err(AgentError::Cli(message.clone())),
            Behaviour::Hang => {
                std::future::pending::<()>().await;
                Err(AgentError::Cli("unreachable".to_string()))
            }
            Behaviour::Panic => panic!("scripted analyst panicked"),
        };
        self.finished.fetch_add(1, Ordering::SeqCst);
        outcome
    }
}

/// The reference BTC scenario: technical bullish 0.8, financial bullish 0.6,
/// legal bearish 0.3, strategist abstains.
pub fn btc_scenario_registry() -> AgentRegistry {
    AgentRegistry::new()
        .with(Arc::new(ScriptedAnalyst::voting(
            AgentKind::Technical,
            Verdict::Bullish,
            Decimal::new(8, 1),
        )))
        .with(Arc::new(ScriptedAnalyst::voting(
            AgentKind::Financial,
            Verdict::Bullish,
            Decimal::new(6, 1),
        )))
        .with(Arc::new(ScriptedAnalyst::voting(
            AgentKind::Legal,
            Verdict::Bearish,
            Decimal::new(3, 1),
        )))
        .with(Arc::new(ScriptedAnalyst::voting(
            AgentKind::Strategist,
            Verdict::Abstain,
            Decimal::ZERO,
        )))
}

/// Every analyst votes the same way.
pub fn unanimous_registry(verdict: Verdict, confidence: Decimal) -> AgentRegistry {
    AgentKind::ALL.iter().fold(AgentRegistry::new(), |registry, kind| {
        registry.with(Arc::new(ScriptedAnalyst::voting(*kind, verdict, confidence)))
    })
}

/// Every analyst fails.
pub fn failing_registry() -> AgentRegistry {
    AgentKind::ALL.iter().fold(AgentRegistry::new(), |registry, kind| {
        registry.with(Arc::new(ScriptedAnalyst::failing(*kind, "model unavailable")))
    })
}

pub fn snapshot(symbol: &str, price: Decimal) -> MarketSnapshot {
    let now = Utc::now();
    MarketSnapshot::new(
        symbol,
        now,
        price,
        Decimal::new(1_000, 0),
        Provenance {
            source: "scripted".to_string(),
            fetched_at: now,
        },
    )
}
