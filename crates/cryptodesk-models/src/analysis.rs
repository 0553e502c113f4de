use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of analysis producers in the agent pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Technical,
    Financial,
    Legal,
    Strategist,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Technical,
        AgentKind::Financial,
        AgentKind::Legal,
        AgentKind::Strategist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Technical => "technical",
            AgentKind::Financial => "financial",
            AgentKind::Legal => "legal",
            AgentKind::Strategist => "strategist",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directional judgment produced by an agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Bullish,
    Bearish,
    Neutral,
    Abstain,
}

impl Verdict {
    /// Parse a verdict label as returned by an agent. Case-insensitive.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "bullish" => Some(Verdict::Bullish),
            "bearish" => Some(Verdict::Bearish),
            "neutral" => Some(Verdict::Neutral),
            "abstain" => Some(Verdict::Abstain),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Verdict::Bullish => "bullish",
            Verdict::Bearish => "bearish",
            Verdict::Neutral => "neutral",
            Verdict::Abstain => "abstain",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentFailureKind {
    Timeout,
    Failure,
}

/// Why an agent could not produce a verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentFailure {
    pub kind: AgentFailureKind,
    pub message: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("confidence {0} is outside [0, 1]")]
pub struct InvalidConfidence(pub Decimal);

/// One agent's outcome for one cycle. Failed agents are represented here too
/// so the audit trail keeps every outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub agent: AgentKind,
    pub agent_name: String,
    pub verdict: Verdict,
    /// 0.0 to 1.0.
    pub confidence: Decimal,
    pub rationale: String,
    pub failure: Option<AgentFailure>,
    pub elapsed_ms: u64,
}

impl AnalysisResult {
    pub fn success(
        agent: AgentKind,
        agent_name: impl Into<String>,
        verdict: Verdict,
        confidence: Decimal,
        rationale: impl Into<String>,
        elapsed_ms: u64,
    ) -> Result<Self, InvalidConfidence> {
        if confidence < Decimal::ZERO || confidence > Decimal::ONE {
            return Err(InvalidConfidence(confidence));
        }
        Ok(Self {
            agent,
            agent_name: agent_name.into(),
            verdict,
            confidence,
            rationale: rationale.into(),
            failure: None,
            elapsed_ms,
        })
    }

    pub fn failed(
        agent: AgentKind,
        agent_name: impl Into<String>,
        kind: AgentFailureKind,
        message: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        let message = message.into();
        Self {
            agent,
            agent_name: agent_name.into(),
            verdict: Verdict::Abstain,
            confidence: Decimal::ZERO,
            rationale: format!("Agent failed: {message}"),
            failure: Some(AgentFailure { kind, message }),
            elapsed_ms,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// True when the result takes part in the weighted vote.
    pub fn is_viable(&self) -> bool {
        !self.is_failed() && self.verdict != Verdict::Abstain
    }
}

/// Summed confidence per directional bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerdictWeights {
    pub bullish: Decimal,
    pub bearish: Decimal,
    pub neutral: Decimal,
}

/// The aggregator's output for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedRecommendation {
    pub symbol: String,
    pub verdict: Verdict,
    pub confidence: Decimal,
    pub weights: VerdictWeights,
    /// Every agent outcome, including failed and abstaining ones.
    pub contributions: Vec<AnalysisResult>,
    pub decided_at: DateTime<Utc>,
}

impl AggregatedRecommendation {
    pub fn viable_count(&self) -> usize {
        self.contributions.iter().filter(|r| r.is_viable()).count()
    }
}
