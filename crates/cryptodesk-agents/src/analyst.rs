use std::time::Duration;

use async_trait::async_trait;
use cryptodesk_models::analysis::{AgentKind, Verdict};
use cryptodesk_models::market::MarketSnapshot;
use rust_decimal::Decimal;

use crate::claude_cli::{invoke_claude, ClaudeCliConfig};
use crate::error::AgentError;
use crate::parser::parse_analysis;
use crate::prompts::{system_prompt, user_prompt};

/// What an analyst returns when it completes.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub verdict: Verdict,
    pub confidence: Decimal,
    pub rationale: String,
}

/// An analysis producer. Mockable for testing.
#[async_trait]
pub trait Analyst: Send + Sync {
    fn kind(&self) -> AgentKind;
    fn name(&self) -> &str;

    async fn analyze(&self, snapshot: &MarketSnapshot) -> Result<Analysis, AgentError>;
}

/// An analyst backed by the Claude CLI.
pub struct ClaudeAnalyst {
    kind: AgentKind,
    name: String,
    cli_config: ClaudeCliConfig,
}

impl ClaudeAnalyst {
    pub fn new(kind: AgentKind, model: String, timeout: Duration) -> Self {
        Self {
            kind,
            name: format!("{kind}_analyst"),
            cli_config: ClaudeCliConfig {
                model,
                timeout,
                ..ClaudeCliConfig::default()
            },
        }
    }

    /// Run a different `claude` executable (name on PATH or full path).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.cli_config.program = program.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.cli_config.model
    }

    pub fn program(&self) -> &str {
        &self.cli_config.program
    }
}

#[async_trait]
impl Analyst for ClaudeAnalyst {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, snapshot: &MarketSnapshot) -> Result<Analysis, AgentError> {
        let system = system_prompt(self.kind);
        let user = user_prompt(snapshot)?;
        let raw_output = invoke_claude(&system, &user, &self.cli_config).await?;
        parse_analysis(&raw_output)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_support::snapshot;
    use rust_decimal_macros::dec;

    /// Canned analyst for unit tests inside this crate.
    pub struct MockAnalyst {
        pub kind: AgentKind,
        pub name: String,
        pub analysis: Option<Analysis>,
    }

    impl MockAnalyst {
        pub fn new(kind: AgentKind, verdict: Verdict, confidence: Decimal) -> Self {
            Self {
                kind,
                name: format!("mock_{kind}"),
                analysis: Some(Analysis {
                    verdict,
                    confidence,
                    rationale: format!("Mock {kind} analysis"),
                }),
            }
        }

        pub fn failing(kind: AgentKind) -> Self {
            Self {
                kind,
                name: format!("mock_{kind}"),
                analysis: None,
            }
        }
    }

    #[async_trait]
    impl Analyst for MockAnalyst {
        fn kind(&self) -> AgentKind {
            self.kind
        }

        fn name(&self) -> &str {
            &self.name
        }

        async fn analyze(&self, _snapshot: &MarketSnapshot) -> Result<Analysis, AgentError> {
            self.analysis
                .clone()
                .ok_or_else(|| AgentError::Cli("Mock failure".to_string()))
        }
    }

    #[test]
    fn claude_analyst_naming() {
        let analyst = ClaudeAnalyst::new(
            AgentKind::Legal,
            "claude-sonnet-4-5-20250929".to_string(),
            Duration::from_secs(30),
        );
        assert_eq!(analyst.kind(), AgentKind::Legal);
        assert_eq!(analyst.name(), "legal_analyst");
        assert_eq!(analyst.model(), "claude-sonnet-4-5-20250929");
        assert_eq!(analyst.program(), "claude");

        let pinned = analyst.with_program("/opt/claude/bin/claude");
        assert_eq!(pinned.program(), "/opt/claude/bin/claude");
    }

    #[tokio::test]
    async fn mock_analyst_returns_analysis() {
        let mock = MockAnalyst::new(AgentKind::Technical, Verdict::Bullish, dec!(0.80));
        let analysis = mock.analyze(&snapshot("BTC", dec!(50000))).await.unwrap();
        assert_eq!(analysis.verdict, Verdict::Bullish);
        assert_eq!(analysis.confidence, dec!(0.80));
    }

    #[tokio::test]
    async fn mock_analyst_failure() {
        let mock = MockAnalyst::failing(AgentKind::Technical);
        assert!(mock.analyze(&snapshot("BTC", dec!(50000))).await.is_err());
    }
}
