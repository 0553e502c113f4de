use std::sync::Arc;
use std::time::Duration;

use cryptodesk_models::analysis::AgentKind;
use cryptodesk_models::config::AgentsConfig;
use tracing::info;

use crate::analyst::{Analyst, ClaudeAnalyst};

/// The analysts taking part in a cycle, in a fixed order.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    entries: Vec<(AgentKind, Arc<dyn Analyst>)>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One `ClaudeAnalyst` per enabled entry, in config order.
    pub fn from_config(config: &AgentsConfig) -> Self {
        let timeout = Duration::from_secs(config.per_agent_timeout_seconds);
        let mut registry = Self::new();

        for analyst in config.analysts.iter().filter(|a| a.enabled) {
            let model = analyst
                .model
                .clone()
                .unwrap_or_else(|| config.default_model.clone());
            info!(agent = %analyst.kind, model = %model, "Registering analyst");
            registry.register(Arc::new(
                ClaudeAnalyst::new(analyst.kind, model, timeout).with_program(&config.cli_program),
            ));
        }

        registry
    }

    pub fn register(&mut self, analyst: Arc<dyn Analyst>) {
        self.entries.push((analyst.kind(), analyst));
    }

    pub fn with(mut self, analyst: Arc<dyn Analyst>) -> Self {
        self.register(analyst);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kinds(&self) -> Vec<AgentKind> {
        self.entries.iter().map(|(kind, _)| *kind).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(AgentKind, Arc<dyn Analyst>)> {
        self.entries.iter()
    }
}
