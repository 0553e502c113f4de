use std::sync::Arc;
use std::time::{Duration, Instant};

use cryptodesk_models::analysis::{AgentFailureKind, AnalysisResult};
use cryptodesk_models::config::AgentsConfig;
use cryptodesk_models::market::MarketSnapshot;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::AgentError;
use crate::registry::AgentRegistry;

/// Runs every registered analyst against one snapshot.
///
/// Analysts run concurrently, at most `max_concurrency` at a time, each under
/// its own timeout. A timed-out, failed or panicked analyst becomes a failed
/// `AnalysisResult`; the others are unaffected. Dropping the future returned by
/// `analyze` aborts every in-flight analyst task.
pub struct AgentPool {
    registry: AgentRegistry,
    per_agent_timeout: Duration,
    max_concurrency: usize,
}

impl AgentPool {
    pub fn new(registry: AgentRegistry, per_agent_timeout: Duration, max_concurrency: usize) -> Self {
        Self {
            registry,
            per_agent_timeout,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn from_config(registry: AgentRegistry, config: &AgentsConfig) -> Self {
        Self::new(
            registry,
            Duration::from_secs(config.per_agent_timeout_seconds),
            config.max_concurrency,
        )
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// One result per registered analyst, in registry order.
    pub async fn analyze(&self, snapshot: &MarketSnapshot) -> Vec<AnalysisResult> {
        let start = Instant::now();
        let snapshot = Arc::new(snapshot.clone());
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let timeout = self.per_agent_timeout;

        let mut tasks = JoinSet::new();
        for (index, (kind, analyst)) in self.registry.iter().enumerate() {
            let kind = *kind;
            let analyst = Arc::clone(analyst);
            let snapshot = Arc::clone(&snapshot);
            let permits = Arc::clone(&permits);

            tasks.spawn(async move {
                // Never closed, so acquisition cannot fail.
                let _permit = permits.acquire_owned().await.ok();
                let agent_start = Instant::now();
                let outcome = tokio::time::timeout(timeout, analyst.analyze(&snapshot)).await;
                let elapsed_ms = agent_start.elapsed().as_millis() as u64;
                let name = analyst.name().to_string();

                let result = match outcome {
                    Ok(Ok(analysis)) => AnalysisResult::success(
                        kind,
                        &name,
                        analysis.verdict,
                        analysis.confidence,
                        analysis.rationale,
                        elapsed_ms,
                    )
                    .unwrap_or_else(|e| {
                        AnalysisResult::failed(kind, &name, AgentFailureKind::Failure, e.to_string(), elapsed_ms)
                    }),
                    Ok(Err(AgentError::Timeout(secs))) => AnalysisResult::failed(
                        kind,
                        &name,
                        AgentFailureKind::Timeout,
                        format!("timed out after {secs} seconds"),
                        elapsed_ms,
                    ),
                    Ok(Err(e)) => AnalysisResult::failed(
                        kind,
                        &name,
                        AgentFailureKind::Failure,
                        e.to_string(),
                        elapsed_ms,
                    ),
                    Err(_) => AnalysisResult::failed(
                        kind,
                        &name,
                        AgentFailureKind::Timeout,
                        format!("timed out after {} ms", timeout.as_millis()),
                        elapsed_ms,
                    ),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<AnalysisResult>> = vec![None; self.registry.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    match &result.failure {
                        None => info!(
                            agent = %result.agent_name,
                            symbol = %snapshot.symbol(),
                            verdict = %result.verdict,
                            confidence = %result.confidence,
                            elapsed_ms = result.elapsed_ms,
                            "Agent succeeded"
                        ),
                        Some(failure) => warn!(
                            agent = %result.agent_name,
                            symbol = %snapshot.symbol(),
                            kind = ?failure.kind,
                            error = %failure.message,
                            elapsed_ms = result.elapsed_ms,
                            "Agent failed"
                        ),
                    }
                    slots[index] = Some(result);
                }
                Err(e) => error!(error = %e, "Agent task panicked"),
            }
        }

        let results: Vec<AnalysisResult> = slots
            .into_iter()
            .zip(self.registry.iter())
            .map(|(slot, (kind, analyst))| {
                slot.unwrap_or_else(|| {
                    AnalysisResult::failed(
                        *kind,
                        analyst.name(),
                        AgentFailureKind::Failure,
                        "analysis task panicked",
                        0,
                    )
                })
            })
            .collect();

        info!(
            symbol = %snapshot.symbol(),
            agents = results.len(),
            viable = results.iter().filter(|r| r.is_viable()).count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Agent fan-out complete"
        );
        results
    }
}
