use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::Orchestrator;

/// Drives periodic cycles for a fixed set of symbols until cancelled.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    symbols: Vec<String>,
    interval: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, symbols: Vec<String>, interval: Duration) -> Self {
        Self {
            orchestrator,
            symbols,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a CancellationToken that can be used to trigger shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled. One loop per symbol; a cycle that is already
    /// running when shutdown is requested finishes first.
    pub async fn run(&self) {
        tracing::info!(
            symbols = ?self.symbols,
            interval_secs = self.interval.as_secs(),
            "Scheduler starting"
        );

        let mut join_set = JoinSet::new();
        for symbol in &self.symbols {
            let orchestrator = self.orchestrator.clone();
            let cancel = self.cancel.clone();
            let symbol = symbol.clone();
            let interval = self.interval;
            join_set.spawn(async move {
                symbol_loop(orchestrator, symbol, interval, cancel).await;
            });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Symbol loop terminated abnormally");
            }
        }

        tracing::info!("Scheduler stopped");
    }
}

/// Cycles for one symbol, strictly sequential, `interval` apart start to start.
async fn symbol_loop(
    orchestrator: Arc<Orchestrator>,
    symbol: String,
    interval: Duration,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        let started = Instant::now();
        let record = orchestrator.run_cycle(&symbol).await;
        tracing::debug!(symbol = %symbol, cycle_id = %record.cycle_id, "Scheduled cycle finished");

        let wait = interval.saturating_sub(started.elapsed());
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(symbol = %symbol, "Symbol loop shutting down");
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
