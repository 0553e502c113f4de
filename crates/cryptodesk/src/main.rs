use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cryptodesk::agents::claude_cli::check_cli_available;
use cryptodesk::Credentials;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "cryptodesk",
    about = "Multi-agent crypto paper-trading desk"
)]
struct Cli {
    /// Path to configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run scheduled cycles for the configured symbols until Ctrl-C
    Run,
    /// Run a single cycle and print its record as JSON
    Cycle {
        #[arg(short, long)]
        symbol: String,

        /// Pretty-print the output JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Print the top symbols by market cap
    Rankings {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = cryptodesk::load_config(cli.config.as_deref())?;
    let credentials = Credentials::from_env();

    match cli.command {
        Command::Run => {
            let program = &config.agents.cli_program;
            if !check_cli_available(program).await {
                tracing::warn!(program = %program, "claude CLI not available; every analyst will fail");
            }
            let orchestrator = Arc::new(
                cryptodesk::build_orchestrator(&config, &credentials)
                    .context("Failed to build orchestrator")?,
            );
            let scheduler = cryptodesk::build_scheduler(&config, orchestrator);
            let cancel = scheduler.cancel_token();

            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Received shutdown signal");
                cancel.cancel();
            });

            scheduler.run().await;
        }
        Command::Cycle { symbol, pretty } => {
            let orchestrator = cryptodesk::build_orchestrator(&config, &credentials)
                .context("Failed to build orchestrator")?;
            let record = orchestrator.run_cycle(&symbol).await;

            let output = if pretty {
                serde_json::to_string_pretty(&record)?
            } else {
                serde_json::to_string(&record)?
            };
            println!("{output}");
        }
        Command::Rankings { limit } => {
            let gateway = cryptodesk::build_gateway(&config, &credentials)?;
            let symbols = gateway
                .top_symbols(limit)
                .await
                .map_err(|e| anyhow::anyhow!("Rankings unavailable: {e}"))?;
            println!("{}", serde_json::to_string(&symbols)?);
        }
    }

    Ok(())
}
