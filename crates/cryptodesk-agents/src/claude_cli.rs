use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::AgentError;

/// How to run the `claude` CLI for one analyst.
#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    /// Executable name or path.
    pub program: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            timeout: Duration::from_secs(45),
        }
    }
}

/// Run the CLI in print mode with a system prompt and user prompt, returning
/// stdout. The child is killed if the returned future is dropped, so an
/// abandoned analysis does not leave a process behind.
pub async fn invoke_claude(
    system_prompt: &str,
    user_prompt: &str,
    config: &ClaudeCliConfig,
) -> Result<String, AgentError> {
    debug!(program = %config.program, model = %config.model, "Invoking claude CLI");

    let child = Command::new(&config.program)
        .args(print_mode_args(system_prompt, user_prompt, &config.model))
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(config.timeout, child)
        .await
        .map_err(|_| AgentError::Timeout(config.timeout.as_secs()))?
        .map_err(|e| AgentError::Cli(format!("Failed to spawn {}: {e}", config.program)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(status = %output.status, stderr = %stderr.trim(), "Claude CLI failed");
        return Err(AgentError::Cli(format!(
            "{} exited {}: {}",
            config.program,
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if stdout.trim().is_empty() {
        return Err(AgentError::Cli("Claude returned empty response".to_string()));
    }

    Ok(stdout)
}

/// Non-interactive invocation: one prompt in, plain text out.
fn print_mode_args<'a>(system_prompt: &'a str, user_prompt: &'a str, model: &'a str) -> [&'a str; 8] {
    [
        "-p",
        user_prompt,
        "--system-prompt",
        system_prompt,
        "--model",
        model,
        "--output-format",
        "text",
    ]
}

/// True when `program --version` runs successfully.
pub async fn check_cli_available(program: &str) -> bool {
    match Command::new(program).arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}
