//! `exec` tool: run one command from a directive body
//!
//! The body is either a single command line (split with shell quoting rules,
//! never passed to a shell) or a JSON object `{"cmd", "args", "cwd", "timeout_ms"}`.

use crate::error::{Error, Result};
use crate::registry::{Tool, ToolDefinition, ToolResult};
use crate::runner::{CommandRunner, CommandSpec};
use crate::security;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// `exec` tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Allowed executables by basename; `None` allows anything not blocked
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,
    /// Time limit per command
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Cap on captured bytes per stream
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Working directory for commands without their own
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_max_output_bytes() -> usize {
    50 * 1024
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            allowlist: None,
            timeout_ms: default_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            cwd: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecRequest {
    cmd: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default, alias = "timeoutMs")]
    timeout_ms: Option<u64>,
}

/// Built-in command execution tool
pub struct ExecTool {
    definition: ToolDefinition,
    runner: Arc<dyn CommandRunner>,
    config: ExecConfig,
}

impl ExecTool {
    /// Create the tool over `runner`
    pub fn new(runner: Arc<dyn CommandRunner>, config: ExecConfig) -> Self {
        let definition = ToolDefinition::new(
            "exec",
            "Run one command without a shell and return its exit code and output.",
        )
        .with_usage("first body line is the command line, e.g. `cargo test --quiet`");
        Self {
            definition,
            runner,
            config,
        }
    }

    fn parse(&self, body: &str) -> Result<CommandSpec> {
        let trimmed = body.trim();
        let request = if trimmed.starts_with('{') {
            serde_json::from_str::<ExecRequest>(trimmed)
                .map_err(|e| Error::InvalidInput(format!("invalid exec payload: {}", e)))?
        } else {
            let line = trimmed
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .ok_or_else(|| Error::InvalidInput("empty command".to_string()))?;
            if let Some(c) = security::contains_shell_metacharacters(line) {
                return Err(Error::InvalidInput(format!(
                    "shell metacharacter '{}' is not supported; commands run without a shell",
                    c
                )));
            }
            let mut words = shell_words::split(line)
                .map_err(|e| Error::InvalidInput(format!("cannot parse command line: {}", e)))?
                .into_iter();
            let cmd = words
                .next()
                .ok_or_else(|| Error::InvalidInput("empty command".to_string()))?;
            ExecRequest {
                cmd,
                args: words.collect(),
                cwd: None,
                timeout_ms: None,
            }
        };

        if security::is_blocked(&request.cmd) {
            return Err(Error::PermissionDenied(format!(
                "'{}' is blocked",
                security::base_command(&request.cmd)
            )));
        }

        Ok(CommandSpec {
            cmd: request.cmd,
            args: request.args,
            cwd: request.cwd.or_else(|| self.config.cwd.clone()),
            timeout_ms: Some(request.timeout_ms.unwrap_or(self.config.timeout_ms)),
            allowlist: self.config.allowlist.clone(),
            max_output_bytes: Some(self.config.max_output_bytes),
        })
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, body: &str, cancel: &CancellationToken) -> Result<ToolResult> {
        let spec = self.parse(body)?;
        info!(command = %spec.display(), "exec tool");
        let output = self.runner.run(&spec, cancel).await?;

        let mut text = match output.exit_code {
            Some(code) => format!("exit code: {}\n", code),
            None => "exit code: none\n".to_string(),
        };
        let combined = output.combined();
        if !combined.is_empty() {
            text.push_str(&combined);
        }
        if output.stdout_truncated || output.stderr_truncated {
            text.push_str("\n[output truncated]");
        }

        if output.timed_out {
            warn!(command = %spec.display(), "exec tool timed out");
            Ok(ToolResult::failure(
                format!("timed out after {}ms", output.duration_ms),
                text,
                output.duration_ms,
            ))
        } else if output.success() {
            Ok(ToolResult::success(text, output.duration_ms))
        } else {
            Ok(ToolResult::failure(
                "command exited unsuccessfully",
                text,
                output.duration_ms,
            ))
        }
    }
}
