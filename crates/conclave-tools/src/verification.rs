//! Verification commands
//!
//! A task's acceptance is checked by running commands and matching their exit
//! code and output against expectations. Every input command yields exactly
//! one result, in input order, whatever happens to the others.

use crate::cancel::ensure_active;
use crate::error::Result;
use crate::pool::run_bounded;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A command plus what its run must look like
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationCommand {
    /// Executable
    pub cmd: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Time limit; the verifier default applies when unset
    #[serde(default, alias = "timeoutMs")]
    pub timeout_ms: Option<u64>,
    /// Required exit code
    #[serde(default, alias = "expectExitCode")]
    pub expect_exit_code: Option<i32>,
    /// Substring that must appear in stdout+stderr
    #[serde(default, alias = "expectOutputContains")]
    pub expect_output_contains: Option<String>,
    /// Substring that must not appear in stdout+stderr
    #[serde(default, alias = "expectOutputNotContains")]
    pub expect_output_not_contains: Option<String>,
    /// Regex that must match stdout+stderr
    #[serde(default, alias = "expectOutputRegex")]
    pub expect_output_regex: Option<String>,
}

impl VerificationCommand {
    /// Command expecting exit code 0
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            expect_exit_code: Some(0),
            ..Default::default()
        }
    }

    /// Set arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Require an exit code
    #[must_use]
    pub fn expect_exit_code(mut self, code: i32) -> Self {
        self.expect_exit_code = Some(code);
        self
    }

    /// Require a substring
    #[must_use]
    pub fn expect_contains(mut self, needle: impl Into<String>) -> Self {
        self.expect_output_contains = Some(needle.into());
        self
    }

    /// Forbid a substring
    #[must_use]
    pub fn expect_not_contains(mut self, needle: impl Into<String>) -> Self {
        self.expect_output_not_contains = Some(needle.into());
        self
    }

    /// Require a regex match
    #[must_use]
    pub fn expect_regex(mut self, pattern: impl Into<String>) -> Self {
        self.expect_output_regex = Some(pattern.into());
        self
    }

    /// `cmd args...`
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.cmd.clone()
        } else {
            format!("{} {}", self.cmd, self.args.join(" "))
        }
    }
}

/// Outcome of one verification command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// `cmd args...`
    pub command: String,
    /// All expectations held
    pub ok: bool,
    /// Exit code, when the process ran and exited
    pub exit_code: Option<i32>,
    /// Terminating signal
    pub signal: Option<i32>,
    /// Killed by the time limit
    pub timed_out: bool,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// stdout exceeded the cap
    pub stdout_truncated: bool,
    /// stderr exceeded the cap
    pub stderr_truncated: bool,
    /// Failure reasons and remarks
    pub notes: Vec<String>,
    /// Never ran because verification or execution is switched off
    #[serde(default)]
    pub skipped: bool,
}

impl VerificationResult {
    fn skipped(command: &VerificationCommand, note: &str) -> Self {
        Self {
            skipped: true,
            ..Self::rejected(command, note)
        }
    }

    fn rejected(command: &VerificationCommand, note: impl Into<String>) -> Self {
        Self {
            command: command.display(),
            ok: false,
            exit_code: None,
            signal: None,
            timed_out: false,
            duration_ms: 0,
            stdout_truncated: false,
            stderr_truncated: false,
            notes: vec![note.into()],
            skipped: false,
        }
    }

    /// Ran and missed an expectation
    pub fn is_failure(&self) -> bool {
        !self.ok && !self.skipped
    }
}

/// Verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Verification is enabled at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Spawning processes is permitted
    #[serde(default = "default_true")]
    pub allow_exec: bool,
    /// Allowed executables by basename; `None` allows everything
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,
    /// Time limit for commands without their own
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Cap on captured bytes per stream
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Commands run concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

fn default_concurrency() -> usize {
    2
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_exec: true,
            allowlist: None,
            default_timeout_ms: default_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            concurrency: default_concurrency(),
        }
    }
}

/// Runs verification commands through a [`CommandRunner`]
pub struct Verifier {
    runner: Arc<dyn CommandRunner>,
    config: VerificationConfig,
}

impl Verifier {
    /// Create a verifier
    pub fn new(runner: Arc<dyn CommandRunner>, config: VerificationConfig) -> Self {
        Self { runner, config }
    }

    /// Current settings
    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Run every command; one result per command, in input order.
    ///
    /// Only an already-fired or mid-run cancellation is an error.
    pub async fn run(
        &self,
        commands: &[VerificationCommand],
        cancel: &CancellationToken,
    ) -> Result<Vec<VerificationResult>> {
        ensure_active(cancel)?;

        if !self.config.enabled || !self.config.allow_exec {
            let note = if self.config.enabled {
                "command execution is not allowed"
            } else {
                "verification is disabled"
            };
            debug!(count = commands.len(), note, "Skipping verification");
            return Ok(commands
                .iter()
                .map(|c| VerificationResult::skipped(c, note))
                .collect());
        }

        let results = run_bounded(commands, self.config.concurrency, |index, command| {
            let command = command.clone();
            async move { self.run_one(index, &command, cancel).await }
        })
        .await;
        ensure_active(cancel)?;

        let passed = results.iter().filter(|r| r.ok).count();
        info!(passed, total = results.len(), "Verification finished");
        Ok(results)
    }

    async fn run_one(
        &self,
        index: usize,
        command: &VerificationCommand,
        cancel: &CancellationToken,
    ) -> VerificationResult {
        let spec = CommandSpec {
            cmd: command.cmd.clone(),
            args: command.args.clone(),
            cwd: command.cwd.clone(),
            timeout_ms: Some(command.timeout_ms.unwrap_or(self.config.default_timeout_ms)),
            allowlist: self.config.allowlist.clone(),
            max_output_bytes: Some(self.config.max_output_bytes),
        };

        match self.runner.run(&spec, cancel).await {
            Ok(output) => evaluate(command, &output),
            Err(e) => {
                warn!(index, command = %command.display(), error = %e, "Verification command failed to run");
                VerificationResult::rejected(command, e.to_string())
            }
        }
    }
}

/// Check `output` against the expectations of `command`
pub fn evaluate(command: &VerificationCommand, output: &CommandOutput) -> VerificationResult {
    let mut notes = Vec::new();
    let mut ok = true;
    let expected = command.expect_exit_code.unwrap_or(0);

    if output.timed_out {
        ok = false;
        notes.push(format!("timed out after {}ms", output.duration_ms));
    } else if output.exit_code != Some(expected) {
        ok = false;
        match (output.exit_code, output.signal) {
            (Some(code), _) => notes.push(format!("expected exit code {}, got {}", expected, code)),
            (None, Some(signal)) => notes.push(format!("terminated by signal {}", signal)),
            (None, None) => notes.push("process did not report an exit code".to_string()),
        }
    }

    let combined = output.combined();
    if let Some(needle) = &command.expect_output_contains {
        if !combined.contains(needle.as_str()) {
            ok = false;
            notes.push(format!("output does not contain '{}'", needle));
        }
    }
    if let Some(needle) = &command.expect_output_not_contains {
        if combined.contains(needle.as_str()) {
            ok = false;
            notes.push(format!("output contains forbidden '{}'", needle));
        }
    }
    if let Some(pattern) = &command.expect_output_regex {
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(&combined) => {
                ok = false;
                notes.push(format!("output does not match /{}/", pattern));
            }
            Ok(_) => {}
            Err(e) => notes.push(format!("skipped invalid regex /{}/: {}", pattern, e)),
        }
    }

    if output.stdout_truncated || output.stderr_truncated {
        notes.push("output truncated".to_string());
    }

    VerificationResult {
        command: command.display(),
        ok,
        exit_code: output.exit_code,
        signal: output.signal,
        timed_out: output.timed_out,
        duration_ms: output.duration_ms,
        stdout_truncated: output.stdout_truncated,
        stderr_truncated: output.stderr_truncated,
        notes,
        skipped: false,
    }
}

/// Markdown-ish report suitable for feeding back to an agent
pub fn format_report(results: &[VerificationResult]) -> String {
    if results.is_empty() {
        return "No verification commands.".to_string();
    }
    let passed = results.iter().filter(|r| r.ok).count();
    let skipped = results.iter().filter(|r| r.skipped).count();
    let mut out = format!("Verification: {}/{} passed", passed, results.len() - skipped);
    if skipped > 0 {
        out.push_str(&format!(" ({} skipped)", skipped));
    }
    out.push('\n');
    for result in results {
        let mark = match (result.ok, result.skipped) {
            (true, _) => "✅",
            (false, true) => "⏭️",
            (false, false) => "❌",
        };
        out.push_str(&format!("{} `{}`", mark, result.command));
        if let Some(code) = result.exit_code {
            out.push_str(&format!(" (exit {})", code));
        }
        out.push('\n');
        for note in &result.notes {
            out.push_str(&format!("   - {}\n", note));
        }
    }
    out
}

#[cfg(test)]
mod tests;
