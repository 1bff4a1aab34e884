//! Command runner
//!
//! Runs one external command with captured, size-capped output. Non-zero exits
//! and timeouts are reported in [`CommandOutput`]; only failures to start the
//! process (denied, missing, spawn error) or caller cancellation are errors.

use crate::cancel::{ensure_active, TimeoutScope};
use crate::error::{Error, Result};
use crate::security;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default cap on captured bytes per stream
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 256 * 1024;

/// How long to wait for pipes to drain after killing a timed-out process
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Command to run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable name or path
    pub cmd: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Time limit in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Allowed executables by basename; `None` allows everything
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,
    /// Cap on captured bytes per stream
    #[serde(default)]
    pub max_output_bytes: Option<usize>,
}

impl CommandSpec {
    /// Create a spec for `cmd`
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
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

    /// Set working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set time limit
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Restrict executables
    #[must_use]
    pub fn with_allowlist(mut self, allowlist: Option<Vec<String>>) -> Self {
        self.allowlist = allowlist;
        self
    }

    /// Cap captured output
    #[must_use]
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = Some(max);
        self
    }

    /// `cmd args...` for logs and notes
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.cmd.clone()
        } else {
            format!("{} {}", self.cmd, self.args.join(" "))
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Terminating signal, on unix
    pub signal: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// When the process was started
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// Whether the time limit killed the process
    pub timed_out: bool,
    /// stdout exceeded the cap
    pub stdout_truncated: bool,
    /// stderr exceeded the cap
    pub stderr_truncated: bool,
}

impl CommandOutput {
    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }

    /// Exited on its own with code 0
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Executes external commands
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion or until `cancel` fires
    async fn run(&self, spec: &CommandSpec, cancel: &CancellationToken) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by real processes
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    default_max_output_bytes: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    /// Runner with the default output cap
    pub fn new() -> Self {
        Self {
            default_max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Runner with a custom default output cap
    #[must_use]
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.default_max_output_bytes = max;
        self
    }

    fn resolve(&self, spec: &CommandSpec) -> Result<PathBuf> {
        if spec.cmd.trim().is_empty() {
            return Err(Error::InvalidInput("empty command".to_string()));
        }
        if !security::is_allowed(spec.allowlist.as_deref(), &spec.cmd) {
            return Err(Error::PermissionDenied(format!(
                "'{}' is not in the allowlist",
                security::base_command(&spec.cmd)
            )));
        }
        let found = match &spec.cwd {
            Some(cwd) if spec.cmd.contains('/') => {
                which::which_in(&spec.cmd, std::env::var_os("PATH"), cwd)
            }
            _ => which::which(&spec.cmd),
        };
        found.map_err(|_| Error::NotFound(format!("executable '{}' not found", spec.cmd)))
    }
}

async fn capture<R>(mut reader: R, limit: usize) -> (String, bool)
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    (String::from_utf8_lossy(&kept).into_owned(), truncated)
}

async fn collect(handle: Option<JoinHandle<(String, bool)>>, grace: Option<Duration>) -> (String, bool) {
    let Some(handle) = handle else {
        return (String::new(), false);
    };
    match grace {
        None => handle.await.unwrap_or_default(),
        Some(grace) => {
            let abort = handle.abort_handle();
            match tokio::time::timeout(grace, handle).await {
                Ok(result) => result.unwrap_or_default(),
                Err(_) => {
                    abort.abort();
                    (String::new(), true)
                }
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec, cancel: &CancellationToken) -> Result<CommandOutput> {
        ensure_active(cancel)?;
        let program = self.resolve(spec)?;
        let limit = spec
            .max_output_bytes
            .unwrap_or(self.default_max_output_bytes);

        let mut cmd = Command::new(&program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        debug!(command = %spec.display(), "Running command");
        let started_at = Utc::now();
        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Execution(format!("{}: {}", spec.cmd, e)))?;

        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(capture(out, limit)));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(capture(err, limit)));

        let scope = TimeoutScope::new(cancel, spec.timeout_ms.map(Duration::from_millis));
        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = scope.cancelled() => None,
        };

        let (status, timed_out) = match waited {
            Some(status) => (status?, false),
            None => {
                let _ = child.kill().await;
                if !scope.timed_out() {
                    return Err(Error::Cancelled);
                }
                warn!(command = %spec.display(), timeout_ms = ?spec.timeout_ms, "Command timed out");
                (child.wait().await?, true)
            }
        };
        drop(scope);

        let grace = timed_out.then_some(DRAIN_GRACE);
        let (stdout, stdout_truncated) = collect(stdout, grace).await;
        let (stderr, stderr_truncated) = collect(stderr, grace).await;

        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Ok(CommandOutput {
            exit_code: status.code(),
            signal,
            stdout,
            stderr,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            timed_out,
            stdout_truncated,
            stderr_truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder() {
        let spec = CommandSpec::new("cargo")
            .with_args(["test", "--quiet"])
            .with_timeout_ms(1000)
            .with_allowlist(Some(vec!["cargo".to_string()]));
        assert_eq!(spec.display(), "cargo test --quiet");
        assert_eq!(spec.timeout_ms, Some(1000));
    }

    #[test]
    fn test_combined_output() {
        let output = CommandOutput {
            exit_code: Some(0),
            signal: None,
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            started_at: Utc::now(),
            duration_ms: 1,
            timed_out: false,
            stdout_truncated: false,
            stderr_truncated: false,
        };
        assert_eq!(output.combined(), "out\nerr");
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_denied_command_never_spawns() {
        let runner = ProcessRunner::new();
        let spec = CommandSpec::new("false").with_allowlist(Some(vec!["echo".to_string()]));
        let err = runner
            .run(&spec, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_missing_executable_fails_fast() {
        let runner = ProcessRunner::new();
        let spec = CommandSpec::new("definitely-not-a-real-binary-42");
        let err = runner
            .run(&spec, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancelled_token_fails_before_spawn() {
        let runner = ProcessRunner::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runner
            .run(&CommandSpec::new("true"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let runner = ProcessRunner::new();
        let output = runner
            .run(
                &CommandSpec::new("echo").with_args(["hello"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout.trim(), "hello");
        assert!(!output.timed_out);

        let output = runner
            .run(&CommandSpec::new("false"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(1));
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_truncates_large_output() {
        let runner = ProcessRunner::new();
        let output = runner
            .run(
                &CommandSpec::new("echo")
                    .with_args(["hello world"])
                    .with_max_output_bytes(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello");
        assert!(output.stdout_truncated);
        assert!(!output.stderr_truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_reported_not_raised() {
        let runner = ProcessRunner::new();
        let output = runner
            .run(
                &CommandSpec::new("sleep").with_args(["5"]).with_timeout_ms(50),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(output.timed_out);
        assert!(output.duration_ms < 5000);
        assert!(!output.success());
    }
}
