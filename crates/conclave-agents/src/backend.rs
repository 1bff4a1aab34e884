//! Agent backends
//!
//! A backend owns one vendor CLI. Each invocation spawns the process, pipes
//! its stdout line by line through the vendor's [`StreamParser`], and reports
//! the final message once the stream settles.

use crate::error::{Error, Result};
use crate::events::{AgentEvent, TokenUsage};
use crate::parser::Vendor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Max stderr kept for error reports
const MAX_STDERR_BYTES: usize = 8 * 1024;

/// Reply from a single agent invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    /// Agent that produced the reply
    pub agent_id: String,
    /// Final reply text
    pub response: String,
    /// Token usage, when the backend reports it
    pub usage: Option<TokenUsage>,
    /// Backend session id, when the backend reports it
    pub session_id: Option<String>,
}

impl AgentReply {
    /// Create a reply with no usage or session
    pub fn new(agent_id: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            response: response.into(),
            usage: None,
            session_id: None,
        }
    }
}

/// Receiver for normalized events during an invocation
pub trait EventSink: Send + Sync {
    /// Called once per event, in stream order
    fn emit(&self, agent_id: &str, event: &AgentEvent);
}

/// One invocable agent
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Stable lower-case id
    fn id(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    /// Vendor, for process-backed agents
    fn vendor(&self) -> Option<Vendor> {
        None
    }

    /// Whether the backend can run right now
    async fn is_available(&self) -> bool;

    /// Run one prompt to completion
    async fn invoke(
        &self,
        prompt: &str,
        events: Option<&dyn EventSink>,
        cancel: &CancellationToken,
    ) -> Result<AgentReply>;
}

/// Configuration of a process-backed agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent id (normalized to lower case)
    pub id: String,
    /// Display name, defaults to the id
    #[serde(default)]
    pub name: Option<String>,
    /// Stream dialect spoken by the CLI
    pub vendor: Vendor,
    /// Executable, defaults to the vendor's CLI name
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments; `{prompt}` is substituted, vendor defaults when empty
    #[serde(default)]
    pub args: Vec<String>,
    /// Arguments used when a previous session can be resumed;
    /// `{session}` and `{prompt}` are substituted
    #[serde(default)]
    pub resume_args: Option<Vec<String>>,
    /// Environment variables; `${VAR}` values are expanded
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-invocation time limit in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Working directory for the process
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    600
}

impl AgentConfig {
    /// Config with vendor defaults
    pub fn new(id: impl Into<String>, vendor: Vendor) -> Self {
        Self {
            id: id.into().to_lowercase(),
            name: None,
            vendor,
            command: None,
            args: Vec::new(),
            resume_args: None,
            env: HashMap::new(),
            timeout_secs: default_timeout_secs(),
            workdir: None,
        }
    }

    /// Override the executable
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Override the argument template
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Set the time limit
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Executable to spawn
    pub fn program(&self) -> &str {
        self.command
            .as_deref()
            .unwrap_or_else(|| self.vendor.default_command())
    }

    /// Resolve the argument list for one invocation
    pub fn build_args(&self, prompt: &str, session: Option<&str>) -> Vec<String> {
        let resume = session.and_then(|s| {
            let template = self
                .resume_args
                .clone()
                .unwrap_or_else(|| self.vendor.default_resume_args());
            (!template.is_empty()).then_some((template, s))
        });

        let (template, session) = match resume {
            Some((template, s)) => (template, Some(s)),
            None if self.args.is_empty() => (self.vendor.default_args(), None),
            None => (self.args.clone(), None),
        };

        let mut has_prompt = false;
        let mut args: Vec<String> = template
            .iter()
            .map(|arg| {
                if arg.contains("{prompt}") {
                    has_prompt = true;
                }
                let arg = arg.replace("{prompt}", prompt);
                match session {
                    Some(s) => arg.replace("{session}", s),
                    None => arg,
                }
            })
            .collect();
        if !has_prompt {
            args.push(prompt.to_string());
        }
        args
    }
}

fn expand_env(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).unwrap_or_default()
    } else {
        value.to_string()
    }
}

/// Backend that spawns a vendor CLI per invocation
pub struct CliAgentBackend {
    config: AgentConfig,
    session: Mutex<Option<String>>,
}

impl CliAgentBackend {
    /// Create a backend from its config
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Backend configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Session id remembered from the last invocation
    pub fn session_id(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Forget the remembered session
    pub fn reset_session(&self) {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn command(&self, prompt: &str) -> Command {
        let session = self.session_id();
        let mut cmd = Command::new(self.config.program());
        cmd.args(self.config.build_args(prompt, session.as_deref()));
        for (key, value) in &self.config.env {
            cmd.env(key, expand_env(value));
        }
        if let Some(dir) = &self.config.workdir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AgentBackend for CliAgentBackend {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or(&self.config.id)
    }

    fn vendor(&self) -> Option<Vendor> {
        Some(self.config.vendor)
    }

    async fn is_available(&self) -> bool {
        which::which(self.config.program()).is_ok()
    }

    async fn invoke(
        &self,
        prompt: &str,
        events: Option<&dyn EventSink>,
        cancel: &CancellationToken,
    ) -> Result<AgentReply> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let agent_id = self.config.id.clone();
        let started = Instant::now();
        debug!(agent_id = %agent_id, command = %self.config.program(), "Spawning agent");

        let mut child = self
            .command(prompt)
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {}", self.config.program(), e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Spawn("failed to capture stderr".to_string()))?;

        let stderr_task = tokio::spawn(read_capped(stderr, MAX_STDERR_BYTES));

        let mut parser = self.config.vendor.parser();
        let mut lines = BufReader::new(stdout).lines();
        let deadline = tokio::time::sleep(Duration::from_secs(self.config.timeout_secs));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    info!(agent_id = %agent_id, "Agent invocation cancelled");
                    return Err(Error::Cancelled);
                }
                _ = &mut deadline => {
                    let _ = child.kill().await;
                    warn!(agent_id = %agent_id, timeout_secs = self.config.timeout_secs, "Agent timed out");
                    return Err(Error::Timeout(self.config.timeout_secs));
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        for event in parser.parse_raw(&line) {
                            if let Some(sink) = events {
                                sink.emit(&agent_id, &event);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = child.kill().await;
                        return Err(Error::Io(e));
                    }
                }
            }
        }

        let waited = tokio::select! {
            _ = cancel.cancelled() => None,
            _ = &mut deadline => Some(None),
            status = child.wait() => Some(Some(status)),
        };
        let status = match waited {
            None => {
                let _ = child.kill().await;
                return Err(Error::Cancelled);
            }
            Some(None) => {
                let _ = child.kill().await;
                return Err(Error::Timeout(self.config.timeout_secs));
            }
            Some(Some(status)) => status?,
        };
        let stderr = stderr_task.await.unwrap_or_default();

        if let Some(session) = parser.session_id() {
            *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.to_string());
        }

        if let Some(message) = parser.last_error() {
            return Err(Error::Backend {
                agent_id,
                message: message.to_string(),
            });
        }

        let response = parser.final_message();
        if !status.success() && response.is_none() {
            return Err(Error::ExitStatus {
                agent_id,
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        info!(
            agent_id = %agent_id,
            duration_ms = started.elapsed().as_millis() as u64,
            "Agent invocation finished"
        );

        Ok(AgentReply {
            agent_id,
            response: response.unwrap_or_default(),
            usage: parser.usage(),
            session_id: parser.session_id().map(String::from),
        })
    }
}

/// Drain `reader`, keeping at most `limit` bytes
async fn read_capped<R>(mut reader: R, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}
