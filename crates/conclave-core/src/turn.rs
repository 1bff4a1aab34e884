//! Collaborative turn engine
//!
//! One turn keeps calling the main agent until it produces a final answer:
//! tool directives are executed and their results fed back, delegation
//! directives are run through the [`DelegationQueue`] and summarized back, and
//! a reply that is nothing but a verdict payload is asked again.

use crate::delegation::{delegate_results_prompt, DelegationQueue, DelegationSummary};
use crate::directives::{
    extract_delegation_directives, extract_tool_directives, looks_like_supervisor_verdict,
    strip_delegation_blocks, strip_tool_blocks, ToolDirective,
};
use crate::error::{Error, Result, WARNING_MARKER};
use crate::limits::TurnLimits;
use async_trait::async_trait;
use conclave_agents::{AgentSession, TokenUsage};
use conclave_tools::{ToolRegistry, ToolResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs tool directives
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invoke `name` with the directive body
    async fn invoke(
        &self,
        name: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> conclave_tools::Result<ToolResult>;

    /// Prompt section describing the available tools
    fn describe(&self) -> String;
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(
        &self,
        name: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> conclave_tools::Result<ToolResult> {
        ToolRegistry::invoke(self, name, body, cancel).await
    }

    fn describe(&self) -> String {
        ToolRegistry::describe(self)
    }
}

/// Outcome of a turn
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    /// Final answer with directive blocks removed
    pub response: String,
    /// Every delegation made during the turn, in order
    pub delegations: Vec<DelegationSummary>,
    /// Delegation rounds used
    pub supervisor_rounds: usize,
    /// Tool rounds used
    pub tool_rounds: usize,
    /// Main agent usage summed over the turn
    pub usage: TokenUsage,
}

/// Drives collaborative turns against a session's main agent
pub struct TurnEngine {
    session: Arc<dyn AgentSession>,
    tools: Arc<dyn ToolInvoker>,
    limits: TurnLimits,
    verdict_retry_delay: Duration,
    preamble: bool,
}

impl TurnEngine {
    /// Create an engine
    pub fn new(session: Arc<dyn AgentSession>, tools: Arc<dyn ToolInvoker>, limits: TurnLimits) -> Self {
        Self {
            session,
            tools,
            limits,
            verdict_retry_delay: Duration::from_millis(500),
            preamble: true,
        }
    }

    /// Delay before re-asking after a verdict-only reply
    #[must_use]
    pub fn with_verdict_retry_delay(mut self, delay: Duration) -> Self {
        self.verdict_retry_delay = delay;
        self
    }

    /// Whether to prefix the first prompt with the directive instructions
    #[must_use]
    pub fn with_preamble(mut self, enabled: bool) -> Self {
        self.preamble = enabled;
        self
    }

    /// Budgets in effect
    pub fn limits(&self) -> &TurnLimits {
        &self.limits
    }

    /// The session this engine drives
    pub fn session(&self) -> &Arc<dyn AgentSession> {
        &self.session
    }

    /// Directive instructions for the main agent
    pub fn protocol_preamble(&self) -> String {
        let main = self.session.main_agent_id();
        let mut out = String::new();

        let agents: Vec<_> = self
            .session
            .list_agents()
            .into_iter()
            .filter(|a| a.id != main)
            .collect();
        if !agents.is_empty() && !self.limits.max_supervisor_rounds.is_disabled() {
            out.push_str("You can delegate work to other agents. Write a block like:\n<<<agent.<id>\n<prompt>\n>>>\nAvailable agents:\n");
            for agent in agents {
                out.push_str(&format!("- {}: {}\n", agent.id, agent.name));
            }
            out.push('\n');
        }

        let tools = self.tools.describe();
        if !tools.is_empty() && !self.limits.max_tool_rounds.is_disabled() {
            out.push_str("You can run tools. Write a block like:\n<<<tool.<name>\n<input>\n>>>\nAvailable tools:\n");
            out.push_str(&tools);
            out.push('\n');
        }
        out
    }

    /// Run one turn for `input`
    pub async fn run(&self, input: &str, cancel: &CancellationToken) -> Result<TurnResult> {
        let main = self.session.main_agent_id().to_string();
        let started = Instant::now();
        let mut result = TurnResult::default();
        let mut verdict_retries = 0usize;

        let mut prompt = if self.preamble {
            let preamble = self.protocol_preamble();
            if preamble.is_empty() {
                input.to_string()
            } else {
                format!("{}User request:\n{}", preamble, input)
            }
        } else {
            input.to_string()
        };

        info!(agent_id = %main, "Turn started");
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let reply = self.session.send(&prompt, cancel).await.map_err(|e| {
                if e.is_cancelled() {
                    Error::Cancelled
                } else {
                    Error::Agent(e)
                }
            })?;
            if let Some(usage) = &reply.usage {
                result.usage.accumulate(usage);
            }
            let text = reply.response;

            let tool_calls = extract_tool_directives(&text);
            if !tool_calls.is_empty() && self.limits.max_tool_rounds.allows(result.tool_rounds) {
                result.tool_rounds += 1;
                debug!(round = result.tool_rounds, count = tool_calls.len(), "Tool round");
                let outputs = self.run_tools(&tool_calls, cancel).await?;
                prompt = tool_results_prompt(&strip_tool_blocks(&text), &outputs);
                continue;
            }

            let has_delegations = extract_delegation_directives(&text)
                .iter()
                .any(|d| d.agent_id != main);
            let budget = self
                .limits
                .max_delegations
                .remaining(result.delegations.len());
            if has_delegations
                && !budget.is_disabled()
                && self.limits.max_supervisor_rounds.allows(result.supervisor_rounds)
            {
                result.supervisor_rounds += 1;
                debug!(round = result.supervisor_rounds, "Delegation round");
                let outcome = DelegationQueue::new(self.session.clone(), main.as_str())
                    .with_budget(budget)
                    .run(&text, cancel)
                    .await?;
                prompt = delegate_results_prompt(&outcome.visible_text, &outcome.summaries);
                result.delegations.extend(outcome.summaries);
                continue;
            }

            if looks_like_supervisor_verdict(&text) {
                if verdict_retries < self.limits.max_verdict_retries {
                    verdict_retries += 1;
                    warn!(retry = verdict_retries, "Main agent replied with a bare verdict, asking again");
                    conclave_tools::sleep(self.verdict_retry_delay, cancel).await?;
                    continue;
                }
                warn!("Verdict retries exhausted, returning reply as is");
            }

            result.response = strip_tool_blocks(&strip_delegation_blocks(&text));
            info!(
                agent_id = %main,
                tool_rounds = result.tool_rounds,
                supervisor_rounds = result.supervisor_rounds,
                delegations = result.delegations.len(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Turn finished"
            );
            return Ok(result);
        }
    }

    async fn run_tools(
        &self,
        calls: &[ToolDirective],
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, String)>> {
        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let text = match self.tools.invoke(&call.name, &call.body, cancel).await {
                Ok(r) if r.success => r.output,
                Ok(r) => format!(
                    "{} {} failed: {}\n{}",
                    WARNING_MARKER,
                    call.name,
                    r.error.unwrap_or_else(|| "unknown error".to_string()),
                    r.output
                )
                .trim_end()
                .to_string(),
                Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool call failed");
                    format!("{} {} failed: {}", WARNING_MARKER, call.name, e)
                }
            };
            outputs.push((call.name.clone(), text));
        }
        Ok(outputs)
    }
}

/// Prompt feeding tool outputs back to the agent that asked for them
pub fn tool_results_prompt(visible_text: &str, outputs: &[(String, String)]) -> String {
    let mut out = String::from("Tool results:\n");
    for (name, output) in outputs {
        out.push_str(&format!("\n[tool.{}]\n{}\n", name, output));
    }
    if !visible_text.is_empty() {
        out.push_str(&format!("\nYour previous message:\n{}\n", visible_text));
    }
    out.push_str("\nContinue with the original request using these results.");
    out
}
