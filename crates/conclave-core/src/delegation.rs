//! Delegation queue
//!
//! Runs the delegation directives found in an agent's reply, one at a time in
//! FIFO order. Replies from delegates are scanned again, so delegates may
//! delegate further; repeats of an `(agent, prompt)` pair and anything beyond
//! the budget are dropped.

use crate::directives::{extract_delegation_directives, strip_delegation_blocks, DelegationDirective};
use crate::error::{Error, Result, WARNING_MARKER};
use crate::limits::RoundLimit;
use conclave_agents::{AgentSession, InvokeOptions};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a delegation was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    /// The delegate answered
    Completed,
    /// The target is unknown or unavailable; nothing was invoked
    Skipped,
    /// The invocation failed
    Failed,
}

/// Outcome of one delegation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationSummary {
    /// Target agent
    pub agent_id: String,
    /// Target display name
    pub agent_name: String,
    /// Prompt handed over
    pub prompt: String,
    /// Reply, or a warning when skipped or failed
    pub response: String,
    /// Resolution
    pub status: DelegationStatus,
}

/// Result of a queue run
#[derive(Debug, Clone, Default)]
pub struct DelegationOutcome {
    /// One summary per resolved directive, in processing order
    pub summaries: Vec<DelegationSummary>,
    /// Directives left unprocessed when the budget ran out
    pub dropped: usize,
    /// Initiating text with its delegation blocks removed
    pub visible_text: String,
}

/// Bounded, deduplicating delegation runner
pub struct DelegationQueue {
    session: Arc<dyn AgentSession>,
    self_agent_id: String,
    max_delegations: RoundLimit,
}

impl DelegationQueue {
    /// Queue delegating on behalf of `self_agent_id`
    pub fn new(session: Arc<dyn AgentSession>, self_agent_id: impl Into<String>) -> Self {
        Self {
            session,
            self_agent_id: self_agent_id.into().to_lowercase(),
            max_delegations: RoundLimit::Limited(8),
        }
    }

    /// Set the delegation budget
    #[must_use]
    pub fn with_budget(mut self, max_delegations: RoundLimit) -> Self {
        self.max_delegations = max_delegations;
        self
    }

    fn directives_in(&self, text: &str) -> Vec<DelegationDirective> {
        extract_delegation_directives(text)
            .into_iter()
            .filter(|d| d.agent_id != self.self_agent_id)
            .collect()
    }

    fn agent_name(&self, agent_id: &str) -> String {
        self.session
            .list_agents()
            .into_iter()
            .find(|a| a.id == agent_id)
            .map(|a| a.name)
            .unwrap_or_else(|| agent_id.to_string())
    }

    /// Run every directive in `initiating_text`, and those they lead to
    pub async fn run(
        &self,
        initiating_text: &str,
        cancel: &CancellationToken,
    ) -> Result<DelegationOutcome> {
        let mut pending: VecDeque<DelegationDirective> =
            self.directives_in(initiating_text).into();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut outcome = DelegationOutcome {
            visible_text: strip_delegation_blocks(initiating_text),
            ..Default::default()
        };

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if pending.is_empty() {
                break;
            }
            if !self.max_delegations.allows(outcome.summaries.len()) {
                outcome.dropped = pending.len();
                warn!(
                    dropped = outcome.dropped,
                    budget = %self.max_delegations,
                    "Delegation budget exhausted, dropping remaining directives"
                );
                break;
            }
            let Some(directive) = pending.pop_front() else {
                break;
            };

            if !seen.insert((directive.agent_id.clone(), directive.prompt.clone())) {
                debug!(agent_id = %directive.agent_id, "Dropping repeated delegation");
                continue;
            }

            if !self.session.has_agent(&directive.agent_id) {
                warn!(agent_id = %directive.agent_id, "Delegation target unavailable, skipping");
                outcome.summaries.push(DelegationSummary {
                    agent_name: directive.agent_id.clone(),
                    response: format!(
                        "{} Skipped: agent '{}' is not available.",
                        WARNING_MARKER, directive.agent_id
                    ),
                    agent_id: directive.agent_id,
                    prompt: directive.prompt,
                    status: DelegationStatus::Skipped,
                });
                continue;
            }

            let agent_name = self.agent_name(&directive.agent_id);
            let started = Instant::now();
            let result = self
                .session
                .invoke_agent(
                    &directive.agent_id,
                    &directive.prompt,
                    InvokeOptions::silent(cancel.clone()),
                )
                .await;

            let (response, status) = match result {
                Ok(reply) => {
                    info!(
                        agent_id = %directive.agent_id,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Delegation completed"
                    );
                    for next in self.directives_in(&reply.response) {
                        pending.push_back(next);
                    }
                    (reply.response, DelegationStatus::Completed)
                }
                Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                    return Err(Error::Cancelled);
                }
                Err(e) => {
                    warn!(agent_id = %directive.agent_id, error = %e, "Delegation failed");
                    (
                        format!("{} {} failed: {}", WARNING_MARKER, agent_name, e),
                        DelegationStatus::Failed,
                    )
                }
            };

            outcome.summaries.push(DelegationSummary {
                agent_id: directive.agent_id,
                agent_name,
                prompt: directive.prompt,
                response,
                status,
            });
        }

        Ok(outcome)
    }
}

/// Prompt feeding delegate replies back to the orchestrating agent
pub fn delegate_results_prompt(visible_text: &str, summaries: &[DelegationSummary]) -> String {
    let mut out = String::from("Results from the agents you delegated to:\n");
    for summary in summaries {
        out.push_str(&format!(
            "\n### {} ({})\nPrompt:\n{}\n\nResponse:\n{}\n",
            summary.agent_name, summary.agent_id, summary.prompt, summary.response
        ));
    }
    if !visible_text.is_empty() {
        out.push_str(&format!("\nYour previous message:\n{}\n", visible_text));
    }
    out.push_str(
        "\nContinue the original request using these results. Reply with the final answer, \
         or delegate again with <<<agent.<id> blocks if more work is needed.",
    );
    out
}
