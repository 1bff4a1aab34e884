//! Scripted agent session for unit tests

use async_trait::async_trait;
use conclave_agents::{
    AgentDescriptor, AgentReply, AgentSession, Error as AgentError, InvokeOptions,
    Result as AgentResult, TokenUsage,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

type Script = VecDeque<AgentResult<String>>;

/// Agents answer from per-agent scripts; unscripted calls echo the prompt
pub struct ScriptedSession {
    main: String,
    agents: Vec<String>,
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<(String, String, bool)>>,
}

impl ScriptedSession {
    pub fn new(main: &str) -> Self {
        Self {
            main: main.to_string(),
            agents: vec![main.to_string()],
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_agent(mut self, id: &str) -> Self {
        self.agents.push(id.to_string());
        self
    }

    pub fn reply(self, id: &str, text: &str) -> Self {
        self.push(id, Ok(text.to_string()));
        self
    }

    pub fn fail(self, id: &str, error: AgentError) -> Self {
        self.push(id, Err(error));
        self
    }

    fn push(&self, id: &str, result: AgentResult<String>) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id.to_string())
            .or_default()
            .push_back(result);
    }

    /// `(agent_id, prompt, streaming)` per invocation
    pub fn calls(&self) -> Vec<(String, String, bool)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_to(&self, id: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(agent, _, _)| agent == id)
            .map(|(_, prompt, _)| prompt)
            .collect()
    }
}

#[async_trait]
impl AgentSession for ScriptedSession {
    fn main_agent_id(&self) -> &str {
        &self.main
    }

    async fn invoke_agent(
        &self,
        agent_id: &str,
        prompt: &str,
        options: InvokeOptions,
    ) -> AgentResult<AgentReply> {
        if options.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        if !self.has_agent(agent_id) {
            return Err(AgentError::AgentNotFound(agent_id.to_string()));
        }
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push((
            agent_id.to_string(),
            prompt.to_string(),
            options.streaming,
        ));

        let next = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(agent_id)
            .and_then(|s| s.pop_front());
        let text = match next {
            Some(result) => result?,
            None => format!("echo: {}", prompt),
        };

        let mut reply = AgentReply::new(agent_id, text);
        reply.usage = Some(TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            cached_input_tokens: 0,
        });
        Ok(reply)
    }

    fn list_agents(&self) -> Vec<AgentDescriptor> {
        self.agents
            .iter()
            .map(|id| AgentDescriptor {
                id: id.clone(),
                name: format!("{} agent", id),
                vendor: None,
            })
            .collect()
    }

    fn has_agent(&self, agent_id: &str) -> bool {
        self.agents.iter().any(|a| a == agent_id)
    }
}
