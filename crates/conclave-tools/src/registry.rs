//! Registry - Tool registration and invocation
//!
//! Agents call tools through `<<<tool.<name>` directives whose body is handed
//! verbatim to the tool. The registry maps names to implementations.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Tool metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (directive suffix)
    pub name: String,
    /// What the tool does, shown to agents
    pub description: String,
    /// Body format hint, shown to agents
    pub usage: String,
    /// Whether the tool can be invoked
    pub enabled: bool,
}

impl ToolDefinition {
    /// Create a definition
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            usage: String::new(),
            enabled: true,
        }
    }

    /// Set the usage hint
    #[must_use]
    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    /// Enable or disable
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Result of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool succeeded
    pub success: bool,
    /// Output text
    pub output: String,
    /// Error message, if failed
    pub error: Option<String>,
    /// Execution duration
    pub duration_ms: u64,
}

impl ToolResult {
    /// Successful result
    #[must_use]
    pub fn success(output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            duration_ms,
        }
    }

    /// Failed result, optionally carrying output
    #[must_use]
    pub fn failure(error: impl Into<String>, output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// A tool callable from a directive
#[async_trait]
pub trait Tool: Send + Sync {
    /// Metadata
    fn definition(&self) -> &ToolDefinition;

    /// Run with the directive body
    async fn execute(&self, body: &str, cancel: &CancellationToken) -> Result<ToolResult>;
}

/// Tool registry
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its lower-cased name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name.to_lowercase();
        debug!(tool = %name, "Registering tool");
        self.tools.insert(name, tool);
    }

    /// Get a tool by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name.to_lowercase()).cloned()
    }

    /// Whether a tool is registered and enabled
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.definition().enabled)
    }

    /// Definitions, sorted by name
    #[must_use]
    pub fn list_definitions(&self) -> Vec<&ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Number of tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke `name` with `body`
    pub async fn invoke(
        &self,
        name: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if !tool.definition().enabled {
            return Err(Error::PermissionDenied(format!("tool '{}' is disabled", name)));
        }
        tool.execute(body, cancel).await
    }

    /// Prompt section describing the available tools
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for def in self.list_definitions().into_iter().filter(|d| d.enabled) {
            out.push_str(&format!("- {}: {}", def.name, def.description));
            if !def.usage.is_empty() {
                out.push_str(&format!(" Usage: {}", def.usage));
            }
            out.push('\n');
        }
        out
    }
}
