//! Configuration loading
//!
//! Embedded defaults, then the user config file, then `config/local.toml`,
//! then `CONCLAVE_*` variables.

use anyhow::{Context, Result};
use conclave_agents::AgentConfig;
use conclave_core::TurnLimits;
use conclave_tools::VerificationConfig;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::PathBuf;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Orchestrating agent
    pub main_agent: String,
    /// Turn budgets
    #[serde(default)]
    pub turn: TurnLimits,
    /// Verification settings
    #[serde(default)]
    pub verification: VerificationConfig,
    /// Task queue settings
    #[serde(default)]
    pub queue: QueueConfig,
    /// Tool settings
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Agent backends
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

/// Task queue settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueConfig {
    /// SQLite database; in-memory store when unset
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// Tool settings
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Executables the `exec` tool may run; anything not blocked when unset
    #[serde(default)]
    pub exec_allowlist: Option<Vec<String>>,
    /// Time limit for `exec`
    #[serde(default = "default_exec_timeout_ms")]
    pub exec_timeout_ms: u64,
}

fn default_exec_timeout_ms() -> u64 {
    60_000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            exec_allowlist: None,
            exec_timeout_ms: default_exec_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            anyhow::bail!("no agents configured");
        }
        let main = self.main_agent.to_lowercase();
        if !self.agents.iter().any(|a| a.id.to_lowercase() == main) {
            anyhow::bail!("main_agent '{}' is not among the configured agents", self.main_agent);
        }
        Ok(())
    }
}

/// `~/.config/conclave/config.toml` or the platform equivalent
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("conclave").join("config.toml"))
}

/// Load configuration from the embedded defaults, files and environment
pub fn load_config() -> Result<AppConfig> {
    let mut builder =
        Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));
    if let Some(path) = user_config_path() {
        builder = builder.add_source(File::from(path).required(false));
    }
    let config = builder
        .add_source(File::with_name("config/local").required(false))
        // CONCLAVE_TURN__MAX_DELEGATIONS=3 style
        .add_source(
            Environment::with_prefix("CONCLAVE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let app: AppConfig = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    app.validate()?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::RoundLimit;

    fn parse(extra: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from_str(extra, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = parse("");
        config.validate().unwrap();
        assert_eq!(config.main_agent, "claude");
        assert_eq!(config.agents.len(), 3);
        assert_eq!(config.turn.max_supervisor_rounds, RoundLimit::Limited(3));
        assert!(config.verification.enabled);
        assert!(config.queue.db_path.is_none());
        assert_eq!(config.tools.exec_timeout_ms, 60_000);
    }

    #[test]
    fn test_round_limit_overrides() {
        let config = parse("[turn]\nmax_tool_rounds = \"off\"\nmax_delegations = \"unlimited\"\n");
        assert_eq!(config.turn.max_tool_rounds, RoundLimit::Disabled);
        assert_eq!(config.turn.max_delegations, RoundLimit::Unlimited);
    }

    #[test]
    fn test_unknown_main_agent_is_rejected() {
        let config = parse("main_agent = \"nobody\"");
        assert!(config.validate().is_err());
    }
}
