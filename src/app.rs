//! Wiring: agents, tools, turn engine and task queue

use crate::config::AppConfig;
use anyhow::{Context, Result};
use conclave_agents::{AgentPhase, AgentRegistry, AgentSession, CliAgentBackend, Subscription};
use conclave_core::{
    MemoryTaskStore, SqliteTaskStore, TaskExecutor, TaskPipeline, TaskQueue, TaskStore,
    TaskWorker, TurnEngine,
};
use conclave_tools::{register_builtins, ExecConfig, ProcessRunner, ToolRegistry, Verifier};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Running application
pub struct App {
    pub registry: Arc<AgentRegistry>,
    pub engine: Arc<TurnEngine>,
    pub pipeline: Arc<TaskPipeline>,
    pub queue: Arc<TaskQueue>,
    pub cancel: CancellationToken,
    worker: JoinHandle<()>,
    _progress: Subscription,
}

impl App {
    /// Build everything from `config` and start the task worker
    pub async fn build(config: &AppConfig) -> Result<Self> {
        let mut registry = AgentRegistry::new(config.main_agent.to_lowercase());
        for agent in &config.agents {
            let mut agent = agent.clone();
            agent.id = agent.id.to_lowercase();
            registry.register(Arc::new(CliAgentBackend::new(agent)));
        }
        let missing = registry.probe_availability().await;
        if !missing.is_empty() {
            warn!(agents = ?missing, "Some agent CLIs were not found and will be skipped");
        }
        let registry = Arc::new(registry);
        if !registry.has_agent(registry.main_agent_id()) {
            anyhow::bail!(
                "main agent '{}' is not available; install its CLI or pick another main_agent",
                registry.main_agent_id()
            );
        }

        let progress = registry.on_event(|agent_id, event| {
            if matches!(
                event.phase,
                AgentPhase::Command | AgentPhase::Editing | AgentPhase::Tool | AgentPhase::Error
            ) {
                match &event.detail {
                    Some(detail) => eprintln!("  [{}] {}: {}", agent_id, event.title, detail),
                    None => eprintln!("  [{}] {}", agent_id, event.title),
                }
            }
        });

        let runner = Arc::new(ProcessRunner::new());
        let mut tools = ToolRegistry::new();
        register_builtins(
            &mut tools,
            runner.clone(),
            ExecConfig {
                allowlist: config.tools.exec_allowlist.clone(),
                timeout_ms: config.tools.exec_timeout_ms,
                ..Default::default()
            },
        );

        let session: Arc<dyn AgentSession> = registry.clone();
        let engine = Arc::new(TurnEngine::new(
            session,
            Arc::new(tools),
            config.turn.clone(),
        ));

        let store: Arc<dyn TaskStore> = match &config.queue.db_path {
            Some(path) => Arc::new(
                SqliteTaskStore::from_path(path)
                    .await
                    .with_context(|| format!("Failed to open task store {}", path.display()))?,
            ),
            None => Arc::new(MemoryTaskStore::new()),
        };
        let verifier = Arc::new(Verifier::new(runner, config.verification.clone()));
        let pipeline = Arc::new(TaskPipeline::new(store.clone(), verifier));
        let queue = Arc::new(TaskQueue::new(store));
        queue.add_listener(Arc::new(crate::repl::TaskReporter));

        let executor: Arc<dyn TaskExecutor> = engine.clone();
        let worker = TaskWorker::new(queue.clone(), executor, pipeline.clone());
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.child_token();
        let worker = tokio::spawn(async move {
            if let Err(e) = worker.run(worker_cancel).await {
                warn!(error = %e, "Task worker exited with error");
            }
        });

        info!(
            main_agent = %registry.main_agent_id(),
            agents = registry.list_agents().len(),
            "Conclave ready"
        );
        Ok(Self {
            registry,
            engine,
            pipeline,
            queue,
            cancel,
            worker,
            _progress: progress,
        })
    }

    /// Stop the worker and wait for it
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Task worker panicked");
        }
    }
}
