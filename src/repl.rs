//! Line-oriented front end
//!
//! Plain lines run a collaborative turn. Lines starting with `/` are commands.

use crate::app::App;
use anyhow::Result;
use async_trait::async_trait;
use conclave_agents::AgentSession;
use conclave_core::{
    format_error_for_cli, DelegationDirective, DelegationStatus, Task, TaskListener, TaskStatus,
    TurnResult,
};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// A parsed input line
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// Run a turn
    Message(&'a str),
    /// Queue a background task
    Task(&'a str),
    /// List tasks
    Tasks,
    /// List agents
    Agents,
    /// Pause the queue
    Pause,
    /// Resume the queue
    Resume,
    /// Cancel a task
    Cancel(&'a str),
    /// Leave
    Quit,
    /// Unrecognized `/` command
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    /// Parse a trimmed, non-empty line
    pub fn parse(line: &'a str) -> Self {
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Message(line);
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match name {
            "task" if !arg.is_empty() => Command::Task(arg),
            "tasks" => Command::Tasks,
            "agents" => Command::Agents,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "cancel" if !arg.is_empty() => Command::Cancel(arg),
            "quit" | "exit" => Command::Quit,
            _ => Command::Unknown(name),
        }
    }
}

/// Prints task transitions as they happen
pub struct TaskReporter;

#[async_trait]
impl TaskListener for TaskReporter {
    async fn on_task_started(&self, task: &Task) -> conclave_core::Result<()> {
        eprintln!("▶ task {} started: {}", task.id, task.title);
        Ok(())
    }

    async fn on_task_completed(&self, task: &Task) {
        match task.status {
            TaskStatus::Completed => eprintln!("✅ task {} completed", task.id),
            TaskStatus::Failed => eprintln!(
                "❌ task {} failed: {}",
                task.id,
                task.error.as_deref().unwrap_or("unknown error")
            ),
            status => eprintln!("task {} {}", task.id, status),
        }
    }
}

/// One-line summary of the delegations made during a turn
pub fn delegation_summary(result: &TurnResult) -> Option<String> {
    if result.delegations.is_empty() {
        return None;
    }
    let agents: Vec<String> = result
        .delegations
        .iter()
        .map(|d| match d.status {
            DelegationStatus::Completed => d.agent_id.clone(),
            DelegationStatus::Skipped => format!("{} (skipped)", d.agent_id),
            DelegationStatus::Failed => format!("{} (failed)", d.agent_id),
        })
        .collect();
    Some(format!(
        "[delegated to {} in {} round(s), {} tokens]",
        agents.join(", "),
        result.supervisor_rounds,
        result.usage.total()
    ))
}

/// One line per agent, the main agent marked with `*`
pub fn agent_lines(session: &dyn AgentSession) -> Vec<String> {
    session
        .list_agents()
        .into_iter()
        .map(|agent| {
            let marker = if agent.id == session.main_agent_id() { "*" } else { " " };
            match agent.vendor {
                Some(vendor) => format!("{} {:<10} {} ({})", marker, agent.id, agent.name, vendor),
                None => format!("{} {:<10} {}", marker, agent.id, agent.name),
            }
        })
        .collect()
}

/// Read stdin until EOF or `/quit`
pub async fn run(app: &App) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match Command::parse(line) {
            Command::Quit => break,
            Command::Message(text) => run_turn(app, text).await,
            command => {
                if let Err(e) = run_command(app, command).await {
                    eprintln!("{}", format_error_for_cli(&e));
                }
            }
        }
    }
    debug!("stdin closed");
    Ok(())
}

async fn run_turn(app: &App, text: &str) {
    let cancel = app.cancel.child_token();
    let result = tokio::select! {
        result = app.engine.run(text, &cancel) => result,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            Err(conclave_core::Error::Cancelled)
        }
    };
    match result {
        Ok(result) => {
            println!("{}", result.response);
            if let Some(summary) = delegation_summary(&result) {
                println!("{}", summary);
            }
        }
        Err(e) => eprintln!("{}", format_error_for_cli(&e)),
    }
}

async fn run_command(app: &App, command: Command<'_>) -> conclave_core::Result<()> {
    match command {
        Command::Task(text) => {
            let directive = DelegationDirective {
                raw: text.to_string(),
                agent_id: app.registry.main_agent_id().to_string(),
                prompt: text.to_string(),
            };
            let spec = app.pipeline.promote(&directive);
            let task = app.queue.add_spec(spec).await?;
            app.queue.notify();
            println!("queued task {} ({})", task.id, task.title);
        }
        Command::Tasks => {
            let tasks = app.queue.list().await?;
            if tasks.is_empty() {
                println!("no tasks");
            }
            for task in tasks {
                println!("{}  {:<9}  {}", task.id, task.status, task.title);
            }
        }
        Command::Agents => {
            for line in agent_lines(app.registry.as_ref()) {
                println!("{}", line);
            }
        }
        Command::Pause => {
            app.queue.pause().await;
            println!("queue paused");
        }
        Command::Resume => {
            app.queue.resume().await;
            println!("queue resumed");
        }
        Command::Cancel(id) => {
            let task = app.queue.cancel(id).await?;
            println!("task {} {}", task.id, task.status);
        }
        Command::Unknown(name) => {
            println!("unknown command /{name}; try /task, /tasks, /agents, /pause, /resume, /cancel, /quit");
        }
        Command::Message(_) | Command::Quit => {}
    }
    Ok(())
}
