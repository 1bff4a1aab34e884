//! Built-in tools

pub mod exec;

pub use exec::{ExecConfig, ExecTool};

use crate::registry::ToolRegistry;
use crate::runner::CommandRunner;
use std::sync::Arc;

/// Register every built-in tool
pub fn register_builtins(
    registry: &mut ToolRegistry,
    runner: Arc<dyn CommandRunner>,
    exec: ExecConfig,
) {
    registry.register(Arc::new(ExecTool::new(runner, exec)));
}
