//! Conclave Tools - Command Execution and Verification
//!
//! This crate provides the side-effecting half of Conclave:
//! - Runner: allowlisted, size-capped, cancellable process execution
//! - Pool: bounded work-stealing concurrency with ordered results
//! - Verification: expectation checks over command runs
//! - Registry: tools callable from `<<<tool.<name>` directives

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod builtins;
pub mod cancel;
pub mod error;
pub mod pool;
pub mod registry;
pub mod runner;
pub mod security;
pub mod verification;

pub use builtins::{register_builtins, ExecConfig, ExecTool};
pub use cancel::{ensure_active, sleep, TimeoutScope};
pub use error::{Error, Result};
pub use pool::run_bounded;
pub use registry::{Tool, ToolDefinition, ToolRegistry, ToolResult};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use verification::{
    evaluate, format_report, VerificationCommand, VerificationConfig, VerificationResult,
    Verifier,
};
