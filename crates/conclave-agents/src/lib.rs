//! Conclave Agents - Backend Adapters and Stream Normalization
//!
//! This crate turns vendor agent CLIs into interchangeable workers:
//! - Events: the shared [`AgentEvent`] model
//! - Parser: one stateful stream parser per vendor
//! - Backend: process-backed invocation with cancellation and timeouts
//! - Registry: routing by agent id plus per-instance event observers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod events;
pub mod parser;
pub mod registry;

pub use backend::{AgentBackend, AgentConfig, AgentReply, CliAgentBackend, EventSink};
pub use error::{Error, Result};
pub use events::{
    AgentEvent, AgentPhase, ChangeKind, EnvelopeKind, FileChange, ItemEnvelope, ItemStatus,
    ThreadItem, TokenUsage,
};
pub use parser::{
    ClaudeStreamParser, CodexStreamParser, GeminiStreamParser, StreamParser, Vendor,
};
pub use registry::{
    AgentDescriptor, AgentRegistry, AgentSession, EventHandler, InvokeOptions, Subscription,
};
