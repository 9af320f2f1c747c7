// src/agentcore/mod.rs

pub mod config;
pub mod context_policy;
pub mod engine;
pub mod error;
pub mod event;
pub mod guardrail;
pub mod handoff;
pub mod llm;
pub mod message;
pub mod schema;
pub mod serialization;
pub mod state;
pub mod tool_registry;

// Re-export the types most call sites reach for, so they're available as
// agentcore::Engine instead of agentcore::agentcore::engine::Engine.
pub use config::EngineConfig;
pub use engine::{CancellationToken, Engine};
pub use error::AgentError;
pub use event::{AgentEvent, EventSink};
pub use handoff::{AgentHandle, AgentTemplate, Handoff};
pub use message::{Conversation, Message, ToolCall};
pub use state::{AgentState, AgentStatus};
pub use tool_registry::{ExecutionStrategy, ToolDefinition, ToolRegistry};
