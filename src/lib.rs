// src/lib.rs

// Import the top-level `agentcore` module.
pub mod agentcore;

// Re-exporting key items for easier external access, the way callers expect
// to write agentcore::Engine rather than agentcore::agentcore::engine::Engine.
pub use agentcore::config::EngineConfig;
pub use agentcore::context_policy::{ContextWindowPolicy, NoopPolicy, PruneConfig, PruneStrategy};
pub use agentcore::engine::{CancellationToken, Engine};
pub use agentcore::error::{AgentError, GuardrailError, HandoffError, InvariantViolation, RegistryError, ToolError};
pub use agentcore::event::{AgentEvent, CollectingSink, EventSink, NoopSink};
pub use agentcore::guardrail::{
    AsyncInputGuardrail, AsyncOutputGuardrail, CompositeGuardrail, InputGuardrail, JsonValidator, LengthCheck,
    LlmAsJudgeGuardrail, OutputGuardrail, RegexValidator, ValidationMode,
};
pub use agentcore::handoff::{AgentHandle, AgentTemplate, Handoff};
pub use agentcore::llm::{
    ChunkFuture, Completion, CompletionChunk, CompletionOptions, LlmClient, ReasoningEffort, TokenUsage, ToolSchema,
};
pub use agentcore::message::{Conversation, Message, ToolCall};
pub use agentcore::state::{AgentState, AgentStatus};
pub use agentcore::tool_registry::{ExecutionStrategy, ToolDefinition, ToolRegistry};
