//! Error taxonomy for the agent execution engine.
//!
//! Every fallible operation in this crate returns a closed, `Display + Error`
//! enum rather than a boxed trait object or a panic. [`AgentError`] aggregates
//! the component error kinds at the engine's public surface the way a
//! top-level error wraps subsystem errors in a layered system.

use std::fmt;

/// Errors surfaced while appending to or otherwise mutating a [`crate::message::Conversation`].
///
/// Always a programming error: the invariants these guard (§3 of the message
/// model) are meant to be upheld by callers, not recovered from at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A `Tool` message was appended whose `tool_call_id` does not match any
    /// outstanding tool call on the preceding `Assistant` message.
    DanglingToolResult { tool_call_id: String },
    /// A `User` or `System` message was appended while the preceding
    /// `Assistant` message still has unsatisfied tool calls.
    UnsatisfiedToolCalls { pending: usize },
    /// A second `System` message was appended; at most one may exist, at
    /// position zero.
    DuplicateSystemMessage,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::DanglingToolResult { tool_call_id } => write!(
                f,
                "tool message references unknown tool_call_id: {}",
                tool_call_id
            ),
            InvariantViolation::UnsatisfiedToolCalls { pending } => write!(
                f,
                "cannot append message while {} tool call(s) remain unanswered",
                pending
            ),
            InvariantViolation::DuplicateSystemMessage => {
                write!(f, "conversation already has a system message")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// Errors raised by a [`crate::tool_registry::ToolRegistry`] dispatching a single call.
///
/// Per-call; never aborts a run by itself. The engine serialises the
/// `Display` form of this error into the resulting `Tool` message's content
/// so the model can react to it.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// No tool with this name is registered.
    UnknownTool(String),
    /// `arguments_json` did not parse as JSON.
    ArgumentParse(String),
    /// Arguments parsed but failed the tool's declared parameter schema.
    SchemaMismatch { path: String, message: String },
    /// The handler itself returned or raised an error.
    HandlerFailed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::UnknownTool(name) => write!(f, "unknown tool: {}", name),
            ToolError::ArgumentParse(msg) => write!(f, "failed to parse tool arguments: {}", msg),
            ToolError::SchemaMismatch { path, message } => {
                write!(f, "schema mismatch at {}: {}", path, message)
            }
            ToolError::HandlerFailed(msg) => write!(f, "tool handler failed: {}", msg),
        }
    }
}

impl std::error::Error for ToolError {}

/// Construction-time error for [`crate::tool_registry::ToolRegistry::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two `ToolDefinition`s in the input shared the same `name`.
    DuplicateTool(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateTool(name) => write!(f, "duplicate tool name: {}", name),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors raised by guardrails and composite guardrail aggregation.
#[derive(Debug, Clone)]
pub enum GuardrailError {
    /// A single named guardrail rejected its input.
    Rejected { guardrail: String, message: String },
    /// A `CompositeGuardrail` failed; carries every constituent failure in
    /// input order (see testable property 9 of the design).
    Aggregate(Vec<GuardrailError>),
    /// The `LlmAsJudgeGuardrail`'s judge returned a score that was not a
    /// finite number in `[0, 1]`.
    JudgeProtocolError(String),
}

impl fmt::Display for GuardrailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardrailError::Rejected { guardrail, message } => {
                write!(f, "guardrail '{}' rejected input: {}", guardrail, message)
            }
            GuardrailError::Aggregate(errors) => {
                let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                write!(f, "{} guardrail failure(s): {}", errors.len(), joined.join("; "))
            }
            GuardrailError::JudgeProtocolError(msg) => {
                write!(f, "judge guardrail protocol error: {}", msg)
            }
        }
    }
}

impl std::error::Error for GuardrailError {}

/// Raised when an operation's precondition does not hold (e.g. continuing a
/// conversation that is not yet `Complete`/`Failed`). The input is returned
/// unmodified alongside this error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreconditionViolation(pub String);

impl fmt::Display for PreconditionViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "precondition violation: {}", self.0)
    }
}

impl std::error::Error for PreconditionViolation {}

/// Opaque error returned by an [`crate::llm::LlmClient`] implementation.
///
/// The engine treats every `LLMError` as terminal for the current step: it
/// never inspects the message to branch on provider-specific detail.
#[derive(Debug, Clone)]
pub struct LlmError(pub String);

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LLM capability error: {}", self.0)
    }
}

impl std::error::Error for LlmError {}

/// Errors specific to resolving and executing a handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffError {
    /// No handoff is registered under this id.
    UnknownHandoff(String),
    /// Executing the handoff chain would exceed `MAX_HANDOFF_DEPTH`.
    DepthExceeded { limit: usize },
}

impl fmt::Display for HandoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandoffError::UnknownHandoff(id) => write!(f, "unknown handoff: {}", id),
            HandoffError::DepthExceeded { limit } => {
                write!(f, "handoff depth exceeded (limit {})", limit)
            }
        }
    }
}

impl std::error::Error for HandoffError {}

/// Top-level error for the engine's public surface (`run`, `run_step`,
/// `continue_conversation`, `run_multi_turn`).
///
/// Mirrors the way `OrchestrationError` aggregates agent- and tool-level
/// failures at the orchestration seam: each variant wraps a component error
/// kind so callers can `match` on provenance without losing the original
/// value.
#[derive(Debug, Clone)]
pub enum AgentError {
    Llm(LlmError),
    Invariant(InvariantViolation),
    Precondition(PreconditionViolation),
    Handoff(HandoffError),
    Guardrail(GuardrailError),
    Registry(RegistryError),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Llm(e) => write!(f, "{}", e),
            AgentError::Invariant(e) => write!(f, "{}", e),
            AgentError::Precondition(e) => write!(f, "{}", e),
            AgentError::Handoff(e) => write!(f, "{}", e),
            AgentError::Guardrail(e) => write!(f, "{}", e),
            AgentError::Registry(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        AgentError::Llm(e)
    }
}

impl From<InvariantViolation> for AgentError {
    fn from(e: InvariantViolation) -> Self {
        AgentError::Invariant(e)
    }
}

impl From<PreconditionViolation> for AgentError {
    fn from(e: PreconditionViolation) -> Self {
        AgentError::Precondition(e)
    }
}

impl From<HandoffError> for AgentError {
    fn from(e: HandoffError) -> Self {
        AgentError::Handoff(e)
    }
}

impl From<GuardrailError> for AgentError {
    fn from(e: GuardrailError) -> Self {
        AgentError::Guardrail(e)
    }
}

impl From<RegistryError> for AgentError {
    fn from(e: RegistryError) -> Self {
        AgentError::Registry(e)
    }
}
