//! Agent state and status: the immutable snapshot the execution engine
//! transitions between steps.
//!
//! # Architecture
//!
//! ```text
//! AgentState { conversation, tool_registry_handle, status, logs, ... }
//!                                  ↓ run_step
//!                         new AgentState (never mutated in place)
//! ```
//!
//! # Example
//!
//! ```rust
//! use agentcore::state::AgentState;
//! use agentcore::tool_registry::ToolRegistry;
//! use agentcore::llm::CompletionOptions;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(ToolRegistry::new(vec![]).unwrap());
//! let state = AgentState::initialize(None, "hello", registry, CompletionOptions::default(), Default::default());
//! assert_eq!(state.conversation.len(), 1);
//! ```

use crate::error::InvariantViolation;
use crate::handoff::Handoff;
use crate::llm::CompletionOptions;
use crate::message::{Conversation, Message};
use crate::tool_registry::ToolRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Where a run currently stands. Terminal states are `Complete` and `Failed`;
/// every other variant is transient and the step loop will keep advancing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentStatus {
    /// The step loop should continue.
    InProgress,
    /// The last assistant message issued tool calls; the next step must
    /// execute them.
    WaitingForTools,
    /// Control must transfer to another agent before continuing.
    HandoffRequested {
        handoff_id: String,
        reason: Option<String>,
    },
    /// The last assistant message is terminal: no tool calls, no handoff.
    Complete,
    /// An unrecoverable error was reached.
    Failed { error_message: String },
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Complete | AgentStatus::Failed { .. })
    }
}

/// Immutable record produced by [`initialize`](AgentState::initialize) and
/// every subsequent step. Every transition returns a new value; nothing here
/// is ever mutated in place, which is what property 1 (immutability) tests
/// against.
#[derive(Clone)]
pub struct AgentState {
    pub conversation: Conversation,
    /// Process-local, read-only for the lifetime of a run; not serialised.
    pub tool_registry_handle: Arc<ToolRegistry>,
    pub initial_query: Option<String>,
    pub status: AgentStatus,
    pub logs: Vec<String>,
    pub system_message: Option<String>,
    pub completion_options: CompletionOptions,
    pub handoffs: HashMap<String, Handoff>,
}

/// Hand-written: `tool_registry_handle` holds type-erased closures and
/// `handoffs` points at `AgentTemplate`s, neither of which derive `Debug`.
/// Prints the fields a debugger actually wants — conversation, status, logs —
/// and summarizes the rest by count.
impl fmt::Debug for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentState")
            .field("conversation", &self.conversation)
            .field("tool_count", &self.tool_registry_handle.names().len())
            .field("initial_query", &self.initial_query)
            .field("status", &self.status)
            .field("logs", &self.logs)
            .field("system_message", &self.system_message)
            .field("handoff_count", &self.handoffs.len())
            .finish()
    }
}

impl AgentState {
    /// Build a conversation of `[System?] ++ [User(initial_query)]`, set
    /// status to `InProgress`, and store the supplied tool registry handle
    /// and handoff table.
    pub fn initialize(
        system_message: Option<String>,
        initial_query: impl Into<String>,
        tool_registry_handle: Arc<ToolRegistry>,
        completion_options: CompletionOptions,
        handoffs: HashMap<String, Handoff>,
    ) -> Self {
        let initial_query = initial_query.into();
        let mut conversation = Conversation::new();
        if let Some(system) = &system_message {
            conversation = conversation
                .append(Message::system(system.clone()))
                .expect("fresh conversation always accepts a leading system message");
        }
        conversation = conversation
            .append(Message::user(initial_query.clone()))
            .expect("fresh conversation always accepts the initial user message");

        Self {
            conversation,
            tool_registry_handle,
            initial_query: Some(initial_query),
            status: AgentStatus::InProgress,
            logs: Vec::new(),
            system_message,
            completion_options,
            handoffs,
        }
    }

    pub fn with_status(&self, status: AgentStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    pub fn append_message(&self, message: Message) -> Result<Self, InvariantViolation> {
        let conversation = self.conversation.append(message)?;
        Ok(Self {
            conversation,
            ..self.clone()
        })
    }

    pub fn append_log(&self, entry: impl Into<String>) -> Self {
        let mut logs = self.logs.clone();
        logs.push(entry.into());
        Self {
            logs,
            ..self.clone()
        }
    }

    pub fn clear_logs(&self) -> Self {
        Self {
            logs: Vec::new(),
            ..self.clone()
        }
    }
}
