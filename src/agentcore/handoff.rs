//! LLM-directed delegation from one agent to another.
//!
//! A [`Handoff`] names a target agent and how much of the current
//! conversation survives the jump. The engine exposes each registered
//! handoff to the LLM as a synthetic tool whose name is the handoff's
//! deterministically derived `handoff_id` (see [`Handoff::id`]); the LLM
//! "calling" that tool is what requests the delegation.
//!
//! # Example
//!
//! ```rust
//! use agentcore::handoff::{AgentTemplate, Handoff};
//! use agentcore::llm::CompletionOptions;
//! use agentcore::tool_registry::ToolRegistry;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let refund_agent = Arc::new(AgentTemplate {
//!     id: "refund_agent".to_string(),
//!     system_message: Some("You handle refunds.".to_string()),
//!     completion_options: CompletionOptions::default(),
//!     handoffs: HashMap::new(),
//!     tool_registry_handle: Arc::new(ToolRegistry::new(vec![]).unwrap()),
//! });
//! let handoff = Handoff::new(refund_agent).with_transfer_reason("refunds");
//! assert!(handoff.id().starts_with("handoff_to_"));
//! ```

use crate::llm::CompletionOptions;
use crate::tool_registry::ToolRegistry;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// The static blueprint for a handoff target: enough to build a fresh
/// [`crate::state::AgentState`] when the handoff fires. Not a running state —
/// per §4.5, a handoff targets a template, and a new state is built for it at
/// handoff time.
pub struct AgentTemplate {
    /// Stable identifier used (only) to derive this template's handoff id
    /// when it is itself a handoff target; not displayed to the model.
    pub id: String,
    pub system_message: Option<String>,
    pub completion_options: CompletionOptions,
    pub handoffs: HashMap<String, Handoff>,
    pub tool_registry_handle: Arc<ToolRegistry>,
}

/// A cheap, cloneable reference to an [`AgentTemplate`].
pub type AgentHandle = Arc<AgentTemplate>;

/// Descriptor for delegating to another agent.
#[derive(Clone)]
pub struct Handoff {
    pub target_agent: AgentHandle,
    pub transfer_reason: Option<String>,
    pub preserve_context: bool,
    pub transfer_system_message: bool,
}

impl Handoff {
    pub fn new(target_agent: AgentHandle) -> Self {
        Self {
            target_agent,
            transfer_reason: None,
            preserve_context: true,
            transfer_system_message: false,
        }
    }

    pub fn with_transfer_reason(mut self, reason: impl Into<String>) -> Self {
        self.transfer_reason = Some(reason.into());
        self
    }

    pub fn with_preserve_context(mut self, preserve: bool) -> Self {
        self.preserve_context = preserve;
        self
    }

    pub fn with_transfer_system_message(mut self, transfer: bool) -> Self {
        self.transfer_system_message = transfer;
        self
    }

    /// Stable identifier derived deterministically from the target handle,
    /// doubling as the synthesised tool name the LLM sees.
    pub fn id(&self) -> String {
        derive_handoff_id(&self.target_agent.id)
    }
}

/// SHA-256 over the target's stable id, truncated to a short hex prefix so
/// it reads as a plausible synthetic tool name rather than a raw digest.
fn derive_handoff_id(target_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target_id.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        hex.push_str(&format!("{:02x}", byte));
    }
    format!("handoff_to_{}", hex)
}
