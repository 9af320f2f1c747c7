//! JSON round-trip for [`AgentState`], excluding its function-valued fields.
//!
//! `tool_registry_handle` holds live handler closures and `handoffs` holds
//! `Arc<AgentTemplate>` pointers into a live agent graph — neither is
//! meaningful outside the process that built it, so [`serialize`] drops both
//! and [`deserialize`] asks the caller to supply them back. This backs
//! trace/debug dumps and optional session save/load; it is not required for
//! a normal run.
//!
//! # Example
//!
//! ```rust
//! use agentcore::serialization::{deserialize, serialize};
//! use agentcore::state::AgentState;
//! use agentcore::llm::CompletionOptions;
//! use agentcore::tool_registry::ToolRegistry;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(ToolRegistry::new(vec![]).unwrap());
//! let state = AgentState::initialize(None, "hi", registry.clone(), CompletionOptions::default(), HashMap::new());
//! let json = serialize(&state);
//! let restored = deserialize(json, registry, HashMap::new()).unwrap();
//! assert_eq!(restored.conversation, state.conversation);
//! ```

use crate::handoff::Handoff;
use crate::llm::CompletionOptions;
use crate::message::Conversation;
use crate::state::{AgentState, AgentStatus};
use crate::tool_registry::ToolRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Wire shape matching the external-interfaces JSON object: `conversation`,
/// `initialQuery`, `status`, `logs`, `systemMessage`, `completionOptions`.
/// Unknown fields in the input are ignored by default serde behaviour.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerializedState {
    conversation: Conversation,
    #[serde(default)]
    initial_query: Option<String>,
    status: AgentStatus,
    #[serde(default)]
    logs: Vec<String>,
    #[serde(default)]
    system_message: Option<String>,
    completion_options: CompletionOptions,
}

/// Serialise `state` to the documented wire shape, dropping
/// `tool_registry_handle` and `handoffs`.
pub fn serialize(state: &AgentState) -> serde_json::Value {
    let wire = SerializedState {
        conversation: state.conversation.clone(),
        initial_query: state.initial_query.clone(),
        status: state.status.clone(),
        logs: state.logs.clone(),
        system_message: state.system_message.clone(),
        completion_options: state.completion_options.clone(),
    };
    serde_json::to_value(wire).expect("SerializedState has no non-serialisable field")
}

/// Rebuild an [`AgentState`] from `json`, re-attaching the `tool_registry_handle`
/// and `handoffs` the caller is responsible for supplying (they were never
/// part of the serialised form).
pub fn deserialize(
    json: serde_json::Value,
    tool_registry_handle: Arc<ToolRegistry>,
    handoffs: HashMap<String, Handoff>,
) -> Result<AgentState, serde_json::Error> {
    let wire: SerializedState = serde_json::from_value(json)?;
    Ok(AgentState {
        conversation: wire.conversation,
        tool_registry_handle,
        initial_query: wire.initial_query,
        status: wire.status,
        logs: wire.logs,
        system_message: wire.system_message,
        completion_options: wire.completion_options,
        handoffs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn empty_registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::new(vec![]).unwrap())
    }

    #[test]
    fn round_trips_a_complete_state() {
        let registry = empty_registry();
        let state = AgentState::initialize(
            Some("be terse".into()),
            "hi",
            registry.clone(),
            CompletionOptions::default(),
            HashMap::new(),
        )
        .append_message(Message::assistant("hello", vec![]))
        .unwrap()
        .with_status(AgentStatus::Complete)
        .append_log("step 0 completed");

        let json = serialize(&state);
        let restored = deserialize(json, registry, HashMap::new()).unwrap();

        assert_eq!(restored.conversation, state.conversation);
        assert_eq!(restored.status, state.status);
        assert_eq!(restored.logs, state.logs);
        assert_eq!(restored.system_message, state.system_message);
        assert_eq!(restored.initial_query, state.initial_query);
    }

    #[test]
    fn handoff_requested_status_round_trips_id_and_reason_only() {
        let state = AgentState::initialize(
            None,
            "hi",
            empty_registry(),
            CompletionOptions::default(),
            HashMap::new(),
        )
        .with_status(AgentStatus::HandoffRequested {
            handoff_id: "handoff_to_abcd1234".to_string(),
            reason: Some("refunds".to_string()),
        });

        let json = serialize(&state);
        let restored = deserialize(json, empty_registry(), HashMap::new()).unwrap();
        assert_eq!(restored.status, state.status);
    }

    #[test]
    fn missing_optional_completion_fields_default_on_deserialize() {
        let mut json = serialize(&AgentState::initialize(
            None,
            "hi",
            empty_registry(),
            CompletionOptions::default(),
            HashMap::new(),
        ));
        json["completionOptions"]
            .as_object_mut()
            .unwrap()
            .remove("reasoning");
        json["completionOptions"]
            .as_object_mut()
            .unwrap()
            .remove("budgetTokens");

        let restored = deserialize(json, empty_registry(), HashMap::new()).unwrap();
        assert!(restored.completion_options.reasoning_effort.is_none());
        assert!(restored.completion_options.budget_tokens.is_none());
    }
}
