//! Typed chat message model and the ordered conversation container.
//!
//! # Architecture
//!
//! ```text
//! Conversation → [Message, Message, ...]
//!                  ↑
//!      User | System | Assistant{tool_calls} | Tool{tool_call_id}
//! ```
//!
//! A [`Conversation`] is append-only: every mutating operation returns a new
//! value rather than mutating in place, which is what lets [`AgentState`](crate::state::AgentState)
//! stay a plain immutable snapshot.
//!
//! # Example
//!
//! ```rust
//! use agentcore::message::{Conversation, Message};
//!
//! let conv = Conversation::new()
//!     .append(Message::system("be terse"))
//!     .unwrap()
//!     .append(Message::user("hi"))
//!     .unwrap();
//!
//! assert_eq!(conv.len(), 2);
//! assert!(conv.last_of_role_assistant().is_none());
//! ```

use crate::error::InvariantViolation;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single request, issued by the model, to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments exactly as emitted by the model, unparsed.
    pub arguments_json: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments_json: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments_json: arguments_json.into(),
        }
    }
}

/// A single turn in a [`Conversation`].
///
/// Role is derivable from the variant; there is no separate `Role` enum.
/// Content is always present — for `Assistant` it may be empty when the
/// model only emitted tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        content: Arc<str>,
    },
    System {
        content: Arc<str>,
    },
    Assistant {
        content: Arc<str>,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: Arc<str>,
        tool_call_id: String,
    },
}

impl Message {
    pub fn user(content: impl Into<Arc<str>>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<Arc<str>>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<Arc<str>>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(content: impl Into<Arc<str>>, tool_call_id: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    /// Borrow this message's text content, regardless of variant.
    pub fn content(&self) -> &str {
        match self {
            Message::User { content } => content,
            Message::System { content } => content,
            Message::Assistant { content, .. } => content,
            Message::Tool { content, .. } => content,
        }
    }

    /// Tool calls attached to this message, empty for every variant except `Assistant`.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Message::Assistant { .. })
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }
}

/// Ordered, append-only sequence of [`Message`]s.
///
/// Invariants enforced on every [`append`](Conversation::append):
/// - at most one `System` message, and only at position 0;
/// - a `User` or `System` message may not be appended while the preceding
///   `Assistant` message has unanswered tool calls;
/// - a `Tool` message's `tool_call_id` must match an unanswered call on the
///   preceding `Assistant` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Ids of tool calls on the trailing `Assistant` message that have not
    /// yet been answered by a `Tool` message.
    ///
    /// The trailing `Assistant` message itself may no longer be
    /// `self.messages.last()` — a multi-tool-call turn answers its calls one
    /// `Tool` message at a time, so after the first reply the last message is
    /// `Tool`, not `Assistant`. Walk backward past any trailing `Tool`
    /// messages (recording which ids they already answered) until the
    /// `Assistant` message that issued them is found.
    fn pending_tool_call_ids(&self) -> Vec<&str> {
        let mut answered: Vec<&str> = Vec::new();
        let mut trailing_assistant_calls: Option<&[ToolCall]> = None;
        for msg in self.messages.iter().rev() {
            match msg {
                Message::Tool { tool_call_id, .. } => answered.push(tool_call_id.as_str()),
                Message::Assistant { tool_calls, .. } => {
                    trailing_assistant_calls = Some(tool_calls);
                    break;
                }
                _ => break,
            }
        }
        let trailing_assistant_calls = match trailing_assistant_calls {
            Some(calls) => calls,
            None => return Vec::new(),
        };
        trailing_assistant_calls
            .iter()
            .map(|c| c.id.as_str())
            .filter(|id| !answered.contains(id))
            .collect()
    }

    /// Append a message, enforcing conversation invariants. Returns a new
    /// `Conversation`; `self` is left untouched (immutability property 1).
    pub fn append(&self, message: Message) -> Result<Conversation, InvariantViolation> {
        match &message {
            Message::System { .. } => {
                if self.messages.iter().any(|m| m.is_system()) {
                    return Err(InvariantViolation::DuplicateSystemMessage);
                }
                if !self.messages.is_empty() {
                    return Err(InvariantViolation::DuplicateSystemMessage);
                }
            }
            Message::User { .. } => {
                let pending = self.pending_tool_call_ids();
                if !pending.is_empty() {
                    return Err(InvariantViolation::UnsatisfiedToolCalls {
                        pending: pending.len(),
                    });
                }
            }
            Message::Tool { tool_call_id, .. } => {
                let pending = self.pending_tool_call_ids();
                if !pending.iter().any(|id| *id == tool_call_id.as_str()) {
                    return Err(InvariantViolation::DanglingToolResult {
                        tool_call_id: tool_call_id.clone(),
                    });
                }
            }
            Message::Assistant { .. } => {
                let pending = self.pending_tool_call_ids();
                if !pending.is_empty() {
                    return Err(InvariantViolation::UnsatisfiedToolCalls {
                        pending: pending.len(),
                    });
                }
            }
        }
        let mut messages = self.messages.clone();
        messages.push(message);
        Ok(Conversation { messages })
    }

    /// All messages matching the given role predicate, in order.
    pub fn by_role(&self, predicate: impl Fn(&Message) -> bool) -> Vec<&Message> {
        self.messages.iter().filter(|m| predicate(m)).collect()
    }

    pub fn last_of_role(&self, predicate: impl Fn(&Message) -> bool) -> Option<&Message> {
        self.messages.iter().rev().find(|m| predicate(m))
    }

    pub fn last_of_role_assistant(&self) -> Option<&Message> {
        self.last_of_role(Message::is_assistant)
    }

    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.last_of_role_assistant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_user_then_assistant_with_tool_calls() {
        let conv = Conversation::new()
            .append(Message::user("hi"))
            .unwrap()
            .append(Message::assistant(
                "",
                vec![ToolCall::new("t1", "get_weather", "{}")],
            ))
            .unwrap();
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn cannot_append_user_while_tool_calls_pending() {
        let conv = Conversation::new()
            .append(Message::user("hi"))
            .unwrap()
            .append(Message::assistant(
                "",
                vec![ToolCall::new("t1", "get_weather", "{}")],
            ))
            .unwrap();
        let err = conv.append(Message::user("again")).unwrap_err();
        assert_eq!(err, InvariantViolation::UnsatisfiedToolCalls { pending: 1 });
    }

    #[test]
    fn dangling_tool_result_rejected() {
        let conv = Conversation::new().append(Message::user("hi")).unwrap();
        let err = conv.append(Message::tool("oops", "nope")).unwrap_err();
        assert_eq!(
            err,
            InvariantViolation::DanglingToolResult {
                tool_call_id: "nope".into()
            }
        );
    }

    #[test]
    fn tool_call_satisfied_allows_next_assistant() {
        let conv = Conversation::new()
            .append(Message::user("hi"))
            .unwrap()
            .append(Message::assistant(
                "",
                vec![ToolCall::new("t1", "get_weather", "{}")],
            ))
            .unwrap()
            .append(Message::tool("{\"tempC\":12}", "t1"))
            .unwrap();
        assert!(conv.append(Message::assistant("done", vec![])).is_ok());
    }

    #[test]
    fn only_one_system_message_and_must_be_first() {
        let conv = Conversation::new().append(Message::system("a")).unwrap();
        assert!(conv.append(Message::system("b")).is_err());

        let conv2 = Conversation::new().append(Message::user("hi")).unwrap();
        assert!(conv2.append(Message::system("late")).is_err());
    }

    #[test]
    fn three_tool_replies_to_one_assistant_turn_append_sequentially() {
        // Regression: appending the *second* Tool reply used to fail with
        // DanglingToolResult because pending_tool_call_ids() only looked at
        // messages.last(), which by then was the first Tool reply, not the
        // Assistant message that issued all three calls.
        let conv = Conversation::new()
            .append(Message::user("weather tour"))
            .unwrap()
            .append(Message::assistant(
                "",
                vec![
                    ToolCall::new("t1", "get_weather", r#"{"city":"Paris"}"#),
                    ToolCall::new("t2", "get_weather", r#"{"city":"London"}"#),
                    ToolCall::new("t3", "get_weather", r#"{"city":"Tokyo"}"#),
                ],
            ))
            .unwrap()
            .append(Message::tool(r#"{"tempC":12}"#, "t1"))
            .unwrap()
            .append(Message::tool(r#"{"tempC":9}"#, "t2"))
            .unwrap()
            .append(Message::tool(r#"{"tempC":18}"#, "t3"))
            .unwrap();
        assert_eq!(conv.len(), 5);
        assert!(conv.append(Message::assistant("done", vec![])).is_ok());
    }

    #[test]
    fn out_of_order_tool_replies_are_still_tracked_individually() {
        let conv = Conversation::new()
            .append(Message::user("weather tour"))
            .unwrap()
            .append(Message::assistant(
                "",
                vec![
                    ToolCall::new("t1", "get_weather", r#"{"city":"Paris"}"#),
                    ToolCall::new("t2", "get_weather", r#"{"city":"London"}"#),
                ],
            ))
            .unwrap()
            .append(Message::tool(r#"{"tempC":9}"#, "t2"))
            .unwrap();
        let err = conv.append(Message::user("too soon")).unwrap_err();
        assert_eq!(err, InvariantViolation::UnsatisfiedToolCalls { pending: 1 });
        assert!(conv.append(Message::tool(r#"{"tempC":12}"#, "t1")).is_ok());
    }

    #[test]
    fn append_is_immutable() {
        let before = Conversation::new().append(Message::user("hi")).unwrap();
        let snapshot = before.clone();
        let _after = before.append(Message::assistant("hello", vec![])).unwrap();
        assert_eq!(before, snapshot);
    }
}
