//! The LLM capability the engine consumes.
//!
//! Provider selection, authentication, model metadata, and wire formats are
//! all external to this crate — [`LlmClient`] is the only seam. A concrete
//! implementation (HTTP client to a given provider) lives outside this
//! crate; tests use a scripted mock that implements the same trait.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentcore::llm::{Completion, CompletionOptions, LlmClient, ToolSchema};
//! use agentcore::message::Message;
//! use agentcore::error::LlmError;
//! use async_trait::async_trait;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl LlmClient for Echo {
//!     async fn complete(
//!         &self,
//!         messages: &[Message],
//!         _options: &CompletionOptions,
//!         _tools: &[ToolSchema],
//!     ) -> Result<Completion, LlmError> {
//!         Ok(Completion::text(messages.last().map(|m| m.content().to_string()).unwrap_or_default()))
//!     }
//! }
//! ```

use crate::error::LlmError;
use crate::message::{Message, ToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// `reasoning_effort` is carried through as an opaque value; the engine never
/// interprets it, only passes it to the LLM capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Low,
    Medium,
    High,
}

/// Per-call sampling and generation parameters.
///
/// Serialised camelCase (`topP`, `maxTokens`, `reasoning`, `budgetTokens`, ...)
/// to match the wire shape in [`crate::serialization`]; every optional field
/// defaults on missing input so older saved states keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOptions {
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub top_p: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default, rename = "reasoning")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub budget_tokens: Option<u32>,
    /// Which model to target; `None` defers to the capability's own default.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            max_tokens: None,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            reasoning_effort: None,
            budget_tokens: None,
            model: None,
        }
    }
}

/// Token accounting reported by a provider, when it reports one.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A tool schema as passed to the LLM capability: the user's registered
/// tools plus one synthetic entry per handoff, combined verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// The model's response to a single `complete`/`stream_complete` call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub content: String,
    pub model: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
    pub thinking: Option<String>,
}

impl Completion {
    /// Convenience constructor for tests and simple capabilities: a terminal
    /// text completion with no tool calls and no usage reporting.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            created_at: chrono::Utc::now(),
            content: content.into(),
            model: String::new(),
            tool_calls: Vec::new(),
            usage: None,
            thinking: None,
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

/// Incremental chunk delivered to `on_chunk` during [`LlmClient::stream_complete`].
#[derive(Debug, Clone, Default)]
pub struct CompletionChunk {
    pub content: Option<String>,
    pub tool_call_delta: Option<ToolCall>,
    pub thinking_delta: Option<String>,
    pub finish_reason: Option<String>,
}

/// Boxed future used by [`LlmClient::stream_complete`]'s `on_chunk` callback
/// so implementors are not forced to make their callback's future `Send`
/// themselves — the trait owns that requirement instead.
pub type ChunkFuture<'a> = Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>>;

/// The capability the execution engine consumes from an LLM provider.
///
/// Implemented outside this crate for a concrete provider; the engine only
/// ever calls `complete` (or `stream_complete` for streaming-capable runs).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a message history plus options and the combined tool schema
    /// list; get back a completion or a terminal error for this step.
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
        tools: &[ToolSchema],
    ) -> Result<Completion, LlmError>;

    /// Streaming variant: `on_chunk` is invoked for each incremental piece as
    /// it arrives, and the final aggregated `Completion` is returned once the
    /// stream ends. The default implementation falls back to `complete` and
    /// delivers the whole response as a single chunk, matching how a
    /// non-streaming capability can still satisfy this trait.
    async fn stream_complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
        tools: &[ToolSchema],
        on_chunk: &(dyn Fn(CompletionChunk) -> ChunkFuture<'_> + Send + Sync),
    ) -> Result<Completion, LlmError> {
        let completion = self.complete(messages, options, tools).await?;
        on_chunk(CompletionChunk {
            content: Some(completion.content.clone()),
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        })
        .await;
        Ok(completion)
    }
}
