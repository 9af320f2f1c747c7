//! The step machine: the execution engine that drives an [`AgentState`]
//! forward by alternating LLM calls with tool execution batches.
//!
//! # Architecture
//!
//! ```text
//! run_step(InProgress)       -> LLM call -> Complete | WaitingForTools | HandoffRequested
//! run_step(WaitingForTools)  -> tool batch -> InProgress
//! run(initial, max_steps)    -> loop run_step until terminal, budget exhausted, or cancelled
//! ```
//!
//! `run` is a single-task cooperative driver: the only parallel fan-out is
//! tool execution inside a `WaitingForTools` step, controlled by the
//! [`ExecutionStrategy`](crate::tool_registry::ExecutionStrategy) configured
//! on the [`Engine`]. The LLM capability is called at most once per step.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentcore::engine::Engine;
//! use agentcore::state::AgentState;
//! use agentcore::llm::CompletionOptions;
//! use agentcore::tool_registry::ToolRegistry;
//! # use agentcore::llm::{LlmClient, Completion, ToolSchema};
//! # use agentcore::message::Message;
//! # use agentcore::error::LlmError;
//! # use async_trait::async_trait;
//! # struct Echo;
//! # #[async_trait]
//! # impl LlmClient for Echo {
//! #     async fn complete(&self, _m: &[Message], _o: &CompletionOptions, _t: &[ToolSchema]) -> Result<Completion, LlmError> {
//! #         Ok(Completion::text("hello"))
//! #     }
//! # }
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = Engine::new(Arc::new(Echo));
//! let registry = Arc::new(ToolRegistry::new(vec![]).unwrap());
//! let state = AgentState::initialize(None, "hi", registry, CompletionOptions::default(), Default::default());
//! let result = engine.run(state, None, None).await.unwrap();
//! assert!(matches!(result.status, agentcore::state::AgentStatus::Complete));
//! # }
//! ```

use crate::config::EngineConfig;
use crate::context_policy::{ContextWindowPolicy, NoopPolicy, PruneConfig};
use crate::error::{AgentError, HandoffError, PreconditionViolation};
use crate::event::{AgentEvent, CollectingSink, EventSink, NoopSink};
use crate::guardrail::{AsyncInputGuardrail, AsyncOutputGuardrail, CompositeGuardrail, InputGuardrail, OutputGuardrail};
use crate::handoff::AgentTemplate;
use crate::llm::{ChunkFuture, CompletionChunk, CompletionOptions, LlmClient, ToolSchema};
use crate::message::{Message, ToolCall};
use crate::state::{AgentState, AgentStatus};
use crate::tool_registry::{ExecutionStrategy, ToolCallRequest, ToolRegistry};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative, one-shot cancellation handle. Polled by [`Engine::run`]
/// between steps and between parallel tool completions; once set, no further
/// steps are initiated and in-flight work is drained (awaited, discarded)
/// rather than hard-aborted.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// The step machine, configured with the collaborators the core consumes as
/// external interfaces: an LLM capability, an execution strategy for tool
/// batches, optional guardrail pipelines, a context-window policy, and an
/// event sink.
///
/// Cheaply cloneable: every field is an `Arc`, an `Arc`-wrapped composite, or
/// plain `Copy` data, so [`run_with_events`](Engine::run_with_events) can hand
/// out a scoped copy with a different sink without re-building the whole
/// configuration.
#[derive(Clone)]
pub struct Engine {
    llm: Arc<dyn LlmClient>,
    config: EngineConfig,
    strategy: ExecutionStrategy,
    input_guardrails: Option<Arc<CompositeGuardrail<dyn InputGuardrail>>>,
    output_guardrails: Option<Arc<CompositeGuardrail<dyn OutputGuardrail>>>,
    /// Run alongside the sync pipelines above at the same boundary (§4.3/4.7);
    /// kept separate because `CompositeGuardrail` composes only synchronous
    /// checks (see `guardrail::AsyncInputGuardrail`).
    async_input_guardrails: Vec<Arc<dyn AsyncInputGuardrail>>,
    async_output_guardrails: Vec<Arc<dyn AsyncOutputGuardrail>>,
    context_policy: Arc<dyn ContextWindowPolicy>,
    event_sink: Arc<dyn EventSink>,
    /// Whether LLM calls go through `LlmClient::stream_complete` (emitting
    /// `TextDelta` events as chunks arrive) instead of `complete`. Off by
    /// default: most capabilities the engine is tested against are
    /// non-streaming, and turning this on for one that only implements the
    /// default `stream_complete` fallback just adds one redundant event per
    /// step.
    streaming: bool,
}

impl Engine {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        let config = EngineConfig::default();
        let strategy = config.default_execution_strategy;
        Self {
            llm,
            config,
            strategy,
            input_guardrails: None,
            output_guardrails: None,
            async_input_guardrails: Vec::new(),
            async_output_guardrails: Vec::new(),
            context_policy: Arc::new(NoopPolicy),
            event_sink: Arc::new(NoopSink),
            streaming: false,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.strategy = config.default_execution_strategy;
        self.config = config;
        self
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_input_guardrails(mut self, guardrails: CompositeGuardrail<dyn InputGuardrail>) -> Self {
        self.input_guardrails = Some(Arc::new(guardrails));
        self
    }

    pub fn with_output_guardrails(mut self, guardrails: CompositeGuardrail<dyn OutputGuardrail>) -> Self {
        self.output_guardrails = Some(Arc::new(guardrails));
        self
    }

    /// Add an async-capable input guardrail (e.g. [`crate::guardrail::LlmAsJudgeGuardrail`])
    /// to run alongside the synchronous pipeline, in the order added.
    pub fn with_async_input_guardrail(mut self, guardrail: Arc<dyn AsyncInputGuardrail>) -> Self {
        self.async_input_guardrails.push(guardrail);
        self
    }

    /// Add an async-capable output guardrail; see [`with_async_input_guardrail`](Self::with_async_input_guardrail).
    pub fn with_async_output_guardrail(mut self, guardrail: Arc<dyn AsyncOutputGuardrail>) -> Self {
        self.async_output_guardrails.push(guardrail);
        self
    }

    pub fn with_context_policy(mut self, policy: Arc<dyn ContextWindowPolicy>) -> Self {
        self.context_policy = policy;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Route LLM calls through `stream_complete` instead of `complete`,
    /// emitting `TextDelta` events as chunks arrive. The final step transition
    /// (tool calls vs. terminal content) is decided from the same aggregated
    /// `Completion` either way — streaming only changes which capability
    /// method is invoked and whether `TextDelta` events appear.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    async fn emit(&self, event: AgentEvent) {
        self.event_sink.on_event(&event).await;
    }

    /// Run the synchronous input pipeline, then every async input guardrail
    /// in registration order. Fails on the first rejection from either.
    async fn validate_input(&self, value: &str) -> Result<(), AgentError> {
        if let Some(guardrails) = &self.input_guardrails {
            guardrails.check(value)?;
        }
        for guardrail in &self.async_input_guardrails {
            guardrail.check(value).await?;
        }
        Ok(())
    }

    /// Run the synchronous output pipeline, then every async output guardrail
    /// in registration order. Fails on the first rejection from either.
    async fn validate_output(&self, value: &str) -> Result<(), AgentError> {
        if let Some(guardrails) = &self.output_guardrails {
            guardrails.check(value)?;
        }
        for guardrail in &self.async_output_guardrails {
            guardrail.check(value).await?;
        }
        Ok(())
    }

    /// Run `initial` with a different event sink than the one this `Engine`
    /// was built with, leaving every other collaborator (LLM, guardrails,
    /// context policy, config) unchanged. Equivalent to
    /// `self.clone().with_event_sink(sink).run(...)`.
    pub async fn run_with_events(
        &self,
        initial: AgentState,
        max_steps: Option<usize>,
        cancel: Option<CancellationToken>,
        sink: Arc<dyn EventSink>,
    ) -> Result<AgentState, AgentError> {
        self.clone().with_event_sink(sink).run(initial, max_steps, cancel).await
    }

    /// `run_with_events` backed by an in-memory [`CollectingSink`]: returns
    /// the final state alongside every event emitted during the run, in
    /// emission order.
    pub async fn run_collecting_events(
        &self,
        initial: AgentState,
        max_steps: Option<usize>,
        cancel: Option<CancellationToken>,
    ) -> Result<(AgentState, Vec<AgentEvent>), AgentError> {
        let sink = Arc::new(CollectingSink::new());
        let result = self.run_with_events(initial, max_steps, cancel, sink.clone()).await?;
        Ok((result, sink.events()))
    }

    /// Combined tool schema list for a state: its own tool registry plus one
    /// synthetic tool per registered handoff.
    fn effective_tool_schemas(state: &AgentState) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = state
            .tool_registry_handle
            .names()
            .into_iter()
            .filter_map(|name| state.tool_registry_handle.get(name))
            .map(|def| ToolSchema {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters_schema: def.parameters_schema.clone(),
            })
            .collect();

        for (handoff_id, handoff) in &state.handoffs {
            let description = match &handoff.transfer_reason {
                Some(reason) => format!("Transfer the conversation to another agent. {}", reason),
                None => "Transfer the conversation to another agent.".to_string(),
            };
            schemas.push(ToolSchema {
                name: handoff_id.clone(),
                description,
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "reason": { "type": "string" } },
                    "required": ["reason"]
                }),
            });
        }
        schemas
    }

    /// Build the API message list: the system message (if set) prepended to
    /// the conversation.
    fn api_messages(state: &AgentState) -> Vec<Message> {
        state.conversation.messages().to_vec()
    }

    /// Advance `state` by exactly one step. `step_index` is used only for the
    /// `StepStarted`/`StepCompleted` event pair. `cancel`, when set, is polled
    /// mid-batch during a `WaitingForTools` step (see [`run_tool_step`](Self::run_tool_step)).
    pub async fn run_step(
        &self,
        state: &AgentState,
        step_index: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<AgentState, AgentError> {
        match &state.status {
            AgentStatus::WaitingForTools => self.run_tool_step(state, cancel).await,
            AgentStatus::InProgress => self.run_llm_step(state, step_index).await,
            other => Ok(state.with_status(other.clone())),
        }
    }

    async fn run_llm_step(&self, state: &AgentState, step_index: usize) -> Result<AgentState, AgentError> {
        self.emit(AgentEvent::StepStarted {
            timestamp: Utc::now(),
            step_index,
        })
        .await;

        let messages = Self::api_messages(state);
        let tools = Self::effective_tool_schemas(state);

        let call_result = if self.streaming {
            let sink = self.event_sink.clone();
            let on_chunk = move |chunk: CompletionChunk| -> ChunkFuture<'_> {
                let sink = sink.clone();
                Box::pin(async move {
                    if let Some(delta) = chunk.content {
                        if !delta.is_empty() {
                            sink.on_event(&AgentEvent::TextDelta {
                                timestamp: Utc::now(),
                                delta,
                            })
                            .await;
                        }
                    }
                })
            };
            self.llm
                .stream_complete(&messages, &state.completion_options, &tools, &on_chunk)
                .await
        } else {
            self.llm.complete(&messages, &state.completion_options, &tools).await
        };

        let completion = match call_result {
            Ok(completion) => completion,
            Err(e) => {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("step {}: LLM call failed: {}", step_index, e);
                }
                self.emit(AgentEvent::AgentFailed {
                    timestamp: Utc::now(),
                    error: e.to_string(),
                })
                .await;
                return Ok(state
                    .with_status(AgentStatus::Failed {
                        error_message: e.to_string(),
                    })
                    .append_log(format!("LLM call failed: {}", e)));
            }
        };

        self.emit(AgentEvent::TextComplete {
            timestamp: Utc::now(),
            full_text: completion.content.clone(),
        })
        .await;

        let next = state
            .append_message(Message::assistant(completion.content.clone(), completion.tool_calls.clone()))?
            .append_log(format!("step {} LLM call completed", step_index));

        let handoff_call = completion
            .tool_calls
            .iter()
            .find(|call| next.handoffs.contains_key(&call.name));

        let next = if let Some(handoff_call) = handoff_call {
            let reason = parse_handoff_reason(&handoff_call.arguments_json);
            let abandoned: Vec<&str> = completion
                .tool_calls
                .iter()
                .filter(|c| c.id != handoff_call.id)
                .map(|c| c.name.as_str())
                .collect();
            let next = if !abandoned.is_empty() {
                next.append_log(format!("abandoned tool call(s) due to handoff: {:?}", abandoned))
            } else {
                next
            };
            next.with_status(AgentStatus::HandoffRequested {
                handoff_id: handoff_call.name.clone(),
                reason,
            })
        } else if completion.tool_calls.is_empty() {
            if let Err(e) = self.validate_output(&completion.content).await {
                self.emit(AgentEvent::AgentFailed {
                    timestamp: Utc::now(),
                    error: e.to_string(),
                })
                .await;
                return Ok(next
                    .with_status(AgentStatus::Failed {
                        error_message: e.to_string(),
                    })
                    .append_log(format!("output guardrail rejected response: {}", e)));
            }
            let completed = next.with_status(AgentStatus::Complete);
            self.emit(AgentEvent::AgentCompleted {
                timestamp: Utc::now(),
                final_state: completed.clone(),
            })
            .await;
            completed
        } else {
            next.with_status(AgentStatus::WaitingForTools)
        };

        self.emit(AgentEvent::StepCompleted {
            timestamp: Utc::now(),
            step_index,
        })
        .await;

        Ok(next)
    }

    /// Dispatch the pending tool batch. If `cancel` fires while the batch is
    /// in flight, the batch's results are discarded entirely and `state` is
    /// returned unchanged — the next loop iteration's top-of-loop check then
    /// finalizes the run as `Failed("cancelled")` rather than this step
    /// silently appending partial `Tool` messages for a run that's ending.
    async fn run_tool_step(
        &self,
        state: &AgentState,
        cancel: Option<&CancellationToken>,
    ) -> Result<AgentState, AgentError> {
        let assistant_calls: Vec<ToolCall> = state
            .conversation
            .last_assistant_message()
            .map(|m| m.tool_calls().to_vec())
            .unwrap_or_default();

        let requests: Vec<ToolCallRequest> = assistant_calls
            .iter()
            .map(|c| ToolCallRequest::new(c.name.clone(), c.arguments_json.clone()))
            .collect();

        for call in &assistant_calls {
            let arguments: serde_json::Value =
                serde_json::from_str(&call.arguments_json).unwrap_or(serde_json::Value::Null);
            self.emit(AgentEvent::ToolCallStarted {
                timestamp: Utc::now(),
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                arguments,
            })
            .await;
        }

        log::debug!(
            "dispatching {} tool call(s) under {:?}",
            assistant_calls.len(),
            self.strategy
        );
        let results = state
            .tool_registry_handle
            .execute_all(requests, self.strategy, cancel)
            .await;

        if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
            log::warn!("tool batch cancelled mid-flight; discarding its results");
            return Ok(state.clone());
        }

        let mut next = state.clone();
        for (call, result) in assistant_calls.iter().zip(results.into_iter()) {
            let (content, emitted_result) = match result {
                Ok(value) => (value.to_string(), Ok(value)),
                Err(e) => {
                    let message = e.to_string();
                    (
                        serde_json::json!({ "error": message }).to_string(),
                        Err(message),
                    )
                }
            };
            self.emit(AgentEvent::ToolCallCompleted {
                timestamp: Utc::now(),
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                result: emitted_result,
            })
            .await;
            next = next.append_message(Message::tool(content, call.id.clone()))?;
        }

        Ok(next.with_status(AgentStatus::InProgress).append_log("tool batch executed"))
    }

    /// Run `initial` to completion: `Complete`, `Failed`, or the resolved
    /// result of a `HandoffRequested` transition. `max_steps` defaults to
    /// [`EngineConfig::default_max_steps`] and counts LLM invocations only.
    ///
    /// Validates `initial.initial_query` against the configured input
    /// guardrails before the first LLM call — the same boundary
    /// [`continue_conversation`](Self::continue_conversation) applies to its
    /// new user message, since per §4.3 an initial query is just as much an
    /// externally-supplied step as a continuation.
    pub async fn run(
        &self,
        initial: AgentState,
        max_steps: Option<usize>,
        cancel: Option<CancellationToken>,
    ) -> Result<AgentState, AgentError> {
        if let Some(query) = &initial.initial_query {
            self.validate_input(query).await?;
        }
        self.run_with_depth(initial, max_steps, cancel, 0).await
    }

    fn run_with_depth<'a>(
        &'a self,
        initial: AgentState,
        max_steps: Option<usize>,
        cancel: Option<CancellationToken>,
        depth: usize,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<AgentState, AgentError>> + Send + 'a>> {
        Box::pin(async move {
            let max_steps = max_steps.unwrap_or(self.config.default_max_steps);
            let initial_query = initial.initial_query.clone().unwrap_or_default();
            self.emit(AgentEvent::AgentStarted {
                timestamp: Utc::now(),
                query: initial_query,
            })
            .await;

            log::info!("run starting at depth {} (max_steps={})", depth, max_steps);

            let mut state = initial;
            let mut llm_calls = 0usize;
            let mut step_index = 0usize;

            loop {
                if state.status.is_terminal() {
                    log::info!("run finished at depth {} after {} LLM call(s)", depth, llm_calls);
                    return Ok(state);
                }
                if let AgentStatus::HandoffRequested { handoff_id, reason } = state.status.clone() {
                    log::info!("run at depth {} yielding to handoff {}", depth, handoff_id);
                    return self.resolve_handoff(state, handoff_id, reason, max_steps, cancel, depth).await;
                }
                if let Some(cancel) = &cancel {
                    if cancel.is_cancelled() {
                        log::warn!("run cancelled at depth {} after {} LLM call(s)", depth, llm_calls);
                        let cancelled = state
                            .with_status(AgentStatus::Failed {
                                error_message: "cancelled".to_string(),
                            })
                            .append_log("run cancelled");
                        self.emit(AgentEvent::AgentFailed {
                            timestamp: Utc::now(),
                            error: "cancelled".to_string(),
                        })
                        .await;
                        return Ok(cancelled);
                    }
                }

                let is_llm_step = matches!(state.status, AgentStatus::InProgress);
                if is_llm_step && llm_calls >= max_steps {
                    log::warn!("run at depth {} exhausted its budget of {} step(s)", depth, max_steps);
                    let exhausted = state
                        .with_status(AgentStatus::Failed {
                            error_message: "max steps reached".to_string(),
                        })
                        .append_log("step budget exhausted");
                    self.emit(AgentEvent::AgentFailed {
                        timestamp: Utc::now(),
                        error: "max steps reached".to_string(),
                    })
                    .await;
                    return Ok(exhausted);
                }

                state = self.run_step(&state, step_index, cancel.as_ref()).await?;
                step_index += 1;
                if is_llm_step {
                    llm_calls += 1;
                }
            }
        })
    }

    async fn resolve_handoff(
        &self,
        source: AgentState,
        handoff_id: String,
        reason: Option<String>,
        max_steps: usize,
        cancel: Option<CancellationToken>,
        depth: usize,
    ) -> Result<AgentState, AgentError> {
        if depth >= self.config.max_handoff_depth {
            return Ok(source
                .with_status(AgentStatus::Failed {
                    error_message: "handoff depth exceeded".to_string(),
                })
                .append_log(format!(
                    "handoff depth exceeded at {} (limit {})",
                    handoff_id, self.config.max_handoff_depth
                )));
        }

        let handoff = source
            .handoffs
            .get(&handoff_id)
            .ok_or_else(|| AgentError::from(HandoffError::UnknownHandoff(handoff_id.clone())))?
            .clone();

        self.emit(AgentEvent::HandoffStarted {
            timestamp: Utc::now(),
            from_id: source
                .system_message
                .clone()
                .unwrap_or_else(|| "root".to_string()),
            to_id: handoff.target_agent.id.clone(),
            reason: reason.clone(),
        })
        .await;

        let target = build_handoff_target(&source, &handoff, reason.as_deref());
        let target = target.append_log(format!(
            "Received handoff: {}",
            reason.clone().unwrap_or_default()
        ));

        self.run_with_depth(target, Some(max_steps), cancel, depth + 1).await
    }

    /// Permitted only if `previous.status` is `Complete` or `Failed`.
    /// Appends a `User` message, clears `logs`, resets status to
    /// `InProgress`, optionally prunes via the configured context-window
    /// policy, then runs.
    pub async fn continue_conversation(
        &self,
        previous: AgentState,
        new_user_message: impl Into<String>,
        max_steps: Option<usize>,
        cancel: Option<CancellationToken>,
        prune_config: Option<PruneConfig>,
    ) -> Result<AgentState, AgentError> {
        if !previous.status.is_terminal() {
            return Err(AgentError::from(PreconditionViolation(
                "incomplete state".to_string(),
            )));
        }

        let new_user_message = new_user_message.into();
        self.validate_input(&new_user_message).await?;

        let conversation = self.context_policy.prune(
            &previous.conversation,
            &prune_config.unwrap_or_default(),
        );

        let next = AgentState {
            conversation,
            ..previous.clone()
        }
        .append_message(Message::user(new_user_message))?
        .clear_logs()
        .with_status(AgentStatus::InProgress);

        // Bypasses `run`'s own initial-query check: `next.initial_query` is
        // unchanged from `previous`, already validated (either by a prior
        // `run` call or a prior `continue_conversation` call), and the new
        // message just appended was validated above.
        self.run_with_depth(next, max_steps, cancel, 0).await
    }

    /// Left fold over `follow_ups`, applying
    /// [`continue_conversation`](Self::continue_conversation) to each in
    /// turn. Stops at the first failure and returns it.
    pub async fn run_multi_turn(
        &self,
        initial: AgentState,
        follow_ups: Vec<String>,
        max_steps: Option<usize>,
    ) -> Result<AgentState, AgentError> {
        let mut state = initial;
        for follow_up in follow_ups {
            state = self
                .continue_conversation(state, follow_up, max_steps, None, None)
                .await?;
            if matches!(state.status, AgentStatus::Failed { .. }) {
                return Ok(state);
            }
        }
        Ok(state)
    }
}

fn parse_handoff_reason(arguments_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(arguments_json).ok()?;
    value.get("reason")?.as_str().map(|s| s.to_string())
}

/// Build the fresh [`AgentState`] a handoff transitions into, per §4.5:
/// the conversation is copied in full or trimmed to the last user message
/// depending on `preserve_context`; the system message transfers only if
/// `transfer_system_message` is set and the target has none of its own.
fn build_handoff_target(
    source: &AgentState,
    handoff: &crate::handoff::Handoff,
    _reason: Option<&str>,
) -> AgentState {
    let target: &AgentTemplate = &handoff.target_agent;

    let carried_conversation = if handoff.preserve_context {
        source.conversation.clone()
    } else {
        let last_user = source
            .conversation
            .by_role(|m| matches!(m, Message::User { .. }))
            .last()
            .cloned()
            .cloned();
        match last_user {
            Some(message) => crate::message::Conversation::new()
                .append(message)
                .expect("a lone user message always satisfies conversation invariants"),
            None => crate::message::Conversation::new(),
        }
    };

    let system_message = target.system_message.clone().or_else(|| {
        if handoff.transfer_system_message {
            source.system_message.clone()
        } else {
            None
        }
    });

    let mut conversation = crate::message::Conversation::new();
    if let Some(system) = &system_message {
        conversation = conversation
            .append(Message::system(system.clone()))
            .expect("fresh conversation accepts a leading system message");
    }
    for message in carried_conversation.messages() {
        if message.is_system() {
            continue;
        }
        conversation = conversation
            .append(message.clone())
            .expect("messages carried from a valid conversation remain valid once re-appended");
    }

    AgentState {
        conversation,
        tool_registry_handle: target.tool_registry_handle.clone(),
        initial_query: source.initial_query.clone(),
        status: AgentStatus::InProgress,
        logs: Vec::new(),
        system_message,
        completion_options: target.completion_options.clone(),
        handoffs: target.handoffs.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::Completion;
    use crate::tool_registry::ToolDefinition;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// A scripted LLM client: each call to `complete` returns the next entry
    /// in a fixed script, regardless of input.
    struct ScriptedLlm {
        script: Mutex<Vec<Completion>>,
    }

    impl ScriptedLlm {
        fn new(script: Vec<Completion>) -> Self {
            Self {
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(
            &self,
            _messages: &[Message],
            _options: &CompletionOptions,
            _tools: &[ToolSchema],
        ) -> Result<Completion, LlmError> {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(LlmError("script exhausted".to_string()));
            }
            Ok(script.remove(0))
        }
    }

    fn registry_with_weather() -> Arc<ToolRegistry> {
        Arc::new(
            ToolRegistry::new(vec![ToolDefinition::new(
                "get_weather",
                "Look up the weather for a city",
                serde_json::json!({
                    "type": "object",
                    "properties": { "city": { "type": "string" } },
                    "required": ["city"]
                }),
                Arc::new(|args: serde_json::Value| {
                    Ok(serde_json::json!({ "tempC": 12, "city": args["city"] }))
                }),
            )])
            .unwrap(),
        )
    }

    // S1 — no-tool completion.
    #[tokio::test]
    async fn s1_no_tool_completion() {
        let llm = Arc::new(ScriptedLlm::new(vec![Completion::text("hello")]));
        let engine = Engine::new(llm);
        let registry = Arc::new(ToolRegistry::new(vec![]).unwrap());
        let state = AgentState::initialize(None, "hi", registry, CompletionOptions::default(), Default::default());

        let result = engine.run(state, None, None).await.unwrap();
        assert_eq!(result.status, AgentStatus::Complete);
        assert_eq!(result.conversation.len(), 2);
    }

    // S2 — single tool turn.
    #[tokio::test]
    async fn s2_single_tool_turn() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Completion::text("").with_tool_calls(vec![ToolCall::new(
                "t1",
                "get_weather",
                r#"{"city":"Paris"}"#,
            )]),
            Completion::text("It's 12\u{00B0}C in Paris."),
        ]));
        let engine = Engine::new(llm);
        let state = AgentState::initialize(
            None,
            "weather in Paris?",
            registry_with_weather(),
            CompletionOptions::default(),
            Default::default(),
        );

        let result = engine.run(state, None, None).await.unwrap();
        assert_eq!(result.status, AgentStatus::Complete);
        assert_eq!(result.conversation.len(), 4);
    }

    // S3 — parallel tool turn: three tool calls preserved in input order.
    #[tokio::test]
    async fn s3_parallel_tool_turn_preserves_order() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Completion::text("").with_tool_calls(vec![
                ToolCall::new("t1", "get_weather", r#"{"city":"Paris"}"#),
                ToolCall::new("t2", "get_weather", r#"{"city":"London"}"#),
                ToolCall::new("t3", "get_weather", r#"{"city":"Tokyo"}"#),
            ]),
            Completion::text("done"),
        ]));
        let engine = Engine::new(llm).with_strategy(ExecutionStrategy::Parallel);
        let state = AgentState::initialize(
            None,
            "weather tour",
            registry_with_weather(),
            CompletionOptions::default(),
            Default::default(),
        );

        let result = engine.run(state, None, None).await.unwrap();
        assert_eq!(result.status, AgentStatus::Complete);

        let tool_messages: Vec<&Message> = result
            .conversation
            .messages()
            .iter()
            .filter(|m| matches!(m, Message::Tool { .. }))
            .collect();
        assert_eq!(tool_messages.len(), 3);
        let ids: Vec<&str> = tool_messages
            .iter()
            .map(|m| match m {
                Message::Tool { tool_call_id, .. } => tool_call_id.as_str(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    // S4 — handoff.
    #[tokio::test]
    async fn s4_handoff_transfers_to_target_agent() {
        let refund_template = Arc::new(AgentTemplate {
            id: "refund_agent".to_string(),
            system_message: Some("You handle refunds.".to_string()),
            completion_options: CompletionOptions::default(),
            handoffs: HashMap::new(),
            tool_registry_handle: Arc::new(ToolRegistry::new(vec![]).unwrap()),
        });
        let handoff = crate::handoff::Handoff::new(refund_template.clone()).with_transfer_reason("refunds");
        let handoff_id = handoff.id();

        let mut handoffs = HashMap::new();
        handoffs.insert(handoff_id.clone(), handoff);

        let llm = Arc::new(ScriptedLlm::new(vec![
            Completion::text("").with_tool_calls(vec![ToolCall::new(
                "h1",
                handoff_id.clone(),
                r#"{"reason":"refund"}"#,
            )]),
            Completion::text("Refund processed."),
        ]));

        let engine = Engine::new(llm);
        let state = AgentState::initialize(
            Some("You triage requests.".to_string()),
            "I want a refund for #12345",
            Arc::new(ToolRegistry::new(vec![]).unwrap()),
            CompletionOptions::default(),
            handoffs,
        );

        let result = engine.run(state, None, None).await.unwrap();
        assert_eq!(result.status, AgentStatus::Complete);
        assert_eq!(result.system_message.as_deref(), Some("You handle refunds."));
    }

    // S5 — max-steps exhaustion.
    #[tokio::test]
    async fn s5_max_steps_exhaustion() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Completion::text("").with_tool_calls(vec![ToolCall::new("t1", "get_weather", r#"{"city":"Paris"}"#)]),
            Completion::text("").with_tool_calls(vec![ToolCall::new("t2", "get_weather", r#"{"city":"Paris"}"#)]),
            Completion::text("never reached"),
        ]));
        let engine = Engine::new(llm);
        let state = AgentState::initialize(
            None,
            "never stop",
            registry_with_weather(),
            CompletionOptions::default(),
            Default::default(),
        );

        let result = engine.run(state, Some(2), None).await.unwrap();
        assert_eq!(
            result.status,
            AgentStatus::Failed {
                error_message: "max steps reached".to_string()
            }
        );
    }

    // S6 — continuation refused.
    #[tokio::test]
    async fn s6_continuation_refused_while_in_progress() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let engine = Engine::new(llm);
        let state = AgentState::initialize(
            None,
            "hi",
            Arc::new(ToolRegistry::new(vec![]).unwrap()),
            CompletionOptions::default(),
            Default::default(),
        );
        assert_eq!(state.status, AgentStatus::InProgress);

        let err = engine
            .continue_conversation(state, "more", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Precondition(_)));
    }

    #[tokio::test]
    async fn run_collecting_events_returns_the_final_state_and_its_event_log() {
        let llm = Arc::new(ScriptedLlm::new(vec![Completion::text("hello")]));
        let engine = Engine::new(llm);
        let state = AgentState::initialize(
            None,
            "hi",
            Arc::new(ToolRegistry::new(vec![]).unwrap()),
            CompletionOptions::default(),
            Default::default(),
        );

        let (result, events) = engine.run_collecting_events(state, None, None).await.unwrap();
        assert_eq!(result.status, AgentStatus::Complete);
        assert!(events.iter().any(|e| matches!(e, AgentEvent::AgentStarted { .. })));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::AgentCompleted { .. })));
    }

    #[tokio::test]
    async fn run_with_events_does_not_disturb_the_engines_own_default_sink() {
        let llm = Arc::new(ScriptedLlm::new(vec![Completion::text("hello"), Completion::text("hello again")]));
        let default_sink = Arc::new(CollectingSink::new());
        let engine = Engine::new(llm).with_event_sink(default_sink.clone() as Arc<dyn EventSink>);

        let scoped_sink = Arc::new(CollectingSink::new());
        let state = AgentState::initialize(
            None,
            "hi",
            Arc::new(ToolRegistry::new(vec![]).unwrap()),
            CompletionOptions::default(),
            Default::default(),
        );
        engine
            .run_with_events(state, None, None, scoped_sink.clone() as Arc<dyn EventSink>)
            .await
            .unwrap();

        assert!(!scoped_sink.events().is_empty());
        assert!(default_sink.events().is_empty());
    }

    /// An `LlmClient` that only implements `complete`; exercises the default
    /// `stream_complete` fallback (single chunk, then the aggregated result).
    struct NonStreamingLlm {
        script: Mutex<Vec<Completion>>,
    }

    #[async_trait]
    impl LlmClient for NonStreamingLlm {
        async fn complete(
            &self,
            _messages: &[Message],
            _options: &CompletionOptions,
            _tools: &[ToolSchema],
        ) -> Result<Completion, LlmError> {
            let mut script = self.script.lock().unwrap();
            Ok(script.remove(0))
        }
    }

    #[tokio::test]
    async fn streaming_mode_emits_a_text_delta_via_the_default_fallback() {
        let llm = Arc::new(NonStreamingLlm {
            script: Mutex::new(vec![Completion::text("streamed hello")]),
        });
        let sink = Arc::new(CollectingSink::new());
        let engine = Engine::new(llm)
            .with_streaming(true)
            .with_event_sink(sink.clone() as Arc<dyn EventSink>);

        let state = AgentState::initialize(
            None,
            "hi",
            Arc::new(ToolRegistry::new(vec![]).unwrap()),
            CompletionOptions::default(),
            Default::default(),
        );
        let result = engine.run(state, None, None).await.unwrap();
        assert_eq!(result.status, AgentStatus::Complete);

        let events = sink.events();
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::TextDelta { delta, .. } if delta == "streamed hello"
        )));
    }

    use crate::error::GuardrailError;
    use crate::guardrail::{LengthCheck, LlmAsJudgeGuardrail, ValidationMode};

    #[tokio::test]
    async fn initial_query_is_rejected_by_input_guardrails_before_any_llm_call() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let input_guardrails: CompositeGuardrail<dyn InputGuardrail> =
            CompositeGuardrail::new(vec![Box::new(LengthCheck::new(1, 5))], ValidationMode::All);
        let engine = Engine::new(llm).with_input_guardrails(input_guardrails);

        let state = AgentState::initialize(
            None,
            "this query is much too long to pass",
            Arc::new(ToolRegistry::new(vec![]).unwrap()),
            CompletionOptions::default(),
            Default::default(),
        );

        let err = engine.run(state, None, None).await.unwrap_err();
        assert!(matches!(err, AgentError::Guardrail(_)));
    }

    /// An `LlmClient` that always scores its input `1.0`; stands in for the
    /// judge `LlmAsJudgeGuardrail` calls internally.
    struct AlwaysApproveJudge;

    #[async_trait]
    impl LlmClient for AlwaysApproveJudge {
        async fn complete(
            &self,
            _messages: &[Message],
            _options: &CompletionOptions,
            _tools: &[ToolSchema],
        ) -> Result<Completion, LlmError> {
            Ok(Completion::text("1.0"))
        }
    }

    struct AlwaysRejectJudge;

    #[async_trait]
    impl LlmClient for AlwaysRejectJudge {
        async fn complete(
            &self,
            _messages: &[Message],
            _options: &CompletionOptions,
            _tools: &[ToolSchema],
        ) -> Result<Completion, LlmError> {
            Ok(Completion::text("0.0"))
        }
    }

    #[tokio::test]
    async fn async_input_guardrail_is_actually_invoked_by_run() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let judge = Arc::new(LlmAsJudgeGuardrail::new(
            Arc::new(AlwaysRejectJudge),
            "is this on topic?",
            0.5,
        ));
        let engine = Engine::new(llm).with_async_input_guardrail(judge);

        let state = AgentState::initialize(
            None,
            "off topic nonsense",
            Arc::new(ToolRegistry::new(vec![]).unwrap()),
            CompletionOptions::default(),
            Default::default(),
        );

        let err = engine.run(state, None, None).await.unwrap_err();
        assert!(matches!(err, AgentError::Guardrail(GuardrailError::Rejected { .. })));
    }

    #[tokio::test]
    async fn async_output_guardrail_passes_a_completion_the_judge_approves() {
        let llm = Arc::new(ScriptedLlm::new(vec![Completion::text("here is my answer")]));
        let judge = Arc::new(LlmAsJudgeGuardrail::new(
            Arc::new(AlwaysApproveJudge),
            "is this helpful?",
            0.5,
        ));
        let engine = Engine::new(llm).with_async_output_guardrail(judge);

        let state = AgentState::initialize(
            None,
            "hi",
            Arc::new(ToolRegistry::new(vec![]).unwrap()),
            CompletionOptions::default(),
            Default::default(),
        );

        let result = engine.run(state, None, None).await.unwrap();
        assert_eq!(result.status, AgentStatus::Complete);
    }

    #[tokio::test]
    async fn async_output_guardrail_turns_a_rejected_completion_into_a_failure() {
        let llm = Arc::new(ScriptedLlm::new(vec![Completion::text("here is my answer")]));
        let judge = Arc::new(LlmAsJudgeGuardrail::new(
            Arc::new(AlwaysRejectJudge),
            "is this helpful?",
            0.5,
        ));
        let engine = Engine::new(llm).with_async_output_guardrail(judge);

        let state = AgentState::initialize(
            None,
            "hi",
            Arc::new(ToolRegistry::new(vec![]).unwrap()),
            CompletionOptions::default(),
            Default::default(),
        );

        let result = engine.run(state, None, None).await.unwrap();
        assert!(matches!(result.status, AgentStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn cancellation_mid_batch_stops_dispatch_of_remaining_tool_calls() {
        let calls: Vec<ToolCall> = (0..6)
            .map(|i| ToolCall::new(format!("t{}", i), "slow", "{}"))
            .collect();
        let llm = Arc::new(ScriptedLlm::new(vec![
            Completion::text("").with_tool_calls(calls),
            Completion::text("never reached"),
        ]));
        let slow = ToolDefinition::new(
            "slow",
            "sleeps long enough for a cancellation fired mid-run to land before the batch finishes",
            serde_json::json!({"type": "object", "properties": {}}),
            Arc::new(|_args: serde_json::Value| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(serde_json::json!("ok"))
            }),
        );
        let registry = Arc::new(ToolRegistry::new(vec![slow]).unwrap());
        let engine = Engine::new(llm).with_strategy(ExecutionStrategy::ParallelWithLimit(1));

        let state = AgentState::initialize(
            None,
            "run six slow tools",
            registry,
            CompletionOptions::default(),
            Default::default(),
        );

        // Fires after the LLM step has already transitioned the run into
        // WaitingForTools and the first tool task is underway, so the
        // cancellation is observed inside the batch rather than pre-empting
        // the step before it starts.
        let cancel = CancellationToken::new();
        let cancel_trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            cancel_trigger.cancel();
        });

        let result = engine.run(state, None, Some(cancel)).await.unwrap();
        assert_eq!(
            result.status,
            AgentStatus::Failed {
                error_message: "cancelled".to_string()
            }
        );
        // The tool batch itself was discarded wholesale rather than appending
        // partial Tool messages for a run that's ending: only the original
        // user message and the assistant's tool-call turn remain.
        assert_eq!(result.conversation.len(), 2);
    }
}
