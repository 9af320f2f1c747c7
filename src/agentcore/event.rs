//! Event stream emitted during a run.
//!
//! Provides a callback-based observability layer over a running agent.
//! Implement [`EventSink`] to receive real-time notifications about step
//! boundaries, tool calls, handoffs, and run completion.
//!
//! # Architecture
//!
//! Events flow through a single [`EventSink`] trait with one method,
//! [`on_event`](EventSink::on_event), defaulted to a no-op so callers only
//! override what they care about. `run_with_events` takes `Arc<dyn
//! EventSink>`; `run_collecting_events` wraps an in-memory accumulator around
//! the same sink so the event log can be inspected after the run completes.
//!
//! # Event Flow (one step with a single tool call)
//!
//! ```text
//! StepStarted { step_index }
//!   └─ ToolCallStarted { tool_call_id }
//!   └─ ToolCallCompleted { tool_call_id }
//! StepCompleted { step_index }
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use agentcore::event::{AgentEvent, EventSink};
//! use async_trait::async_trait;
//!
//! struct Logger;
//!
//! #[async_trait]
//! impl EventSink for Logger {
//!     async fn on_event(&self, event: &AgentEvent) {
//!         log::debug!("{:?}", event);
//!     }
//! }
//! ```

use crate::state::AgentState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Mutex;

/// Events emitted during a run of the execution engine.
///
/// Every variant carries a `timestamp`. Delivery is happens-before ordered
/// relative to the operation it describes: for a given tool call,
/// `ToolCallStarted` precedes `ToolCallCompleted`; for a given step,
/// `StepStarted` precedes any event for work within the step, which precedes
/// `StepCompleted`. Under `Parallel`/`ParallelWithLimit`, `ToolCallStarted`
/// events for different tools may interleave with each other, but the
/// started/completed pair for any single tool call is well-ordered.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    AgentStarted {
        timestamp: DateTime<Utc>,
        query: String,
    },
    StepStarted {
        timestamp: DateTime<Utc>,
        step_index: usize,
    },
    StepCompleted {
        timestamp: DateTime<Utc>,
        step_index: usize,
    },
    /// Only emitted by streaming-capable LLM providers.
    TextDelta {
        timestamp: DateTime<Utc>,
        delta: String,
    },
    TextComplete {
        timestamp: DateTime<Utc>,
        full_text: String,
    },
    ToolCallStarted {
        timestamp: DateTime<Utc>,
        tool_call_id: String,
        name: String,
        arguments: Value,
    },
    ToolCallCompleted {
        timestamp: DateTime<Utc>,
        tool_call_id: String,
        name: String,
        result: Result<Value, String>,
    },
    HandoffStarted {
        timestamp: DateTime<Utc>,
        from_id: String,
        to_id: String,
        reason: Option<String>,
    },
    AgentCompleted {
        timestamp: DateTime<Utc>,
        final_state: AgentState,
    },
    AgentFailed {
        timestamp: DateTime<Utc>,
        error: String,
    },
}

/// Receives [`AgentEvent`]s emitted during a run.
///
/// The default no-op implementation means a handler only needs to override
/// the events it cares about. Sink failures must never abort the run: the
/// engine treats `on_event` as fire-and-forget and does not propagate panics
/// from it back into the step loop.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, _event: &AgentEvent) {}
}

/// A sink that does nothing; used as the engine's default when the caller
/// does not ask for events.
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn on_event(&self, _event: &AgentEvent) {}
}

/// Accumulates every event it receives, in emission order, for inspection
/// after a run. Backs `run_collecting_events`.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<AgentEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of every event recorded so far, in emission order.
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().expect("event log mutex poisoned").clone()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn on_event(&self, event: &AgentEvent) {
        self.events
            .lock()
            .expect("event log mutex poisoned")
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collecting_sink_preserves_emission_order() {
        let sink = CollectingSink::new();
        sink.on_event(&AgentEvent::StepStarted {
            timestamp: Utc::now(),
            step_index: 0,
        })
        .await;
        sink.on_event(&AgentEvent::StepCompleted {
            timestamp: Utc::now(),
            step_index: 0,
        })
        .await;
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AgentEvent::StepStarted { .. }));
        assert!(matches!(events[1], AgentEvent::StepCompleted { .. }));
    }
}
