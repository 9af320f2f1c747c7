//! Tool registry: named tool definitions plus dispatch under a chosen
//! concurrency strategy.
//!
//! # Architecture
//!
//! ```text
//! ToolRegistry → name → ToolDefinition → handler: JSON -> Result<JSON, ToolError>
//!                                       ↑
//!                         parameters_schema validated first (schema.rs)
//! ```
//!
//! # Example
//!
//! ```rust
//! use agentcore::tool_registry::{ExecutionStrategy, ToolCallRequest, ToolDefinition, ToolRegistry};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let echo = ToolDefinition::new(
//!     "echo",
//!     "Echoes its input back",
//!     json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}),
//!     Arc::new(|args: serde_json::Value| Ok(args)),
//! );
//! let registry = ToolRegistry::new(vec![echo]).unwrap();
//! let results = registry
//!     .execute_all(
//!         vec![ToolCallRequest::new("echo", r#"{"text":"hi"}"#)],
//!         ExecutionStrategy::Sequential,
//!         None,
//!     )
//!     .await;
//! assert!(results[0].is_ok());
//! # }
//! ```

use crate::engine::CancellationToken;
use crate::error::{RegistryError, ToolError};
use crate::schema;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A type-erased, synchronous tool handler.
///
/// Handlers are erased to this common signature the way the registry sees
/// them; strongly typed handler builders may live at the call site, but the
/// registry itself only ever invokes this shape.
pub type ToolHandler = Arc<dyn Fn(Value) -> Result<Value, ToolError> + Send + Sync>;

/// Static description of a callable tool: its name, human-readable
/// description, JSON-Schema-subset parameter shape, and handler.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
    pub handler: ToolHandler,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema,
            handler,
        }
    }
}

/// A single request to invoke a named tool with raw JSON arguments.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments_json: String,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments_json: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments_json: arguments_json.into(),
        }
    }
}

/// How a batch of [`ToolCallRequest`]s is dispatched by [`ToolRegistry::execute_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Each request starts only after the previous one completes.
    Sequential,
    /// All requests are dispatched at once; results are re-ordered to match input.
    Parallel,
    /// At most `n` requests are in flight at any instant; fair FIFO on the rest.
    ParallelWithLimit(usize),
}

/// Holds tool definitions and dispatches calls against them.
///
/// Constructed once per run set and treated as read-only for the lifetime of
/// a run — the only internal synchronisation is the semaphore used by
/// [`ExecutionStrategy::ParallelWithLimit`], which is entirely encapsulated.
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    /// Build a registry from a list of tool definitions. Fails if two
    /// entries share a `name`.
    pub fn new(definitions: Vec<ToolDefinition>) -> Result<Self, RegistryError> {
        let mut tools = HashMap::with_capacity(definitions.len());
        for def in definitions {
            if tools.contains_key(&def.name) {
                return Err(RegistryError::DuplicateTool(def.name));
            }
            tools.insert(def.name.clone(), def);
        }
        Ok(Self { tools })
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Dispatch a single request synchronously: look up the tool, validate
    /// arguments against its schema, then invoke the handler.
    pub fn execute(&self, request: &ToolCallRequest) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(&request.name)
            .ok_or_else(|| ToolError::UnknownTool(request.name.clone()))?;

        let arguments: Value = serde_json::from_str(&request.arguments_json)
            .map_err(|e| ToolError::ArgumentParse(e.to_string()))?;

        schema::validate(&tool.parameters_schema, &arguments).map_err(|e| {
            ToolError::SchemaMismatch {
                path: e.path,
                message: e.message,
            }
        })?;

        (tool.handler)(arguments)
    }

    /// Same dispatch as [`execute`](Self::execute) but run on the async
    /// scheduler, for uniformity with [`execute_all`](Self::execute_all).
    pub async fn execute_async(&self, request: &ToolCallRequest) -> Result<Value, ToolError> {
        self.execute(request)
    }

    /// Run a batch of requests under the given strategy. The returned vector
    /// has the same length and order as `requests` regardless of the
    /// strategy or physical completion order; per-call failures occupy their
    /// slot without failing the batch as a whole.
    ///
    /// `cancel`, when set, is polled as each task in a `Parallel`/
    /// `ParallelWithLimit` batch finishes, so a cancellation observed mid-batch
    /// aborts the remaining in-flight tasks instead of waiting out the whole
    /// batch. `Sequential` checks it between requests for the same reason.
    pub async fn execute_all(
        &self,
        requests: Vec<ToolCallRequest>,
        strategy: ExecutionStrategy,
        cancel: Option<&CancellationToken>,
    ) -> Vec<Result<Value, ToolError>> {
        match strategy {
            ExecutionStrategy::Sequential => {
                let mut results = Vec::with_capacity(requests.len());
                for request in &requests {
                    if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
                        results.push(Err(ToolError::HandlerFailed("tool call cancelled".to_string())));
                        continue;
                    }
                    results.push(self.execute(request));
                }
                results
            }
            ExecutionStrategy::Parallel => self.execute_parallel(requests, None, cancel).await,
            ExecutionStrategy::ParallelWithLimit(limit) => {
                self.execute_parallel(requests, Some(limit), cancel).await
            }
        }
    }

    /// Shared implementation for `Parallel` and `ParallelWithLimit`, grounded
    /// on the tokio::spawn + ordered-collect fan-out used for concurrent task
    /// batches elsewhere in this crate's lineage: every request gets its own
    /// task, an optional semaphore permit bounds how many run at once, and
    /// results are written back into the slot matching their original index
    /// so input order survives regardless of completion order.
    ///
    /// Every task is spawned up front (there is no cheaper point to hold
    /// dispatch), but `cancel` is checked as each `JoinHandle` resolves; once
    /// set, every handle not yet awaited is aborted and its slot filled with a
    /// cancellation error instead of being awaited to completion.
    async fn execute_parallel(
        &self,
        requests: Vec<ToolCallRequest>,
        limit: Option<usize>,
        cancel: Option<&CancellationToken>,
    ) -> Vec<Result<Value, ToolError>> {
        let semaphore = limit.map(|n| Arc::new(Semaphore::new(n.max(1))));
        let mut handles = Vec::with_capacity(requests.len());

        for (index, request) in requests.into_iter().enumerate() {
            let tool = self.tools.get(&request.name).cloned();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match &semaphore {
                    Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore closed")),
                    None => None,
                };
                let result = dispatch(tool, &request);
                (index, result)
            }));
        }

        let mut results: Vec<Option<Result<Value, ToolError>>> =
            (0..handles.len()).map(|_| None).collect();
        let mut cancelled = false;
        for handle in handles {
            if cancelled {
                handle.abort();
                continue;
            }
            if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
                cancelled = true;
                handle.abort();
                continue;
            }
            match handle.await {
                Ok((index, result)) => results[index] = Some(result),
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => panic!("tool task panicked: {}", join_err),
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(ToolError::HandlerFailed("tool call cancelled".to_string()))))
            .collect()
    }
}

fn dispatch(tool: Option<ToolDefinition>, request: &ToolCallRequest) -> Result<Value, ToolError> {
    let tool = tool.ok_or_else(|| ToolError::UnknownTool(request.name.clone()))?;
    let arguments: Value = serde_json::from_str(&request.arguments_json)
        .map_err(|e| ToolError::ArgumentParse(e.to_string()))?;
    schema::validate(&tool.parameters_schema, &arguments).map_err(|e| ToolError::SchemaMismatch {
        path: e.path,
        message: e.message,
    })?;
    (tool.handler)(arguments)
}
