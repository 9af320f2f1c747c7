//! Engine configuration.
//!
//! Provides the [`EngineConfig`] struct for the execution engine's step and
//! handoff-depth budgets. Users construct this manually — no TOML, YAML, or
//! other config-file parsing dependencies are introduced; a run that wants
//! to load these from a file does so in the caller, not in this crate.
//!
//! # Example
//!
//! ```rust
//! use agentcore::config::EngineConfig;
//!
//! let config = EngineConfig::default();
//! assert_eq!(config.default_max_steps, 10);
//!
//! let config = EngineConfig {
//!     default_max_steps: 25,
//!     max_handoff_depth: 3,
//!     ..EngineConfig::default()
//! };
//! ```

use crate::tool_registry::ExecutionStrategy;

/// Global configuration for the execution engine.
///
/// Intentionally minimal: the only knobs every run needs regardless of
/// provider or deployment. Everything else (guardrails, context policy,
/// event sink, tool registry) is wired through [`crate::engine::Engine`]'s
/// builder methods instead of living here.
#[derive(Clone)]
pub struct EngineConfig {
    /// How many LLM calls [`crate::engine::Engine::run`] will make before
    /// giving up with `AgentStatus::Failed`, unless the caller overrides it
    /// for a particular call.
    pub default_max_steps: usize,
    /// How many nested handoffs a single `run` will follow before failing
    /// with `AgentStatus::Failed`. Guards against agents that hand off to
    /// each other in a cycle.
    pub max_handoff_depth: usize,
    /// Strategy used for a tool batch when the engine is not otherwise
    /// configured with one via `Engine::with_strategy`.
    pub default_execution_strategy: ExecutionStrategy,
}

impl Default for EngineConfig {
    /// Ten LLM calls, five handoff hops, sequential tool execution.
    ///
    /// # Example
    ///
    /// ```rust
    /// use agentcore::config::EngineConfig;
    ///
    /// let config = EngineConfig::default();
    /// assert_eq!(config.default_max_steps, 10);
    /// assert_eq!(config.max_handoff_depth, 5);
    /// ```
    fn default() -> Self {
        Self {
            default_max_steps: 10,
            max_handoff_depth: 5,
            default_execution_strategy: ExecutionStrategy::Sequential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_budgets() {
        let config = EngineConfig::default();
        assert_eq!(config.default_max_steps, 10);
        assert_eq!(config.max_handoff_depth, 5);
        assert_eq!(config.default_execution_strategy, ExecutionStrategy::Sequential);
    }
}
