//! Context-window policy: an optional, pure pruning function consumed by
//! [`continue_conversation`](crate::engine::continue_conversation).
//!
//! Concrete compression/summarisation strategies are out of scope for this
//! crate (they belong to the context-compression subsystem this crate treats
//! as an external collaborator); what lives here is the trait seam plus the
//! cheapest possible reference implementation, [`NoopPolicy`], which the
//! engine uses when the caller supplies none.
//!
//! # Example
//!
//! ```rust
//! use agentcore::context_policy::{ContextWindowPolicy, NoopPolicy, PruneConfig};
//! use agentcore::message::{Conversation, Message};
//!
//! let conv = Conversation::new().append(Message::user("hi")).unwrap();
//! let policy = NoopPolicy;
//! let pruned = policy.prune(&conv, &PruneConfig::default());
//! assert_eq!(pruned, conv);
//! ```

use crate::message::Conversation;
use std::sync::Arc;

/// A caller-supplied pruning function, for [`PruneStrategy::Custom`].
pub type CustomPruneFn = Arc<dyn Fn(&Conversation, &PruneConfig) -> Conversation + Send + Sync>;

/// How a [`ContextWindowPolicy`] should decide what to keep.
///
/// The core never interprets these beyond passing them through to whatever
/// `ContextWindowPolicy` the caller supplies; `Custom` exists so a caller can
/// plug in an arbitrary strategy without this crate needing a variant per
/// provider's compression scheme.
#[derive(Clone)]
pub enum PruneStrategy {
    OldestFirst,
    MiddleOut,
    RecentTurnsOnly(usize),
    Custom(CustomPruneFn),
}

impl std::fmt::Debug for PruneStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PruneStrategy::OldestFirst => write!(f, "OldestFirst"),
            PruneStrategy::MiddleOut => write!(f, "MiddleOut"),
            PruneStrategy::RecentTurnsOnly(n) => write!(f, "RecentTurnsOnly({})", n),
            PruneStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Parameters governing a single `prune` call.
#[derive(Debug, Clone)]
pub struct PruneConfig {
    pub max_tokens: Option<u32>,
    pub max_messages: Option<usize>,
    pub preserve_system: bool,
    pub min_recent_turns: usize,
    pub strategy: PruneStrategy,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            max_tokens: None,
            max_messages: None,
            preserve_system: true,
            min_recent_turns: 1,
            strategy: PruneStrategy::OldestFirst,
        }
    }
}

/// A pure function from one conversation to a (possibly shorter) one.
///
/// The core treats this as a black box; it never inspects token counts or
/// strategy internals itself.
pub trait ContextWindowPolicy: Send + Sync {
    fn prune(&self, conversation: &Conversation, config: &PruneConfig) -> Conversation;
}

/// The cheapest strategy: never trims anything, never makes an extra call.
/// This is the engine's default when a caller supplies no policy.
pub struct NoopPolicy;

impl ContextWindowPolicy for NoopPolicy {
    fn prune(&self, conversation: &Conversation, _config: &PruneConfig) -> Conversation {
        conversation.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn noop_policy_returns_conversation_unchanged() {
        let conv = Conversation::new()
            .append(Message::system("be terse"))
            .unwrap()
            .append(Message::user("hi"))
            .unwrap();
        let pruned = NoopPolicy.prune(&conv, &PruneConfig::default());
        assert_eq!(pruned, conv);
    }

    #[test]
    fn custom_strategy_carries_a_caller_supplied_function() {
        let conv = Conversation::new().append(Message::user("hi")).unwrap();
        let config = PruneConfig {
            strategy: PruneStrategy::Custom(Arc::new(|_conv, _cfg| Conversation::new())),
            ..PruneConfig::default()
        };
        let emptied = match &config.strategy {
            PruneStrategy::Custom(f) => f(&conv, &config),
            _ => panic!("expected Custom"),
        };
        assert!(emptied.is_empty());
    }
}
