//! Multi-terminal login conflict resolution
//!
//! Pure decision logic: given a new login and the user's existing
//! connections, decide who gets evicted and which tokens are invalidated. The
//! server applies the result.

use im_core::MultiLoginPolicy;
use std::sync::Arc;

use crate::connection::Connection;

/// What to do with a user's existing sessions after a new login
#[derive(Debug, Default)]
pub struct KickDirective {
    /// Connections to remove, notify and close
    pub evict: Vec<Arc<Connection>>,
    /// Tokens to submit for server-side invalidation
    pub tokens_to_invalidate: Vec<String>,
}

impl KickDirective {
    pub fn is_empty(&self) -> bool {
        self.evict.is_empty() && self.tokens_to_invalidate.is_empty()
    }
}

/// Policy engine configured with one [`MultiLoginPolicy`]
#[derive(Debug, Clone, Copy)]
pub struct MultiTerminalPolicy {
    policy: MultiLoginPolicy,
}

impl MultiTerminalPolicy {
    #[must_use]
    pub const fn new(policy: MultiLoginPolicy) -> Self {
        Self { policy }
    }

    pub const fn policy(&self) -> MultiLoginPolicy {
        self.policy
    }

    /// Decide evictions for `new` against the user's `existing` connections.
    ///
    /// A connection carrying the new login's token is never evicted.
    pub fn evaluate(&self, new: &Connection, existing: &[Arc<Connection>]) -> KickDirective {
        if existing.is_empty() {
            return KickDirective::default();
        }
        let new_class = new.platform_id().terminal_class();

        let (candidates, invalidate): (Vec<&Arc<Connection>>, bool) = match self.policy {
            MultiLoginPolicy::DoNotKick => return KickDirective::default(),
            MultiLoginPolicy::PcAndOtherKick => {
                if new_class.is_pc() {
                    return KickDirective::default();
                }
                let non_pc = existing
                    .iter()
                    .filter(|c| !c.platform_id().terminal_class().is_pc())
                    .collect();
                (non_pc, false)
            }
            MultiLoginPolicy::AllLoginButSameTerminalKick => (existing.iter().collect(), true),
            MultiLoginPolicy::AllLoginButSameClassKick => {
                let same_class = existing
                    .iter()
                    .filter(|c| c.platform_id().terminal_class() == new_class)
                    .collect();
                (same_class, false)
            }
        };

        let evict: Vec<Arc<Connection>> = candidates
            .into_iter()
            .filter(|c| c.token() != new.token())
            .cloned()
            .collect();

        let mut tokens_to_invalidate = Vec::new();
        if invalidate {
            for conn in &evict {
                let token = conn.token();
                if !token.is_empty() && !tokens_to_invalidate.iter().any(|t| t == token) {
                    tokens_to_invalidate.push(token.to_string());
                }
            }
        }

        KickDirective {
            evict,
            tokens_to_invalidate,
        }
    }
}
