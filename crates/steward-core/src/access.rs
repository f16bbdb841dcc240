//! Access control gate.
//!
//! Decides whether a user identity may use the engine at all. This is a pure
//! allowlist lookup; it has no side effects and never touches the session
//! store, so denied attempts leave no trace beyond a log line.

use std::collections::HashSet;

/// Allowlist-based admission check.
///
/// An empty allowlist admits everyone. That is the explicit default-open
/// policy inherited from single-operator deployments; construction logs a
/// warning so the insecurity is visible in operational logs.
#[derive(Debug, Clone)]
pub struct AccessGate {
    allowed: HashSet<i64>,
}

impl AccessGate {
    pub fn new(allowed: HashSet<i64>) -> Self {
        if allowed.is_empty() {
            log::warn!("no allowed user ids configured - engine is accessible to everyone");
        }
        Self { allowed }
    }

    /// Check whether a user is admitted.
    pub fn admit(&self, user_id: i64) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&user_id)
    }

    /// True when no allowlist is configured and everyone is admitted.
    pub fn is_open(&self) -> bool {
        self.allowed.is_empty()
    }
}
