//! Per-user session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One completed request/response pair in a session's context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
    pub timestamp: DateTime<Utc>,
}

/// Persistent conversational state for one user.
///
/// At most one session exists per user id. Sessions are created lazily on
/// first interaction and never deleted; reset replaces the content, not the
/// row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique user identifier (primary key).
    pub user_id: i64,

    /// Conversation identity; replaced on every reset.
    pub conversation_id: Uuid,

    /// Accumulated exchanges, bounded by the configured cap (oldest evicted
    /// first).
    pub context: Vec<Exchange>,

    /// Working directory used for agent invocations.
    pub working_dir: String,

    /// Number of successful exchanges since the last reset. Failed,
    /// timed-out, and cancelled attempts do not count; they only appear in
    /// the command log.
    pub message_count: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: i64, working_dir: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            conversation_id: Uuid::new_v4(),
            context: Vec::new(),
            working_dir: working_dir.into(),
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a successful exchange, evicting the oldest entries past
    /// `max_stored` (deterministic FIFO truncation), and bump the counter.
    pub fn record_exchange(
        &mut self,
        user: impl Into<String>,
        assistant: impl Into<String>,
        max_stored: usize,
    ) {
        self.context.push(Exchange {
            user: user.into(),
            assistant: assistant.into(),
            timestamp: Utc::now(),
        });
        if self.context.len() > max_stored {
            let excess = self.context.len() - max_stored;
            self.context.drain(..excess);
        }
        self.message_count += 1;
        self.updated_at = Utc::now();
    }

    /// The most recent `n` exchanges, oldest first.
    pub fn recent_context(&self, n: usize) -> &[Exchange] {
        let start = self.context.len().saturating_sub(n);
        &self.context[start..]
    }

    /// Reset to the initial state: context cleared, counter zeroed, working
    /// directory restored to the default, fresh conversation id. The user
    /// identity and `created_at` are preserved.
    pub fn reset(&mut self, default_working_dir: &str) {
        self.conversation_id = Uuid::new_v4();
        self.context.clear();
        self.working_dir = default_working_dir.to_string();
        self.message_count = 0;
        self.updated_at = Utc::now();
    }
}
