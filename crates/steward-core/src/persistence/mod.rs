//! Persistence layer for sessions and the command audit log.
//!
//! # File Locations
//!
//! All state lives under the configured data directory:
//!
//! ```text
//! {data_dir}/
//! ├── sessions/
//! │   └── {user_id}.json      # One session document per user
//! ├── command_logs/
//! │   └── {user_id}.jsonl     # Append-only audit trail per user
//! └── transcripts/
//!     └── {user_id}.log       # Raw agent stdio (see crate::transcript)
//! ```
//!
//! # Design Principles
//!
//! ## Atomic Writes
//!
//! Session saves use write-then-rename to prevent corruption:
//!
//! 1. Write to `{user_id}.json.tmp`
//! 2. Rename to `{user_id}.json` (atomic on Unix)
//!
//! ## Append-Only Audit
//!
//! Command log entries are never rewritten; each terminal execution outcome
//! appends exactly one JSON line.

pub mod command_log;
pub mod sessions;

use thiserror::Error;

pub use command_log::{append_entry, load_recent, CommandLogEntry};
pub use sessions::{load_session, save_session};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
