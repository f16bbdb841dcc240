//! Append-only command audit log.
//!
//! Every terminal execution outcome - success, failure, timeout, or
//! cancellation - appends exactly one JSON line to `{user_id}.jsonl`.
//! Entries are never mutated after creation; reset does not touch them.

use std::fs;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PersistenceError;
use crate::prompt::clip;

/// Stored command text is clipped to this many characters.
const MAX_COMMAND_CHARS: usize = 2000;
/// Stored response text is clipped to this many characters.
const MAX_RESPONSE_CHARS: usize = 5000;

/// One audit record for a completed or failed execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandLogEntry {
    pub user_id: i64,
    pub command: String,
    pub response: Option<String>,
    pub execution_time_ms: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CommandLogEntry {
    /// Entry for a successful execution.
    pub fn success(user_id: i64, command: &str, response: &str, execution_time_ms: u64) -> Self {
        Self {
            user_id,
            command: clip(command, MAX_COMMAND_CHARS),
            response: Some(clip(response, MAX_RESPONSE_CHARS)),
            execution_time_ms,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Entry for a failed, timed-out, or cancelled execution.
    pub fn failure(user_id: i64, command: &str, error: &str, execution_time_ms: u64) -> Self {
        Self {
            user_id,
            command: clip(command, MAX_COMMAND_CHARS),
            response: None,
            execution_time_ms,
            error: Some(error.to_string()),
            created_at: Utc::now(),
        }
    }
}

/// Append one entry to `{dir}/{user_id}.jsonl`.
pub fn append_entry(dir: &Path, entry: &CommandLogEntry) -> Result<(), PersistenceError> {
    fs::create_dir_all(dir)?;

    let file_path = dir.join(format!("{}.jsonl", entry.user_id));
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_path)?;

    let line = serde_json::to_string(entry)?;
    writeln!(file, "{line}")?;

    Ok(())
}

/// Load the most recent `limit` entries for a user, newest first.
///
/// Returns an empty list if the file doesn't exist. Malformed lines are
/// skipped with a warning rather than poisoning the whole history.
pub fn load_recent(
    dir: &Path,
    user_id: i64,
    limit: usize,
) -> Result<Vec<CommandLogEntry>, PersistenceError> {
    let file_path = dir.join(format!("{user_id}.jsonl"));

    if !file_path.exists() {
        return Ok(Vec::new());
    }

    let file = fs::File::open(file_path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CommandLogEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => log::warn!("skipping malformed command log line for user {user_id}: {e}"),
        }
    }

    entries.reverse();
    entries.truncate(limit);
    Ok(entries)
}
