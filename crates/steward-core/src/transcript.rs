//! Raw agent transcript logging.
//!
//! Every invocation's stdin/stdout/stderr traffic is mirrored to an
//! append-only per-user log file, which is the first place to look when an
//! agent run misbehaves. Transcript logging is best-effort: failures are
//! swallowed so they can never take down an execution.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

/// Thread-safe handle to an append-only transcript file.
///
/// `None` inside the mutex means transcripts are disabled.
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// Open (or create) the transcript file for a user and return a shared handle.
///
/// Returns a disabled handle when `dir` is `None` or the file cannot be
/// opened.
pub fn open_transcript(dir: Option<&Path>, user_id: i64) -> LogHandle {
    let file = dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{user_id}.log")))
            .ok()
    });
    Arc::new(Mutex::new(file))
}

/// Write a timestamped, direction-tagged line to the transcript (if enabled).
pub fn log_line(handle: &LogHandle, direction: &str, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
            let _ = writeln!(file, "[{}] {}: {}", ts, direction, data);
            let _ = file.flush();
        }
    }
}

/// A handle that discards everything (transcripts disabled).
pub fn disabled() -> LogHandle {
    Arc::new(Mutex::new(None))
}
