//! Engine configuration.
//!
//! The core consumes this configuration but does not own how it is loaded;
//! interface crates build a [`Config`] from environment variables, CLI flags,
//! or test fixtures and hand it to the coordinator.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::intent::TriggerVocabulary;

/// Configuration consumed by the execution engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// User ids admitted by the access gate. Empty means admit everyone
    /// (default-open; the gate logs a warning when constructed this way).
    pub allowed_user_ids: HashSet<i64>,

    /// Path to the agent CLI binary.
    pub agent_binary: String,

    /// Extra arguments passed to the agent binary on every invocation.
    pub agent_args: Vec<String>,

    /// Environment overlay applied to the agent process (e.g. API tokens).
    pub agent_env: Vec<(String, String)>,

    /// Custom shell prefix (e.g. "/bin/bash -c"); `None` uses the login shell.
    pub shell_prefix: Option<String>,

    /// Maximum wall-clock time for one agent invocation.
    pub timeout: Duration,

    /// Grace window between SIGTERM and SIGKILL on timeout/cancel/shutdown.
    pub grace_period: Duration,

    /// Working directory assigned to new sessions and restored on reset.
    pub default_working_dir: String,

    /// Root directory for persisted state (sessions, command logs,
    /// transcripts).
    pub data_dir: PathBuf,

    /// Directory where uploaded attachments are staged for the agent.
    pub files_dir: PathBuf,

    /// Trigger vocabulary used to classify requests as mutating.
    pub triggers: TriggerVocabulary,

    /// Maximum number of exchanges kept in a session's stored context.
    /// Appending past the cap evicts the oldest exchange.
    pub max_stored_exchanges: usize,

    /// Maximum number of recent exchanges included in the agent prompt.
    pub max_prompt_exchanges: usize,

    /// Cap on accumulated stdout/stderr per invocation; excess is dropped
    /// and the result is marked truncated.
    pub max_output_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            allowed_user_ids: HashSet::new(),
            agent_binary: "claude".to_string(),
            agent_args: Vec::new(),
            agent_env: Vec::new(),
            shell_prefix: None,
            timeout: Duration::from_secs(300),
            grace_period: Duration::from_secs(5),
            default_working_dir: home,
            data_dir: PathBuf::from(".steward"),
            files_dir: PathBuf::from(".steward/files"),
            triggers: TriggerVocabulary::default(),
            max_stored_exchanges: 50,
            max_prompt_exchanges: 10,
            max_output_bytes: 512 * 1024,
        }
    }
}

impl Config {
    /// Directory holding per-user session JSON files.
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Directory holding per-user append-only command logs.
    pub fn command_logs_dir(&self) -> PathBuf {
        self.data_dir.join("command_logs")
    }

    /// Directory holding per-user raw agent transcripts.
    pub fn transcripts_dir(&self) -> PathBuf {
        self.data_dir.join("transcripts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_open_gate() {
        let config = Config::default();
        assert!(config.allowed_user_ids.is_empty());
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.max_prompt_exchanges, 10);
    }

    #[test]
    fn derived_dirs_nest_under_data_dir() {
        let config = Config {
            data_dir: PathBuf::from("/var/lib/steward"),
            ..Config::default()
        };
        assert_eq!(
            config.sessions_dir(),
            PathBuf::from("/var/lib/steward/sessions")
        );
        assert_eq!(
            config.command_logs_dir(),
            PathBuf::from("/var/lib/steward/command_logs")
        );
        assert_eq!(
            config.transcripts_dir(),
            PathBuf::from("/var/lib/steward/transcripts")
        );
    }
}
