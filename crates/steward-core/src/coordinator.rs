//! Execution coordination.
//!
//! The coordinator is the engine's single entry point. One request moves
//! through `Idle -> Admitted -> Classified -> Running -> terminal -> Idle`:
//! the access gate first, then intent classification (control commands
//! short-circuit to their handlers), then a registered execution handle, the
//! supervised agent invocation, and finally the session update and audit log
//! write. Side effects are confined to the terminal transitions: nothing is
//! written before the invocation resolves.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::access::AccessGate;
use crate::attachments::{self, Attachment, FileKind};
use crate::config::Config;
use crate::events::{EventBus, ExecutionEvent};
use crate::intent::{ControlCommand, Intent, IntentClassifier};
use crate::persistence::CommandLogEntry;
use crate::prompt::{build_prompt, clip};
use crate::registry::HandleRegistry;
use crate::session::SessionStore;
use crate::supervisor::{AgentCommand, Supervisor, SupervisorError};
use crate::transcript;

/// Normalized inbound request from the transport collaborator.
#[derive(Debug, Clone)]
pub struct Request {
    pub user_id: i64,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl Request {
    pub fn text_only(user_id: i64, text: impl Into<String>) -> Self {
        Self {
            user_id,
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

/// Outbound response for the transport collaborator to render.
///
/// Plain text; any transport-specific escaping is the formatter's job.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Response {
    pub text: String,
    pub is_error: bool,
}

impl Response {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// Orchestrates access control, classification, execution, and persistence
/// for every inbound request.
pub struct ExecutionCoordinator {
    config: Config,
    gate: AccessGate,
    classifier: IntentClassifier,
    store: SessionStore,
    registry: HandleRegistry,
    supervisor: Supervisor,
    events: EventBus,
}

impl ExecutionCoordinator {
    pub fn new(config: Config) -> Self {
        let gate = AccessGate::new(config.allowed_user_ids.clone());
        let classifier = IntentClassifier::new(config.triggers.clone());
        let store = SessionStore::new(
            config.sessions_dir(),
            config.command_logs_dir(),
            config.default_working_dir.clone(),
            config.max_stored_exchanges,
        );
        let supervisor = Supervisor::new(config.grace_period, config.max_output_bytes);
        Self {
            config,
            gate,
            classifier,
            store,
            registry: HandleRegistry::new(),
            supervisor,
            events: EventBus::new(),
        }
    }

    /// Lifecycle event bus for interfaces to subscribe to.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// True when the user has an in-flight execution.
    pub fn is_running(&self, user_id: i64) -> bool {
        self.registry.is_active(user_id)
    }

    /// Handle one request to its terminal response.
    ///
    /// Blocks for up to the configured timeout while the agent runs; callers
    /// on async runtimes should wrap this in a blocking task.
    pub fn handle(&self, request: Request) -> Response {
        if !self.gate.admit(request.user_id) {
            // Unauthenticated attempts are not logged as commands.
            log::warn!("access denied for user {}", request.user_id);
            return Response::error("Access denied");
        }

        match self.classifier.classify(&request.text) {
            Intent::Control(command) => self.handle_control(request.user_id, command),
            Intent::ReadOnly | Intent::Mutating => self.execute(request),
        }
    }

    /// Cancel all in-flight executions and wait for them to release.
    ///
    /// Called on process-wide shutdown so no agent subprocess outlives the
    /// engine. Supervising loops escalate to a force kill themselves; this
    /// only waits and reports.
    pub fn shutdown(&self) {
        let cancelled = self.registry.cancel_all();
        if cancelled == 0 {
            return;
        }
        log::info!("shutdown: cancelled {cancelled} in-flight execution(s), waiting for release");
        let wait = self.config.grace_period + Duration::from_secs(2);
        if !self.registry.await_idle(wait) {
            log::warn!(
                "shutdown: {} execution(s) still active after {:?}; their process groups have been force killed",
                self.registry.active_count(),
                wait
            );
        }
    }

    // ========================================================================
    // Execution path
    // ========================================================================

    fn execute(&self, request: Request) -> Response {
        // Claim the user's execution slot before reading the session, so the
        // context written by the previous exchange is always visible here.
        let active = match self.registry.begin(request.user_id) {
            Ok(active) => active,
            Err(err) => {
                log::info!("{err}");
                return Response::error(
                    "A command is already in progress. Use /cancel to stop it.",
                );
            }
        };

        let session = match self.store.get(request.user_id) {
            Ok(session) => session,
            Err(e) => {
                log::error!("failed to load session for user {}: {e}", request.user_id);
                return Response::error("Internal error: failed to load session");
            }
        };

        let staged = match self.stage_attachments(&request) {
            Ok(staged) => staged,
            Err(e) => {
                log::error!(
                    "failed to stage attachment for user {}: {e}",
                    request.user_id
                );
                return Response::error("Failed to store the uploaded file");
            }
        };
        let effective_text = attachments::annotate_request(&request.text, &staged);

        let mutating = self
            .classifier
            .vocabulary()
            .matches(&effective_text.to_lowercase());
        let prompt = build_prompt(
            &effective_text,
            &session.context,
            mutating,
            self.config.max_prompt_exchanges,
        );

        let command = self.agent_command(&session.working_dir, prompt);
        let transcripts_dir = self.config.transcripts_dir();
        let transcript = transcript::open_transcript(Some(transcripts_dir.as_path()), request.user_id);

        log::info!(
            "executing agent for user {} (mutating: {mutating}, prompt: {} chars)",
            request.user_id,
            command.prompt.len()
        );
        self.events.emit(ExecutionEvent::Started {
            user_id: request.user_id,
            mutating,
        });

        let started = Instant::now();
        let result = self.supervisor.run(
            &command,
            self.config.timeout,
            active.handle().cancel_signal(),
            transcript,
            |terminator| active.handle().attach_process(terminator),
        );
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = self.resolve_outcome(&request, &effective_text, result, elapsed_ms);
        drop(active);
        response
    }

    fn stage_attachments(
        &self,
        request: &Request,
    ) -> std::io::Result<Vec<(std::path::PathBuf, FileKind)>> {
        request
            .attachments
            .iter()
            .map(|attachment| {
                let kind = FileKind::for_name(&attachment.name);
                attachments::stage(&self.config.files_dir, request.user_id, attachment)
                    .map(|path| (path, kind))
            })
            .collect()
    }

    fn agent_command(&self, working_dir: &str, prompt: String) -> AgentCommand {
        let mut command = AgentCommand::new(&self.config.agent_binary, prompt)
            .args(self.config.agent_args.clone())
            .working_dir(working_dir)
            .env(self.config.agent_env.clone());
        if let Some(prefix) = &self.config.shell_prefix {
            command = command.shell_prefix(prefix.clone());
        }
        command
    }

    /// Terminal transition: write the audit entry (always), update the
    /// session (success only), emit the lifecycle event, build the response.
    fn resolve_outcome(
        &self,
        request: &Request,
        effective_text: &str,
        result: Result<crate::supervisor::Invocation, SupervisorError>,
        elapsed_ms: u64,
    ) -> Response {
        let user_id = request.user_id;
        match result {
            Ok(invocation) => {
                let mut text = invocation.output.trim_end().to_string();
                if text.is_empty() {
                    text = "(the agent produced no output)".to_string();
                }
                if invocation.truncated {
                    text.push_str("\n\n[output truncated]");
                }

                let mut persistence_note = false;
                if let Err(e) = self.store.record_exchange(user_id, effective_text, &text) {
                    // The computed response is never discarded over a failed
                    // write; report the failure separately.
                    log::error!("failed to persist session for user {user_id}: {e}");
                    persistence_note = true;
                }
                let entry = CommandLogEntry::success(user_id, effective_text, &text, elapsed_ms);
                if let Err(e) = self.store.append_log(&entry) {
                    log::error!("failed to append command log for user {user_id}: {e}");
                    persistence_note = true;
                }
                if persistence_note {
                    text.push_str("\n\n(warning: this exchange could not be saved)");
                }

                log::info!("agent completed for user {user_id} in {elapsed_ms}ms");
                self.finish_event(user_id, "completed", elapsed_ms);
                Response::ok(text)
            }
            Err(error) => {
                let (outcome, text) = describe_failure(&error, self.config.timeout);
                let entry =
                    CommandLogEntry::failure(user_id, effective_text, &error.to_string(), elapsed_ms);
                if let Err(e) = self.store.append_log(&entry) {
                    log::error!("failed to append command log for user {user_id}: {e}");
                }
                log::warn!("agent {outcome} for user {user_id} after {elapsed_ms}ms");
                self.finish_event(user_id, outcome, elapsed_ms);
                Response::error(text)
            }
        }
    }

    fn finish_event(&self, user_id: i64, outcome: &str, elapsed_ms: u64) {
        self.events.emit(ExecutionEvent::Finished {
            user_id,
            outcome: outcome.to_string(),
            execution_time_ms: elapsed_ms,
        });
    }

    // ========================================================================
    // Control commands
    // ========================================================================

    fn handle_control(&self, user_id: i64, command: ControlCommand) -> Response {
        match command {
            ControlCommand::Start => self.control_start(user_id),
            ControlCommand::Reset => self.control_reset(user_id),
            ControlCommand::Status => self.control_status(user_id),
            ControlCommand::Context => self.control_context(user_id),
            ControlCommand::History => self.control_history(user_id),
            ControlCommand::Cancel => self.control_cancel(user_id),
            ControlCommand::ChangeDir(path) => self.control_cd(user_id, path),
            ControlCommand::Help => self.control_help(),
        }
    }

    fn control_start(&self, user_id: i64) -> Response {
        match self.store.get(user_id) {
            Ok(session) => Response::ok(format!(
                "Steward is ready. Send any request and it will be passed to the agent.\n\
                 \n\
                 Control commands:\n\
                 /reset - start a new session\n\
                 /status - current session status\n\
                 /context - show recent context\n\
                 /history - command history\n\
                 /cancel - cancel the running command\n\
                 /cd <path> - change working directory\n\
                 /help - help\n\
                 \n\
                 Working directory: {}",
                session.working_dir
            )),
            Err(e) => internal_error(user_id, "load session", &e),
        }
    }

    fn control_reset(&self, user_id: i64) -> Response {
        // An in-flight command dies with the old session.
        if self.registry.cancel(user_id) {
            log::info!("reset: cancelled in-flight execution for user {user_id}");
        }
        match self.store.reset(user_id) {
            Ok(_) => Response::ok("Session reset. Starting fresh."),
            Err(e) => internal_error(user_id, "reset session", &e),
        }
    }

    fn control_status(&self, user_id: i64) -> Response {
        match self.store.get(user_id) {
            Ok(session) => {
                let mut text = format!(
                    "Session status\n\
                     Conversation: {}\n\
                     Working directory: {}\n\
                     Messages in session: {}\n\
                     Context entries: {}\n\
                     Started: {}\n\
                     Last activity: {}",
                    session.conversation_id,
                    session.working_dir,
                    session.message_count,
                    session.context.len(),
                    session.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    session.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
                );
                if self.registry.is_active(user_id) {
                    text.push_str("\n\nA command is currently running (use /cancel to stop it)");
                }
                Response::ok(text)
            }
            Err(e) => internal_error(user_id, "load session", &e),
        }
    }

    fn control_context(&self, user_id: i64) -> Response {
        match self.store.get(user_id) {
            Ok(session) => {
                if session.context.is_empty() {
                    return Response::ok("Context is empty");
                }
                let mut parts = vec!["Recent exchanges:".to_string()];
                for exchange in session.recent_context(5) {
                    parts.push(format!("You: {}", clip(&exchange.user, 100)));
                    parts.push(format!("Agent: {}\n", clip(&exchange.assistant, 100)));
                }
                Response::ok(parts.join("\n"))
            }
            Err(e) => internal_error(user_id, "load session", &e),
        }
    }

    fn control_history(&self, user_id: i64) -> Response {
        match self.store.history(user_id, 20) {
            Ok(entries) => {
                if entries.is_empty() {
                    return Response::ok("No commands in history");
                }
                let mut parts = vec!["Command history (newest first):".to_string()];
                for entry in entries {
                    let status = match &entry.error {
                        Some(error) => format!("error: {}", clip(error, 80)),
                        None => format!("ok ({} ms)", entry.execution_time_ms),
                    };
                    parts.push(format!(
                        "[{}] {} - {}",
                        entry.created_at.format("%Y-%m-%d %H:%M"),
                        clip(&entry.command, 60),
                        status
                    ));
                }
                Response::ok(parts.join("\n"))
            }
            Err(e) => internal_error(user_id, "load history", &e),
        }
    }

    fn control_cancel(&self, user_id: i64) -> Response {
        if self.registry.cancel(user_id) {
            Response::ok("Cancellation signal sent")
        } else {
            // Cancel against no active handle is a no-op success.
            Response::ok("No active command to cancel")
        }
    }

    fn control_cd(&self, user_id: i64, path: Option<String>) -> Response {
        let Some(path) = path else {
            return Response::error("Usage: /cd <path>");
        };
        if !Path::new(&path).is_dir() {
            return Response::error(format!("Directory does not exist: {path}"));
        }
        match self.store.set_working_dir(user_id, &path) {
            Ok(()) => Response::ok(format!("Working directory changed to: {path}")),
            Err(e) => internal_error(user_id, "update working directory", &e),
        }
    }

    fn control_help(&self) -> Response {
        let triggers: Vec<&str> = self.classifier.vocabulary().tokens().collect();
        Response::ok(format!(
            "Steward - remote operator console\n\
             \n\
             Send any text and it is forwarded to the agent with your session\n\
             context. The agent only mutates the system when your request\n\
             contains an action word; everything else runs read-only.\n\
             \n\
             Control commands:\n\
             /start - activate and show session info\n\
             /reset - start a new session (clears context)\n\
             /status - session status\n\
             /context - recent exchanges\n\
             /history - all commands (survives /reset)\n\
             /cancel - cancel the running command\n\
             /cd <path> - change working directory\n\
             /help - this help\n\
             \n\
             Action words: {}",
            triggers.join(", ")
        ))
    }
}

fn internal_error(
    user_id: i64,
    action: &str,
    error: &crate::persistence::PersistenceError,
) -> Response {
    log::error!("failed to {action} for user {user_id}: {error}");
    Response::error(format!("Internal error: failed to {action}"))
}

/// Map a supervisor error to an outcome label and operator-facing text.
fn describe_failure(error: &SupervisorError, timeout: Duration) -> (&'static str, String) {
    match error {
        SupervisorError::Launch(msg) => (
            "launch_failed",
            format!(
                "Failed to launch the agent: {msg}\n\
                 This usually means the agent binary path is misconfigured."
            ),
        ),
        SupervisorError::Timeout { partial, .. } => {
            let mut text = format!(
                "Execution timed out after {} seconds. Try a simpler request.",
                timeout.as_secs()
            );
            append_partial(&mut text, partial);
            ("timeout", text)
        }
        SupervisorError::Cancelled { partial } => {
            let mut text = "Execution cancelled".to_string();
            append_partial(&mut text, partial);
            ("cancelled", text)
        }
        SupervisorError::AgentFailed { stderr, .. } => {
            ("failed", format!("Agent error: {}", stderr.trim()))
        }
    }
}

fn append_partial(text: &mut String, partial: &str) {
    if !partial.trim().is_empty() {
        text.push_str("\n\nPartial output:\n");
        text.push_str(partial.trim_end());
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    /// Config pointing the "agent" at a shell one-liner.
    fn test_config(dir: &TempDir, binary: &str, args: &[&str]) -> Config {
        Config {
            agent_binary: binary.to_string(),
            agent_args: args.iter().map(|s| s.to_string()).collect(),
            shell_prefix: Some("/bin/sh -c".to_string()),
            timeout: Duration::from_secs(10),
            grace_period: Duration::from_millis(500),
            default_working_dir: "/tmp".to_string(),
            data_dir: dir.path().join("data"),
            files_dir: dir.path().join("files"),
            ..Config::default()
        }
    }

    fn coordinator(dir: &TempDir, binary: &str, args: &[&str]) -> ExecutionCoordinator {
        ExecutionCoordinator::new(test_config(dir, binary, args))
    }

    #[test]
    #[cfg(unix)]
    fn successful_exchange_updates_session_and_log() {
        let dir = TempDir::new().unwrap();
        // cat echoes the prompt back, which includes the request text
        let coordinator = coordinator(&dir, "/bin/cat", &[]);

        let response = coordinator.handle(Request::text_only(1, "show me the disk usage"));
        assert!(!response.is_error);
        assert!(response.text.contains("show me the disk usage"));

        let session = coordinator.store.get(1).unwrap();
        assert_eq!(session.message_count, 1);
        assert_eq!(session.context.len(), 1);

        let history = coordinator.store.history(1, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].error.is_none());
    }

    #[test]
    #[cfg(unix)]
    fn message_count_after_n_exchanges_equals_n() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, "/bin/cat", &[]);

        for i in 0..3 {
            let response = coordinator.handle(Request::text_only(1, format!("request {i}")));
            assert!(!response.is_error);
        }

        let session = coordinator.store.get(1).unwrap();
        assert_eq!(session.message_count, 3);
        assert_eq!(coordinator.store.history(1, 10).unwrap().len(), 3);
    }

    #[test]
    #[cfg(unix)]
    fn read_only_and_mutating_requests_shape_the_prompt() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, "/bin/cat", &[]);

        let response = coordinator.handle(Request::text_only(1, "show me the list of files"));
        assert!(response.text.contains("CURRENT MODE: Information only"));

        let response = coordinator.handle(Request::text_only(1, "execute the migration"));
        assert!(response.text.contains("CURRENT MODE: Execution allowed"));
    }

    #[test]
    fn denied_user_gets_no_session_and_no_log_entry() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, "/bin/cat", &[]);
        config.allowed_user_ids = [1].into_iter().collect();
        let coordinator = ExecutionCoordinator::new(config);

        let response = coordinator.handle(Request::text_only(2, "run something"));
        assert!(response.is_error);
        assert!(response.text.contains("Access denied"));

        // no command log entry and no persisted session for the intruder
        assert!(coordinator.store.history(2, 10).unwrap().is_empty());
        assert!(!dir.path().join("data/sessions/2.json").exists());
    }

    #[test]
    #[cfg(unix)]
    fn failed_execution_logs_but_does_not_touch_context() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, "/bin/sh", &["-c", "echo broken >&2; exit 7"]);

        let response = coordinator.handle(Request::text_only(1, "do the thing"));
        assert!(response.is_error);
        assert!(response.text.contains("broken"));

        let session = coordinator.store.get(1).unwrap();
        assert_eq!(session.message_count, 0);
        assert!(session.context.is_empty());

        let history = coordinator.store.history(1, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].error.is_some());
    }

    #[test]
    #[cfg(unix)]
    fn timeout_produces_error_response_and_log_entry() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, "/bin/sh", &["-c", "sleep 30"]);
        config.timeout = Duration::from_millis(300);
        let coordinator = ExecutionCoordinator::new(config);

        let response = coordinator.handle(Request::text_only(1, "hang forever"));
        assert!(response.is_error);
        assert!(response.text.contains("timed out"));

        let history = coordinator.store.history(1, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].error.as_ref().unwrap().contains("timed out"));
    }

    #[test]
    #[cfg(unix)]
    fn second_concurrent_request_is_rejected_then_cancel_works() {
        let dir = TempDir::new().unwrap();
        let coordinator = Arc::new(coordinator(&dir, "/bin/sh", &["-c", "sleep 30"]));

        let runner = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || coordinator.handle(Request::text_only(1, "long task")))
        };

        // wait for the execution slot to be claimed
        let mut waited = Duration::ZERO;
        while !coordinator.is_running(1) && waited < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(20));
            waited += Duration::from_millis(20);
        }
        assert!(coordinator.is_running(1));

        let rejected = coordinator.handle(Request::text_only(1, "another task"));
        assert!(rejected.is_error);
        assert!(rejected.text.contains("already in progress"));

        let cancel = coordinator.handle(Request::text_only(1, "/cancel"));
        assert!(!cancel.is_error);
        assert!(cancel.text.contains("Cancellation signal sent"));

        let response = runner.join().unwrap();
        assert!(response.is_error);
        assert!(response.text.contains("cancelled"));

        // exactly one terminal outcome, exactly one audit entry
        assert_eq!(coordinator.store.history(1, 10).unwrap().len(), 1);
        assert!(!coordinator.is_running(1));
    }

    #[test]
    fn cancel_with_nothing_running_is_noop_success() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, "/bin/cat", &[]);

        let response = coordinator.handle(Request::text_only(1, "/cancel"));
        assert!(!response.is_error);
        assert!(response.text.contains("No active command"));
    }

    #[test]
    #[cfg(unix)]
    fn reset_clears_context_and_preserves_history() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, "/bin/cat", &[]);

        coordinator.handle(Request::text_only(1, "first request"));
        let response = coordinator.handle(Request::text_only(1, "/reset"));
        assert!(!response.is_error);

        let session = coordinator.store.get(1).unwrap();
        assert!(session.context.is_empty());
        assert_eq!(session.message_count, 0);

        // history survives; a new exchange accumulates under the same user
        assert_eq!(coordinator.store.history(1, 10).unwrap().len(), 1);
        coordinator.handle(Request::text_only(1, "second request"));
        assert_eq!(coordinator.store.get(1).unwrap().message_count, 1);
    }

    #[test]
    #[cfg(unix)]
    fn cd_changes_the_agent_working_directory() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("workdir");
        std::fs::create_dir_all(&target).unwrap();
        // pwd ignores the prompt and prints the working directory
        let coordinator = coordinator(&dir, "/bin/sh", &["-c", "pwd"]);

        let response =
            coordinator.handle(Request::text_only(1, format!("/cd {}", target.display())));
        assert!(!response.is_error);

        let response = coordinator.handle(Request::text_only(1, "where are we"));
        assert!(response.text.contains(target.to_str().unwrap()));
    }

    #[test]
    fn cd_rejects_missing_directory_and_missing_argument() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, "/bin/cat", &[]);

        let response = coordinator.handle(Request::text_only(1, "/cd /definitely/not/here"));
        assert!(response.is_error);
        assert!(response.text.contains("does not exist"));

        let response = coordinator.handle(Request::text_only(1, "/cd"));
        assert!(response.is_error);
        assert!(response.text.contains("Usage"));
    }

    #[test]
    fn status_and_help_are_read_only() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, "/bin/cat", &[]);

        let status = coordinator.handle(Request::text_only(1, "/status"));
        assert!(!status.is_error);
        assert!(status.text.contains("Working directory"));

        let help = coordinator.handle(Request::text_only(1, "/help"));
        assert!(!help.is_error);
        assert!(help.text.contains("/cancel"));
        assert!(help.text.contains("execute"));

        // neither produced an audit entry
        assert!(coordinator.store.history(1, 10).unwrap().is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn attachments_are_staged_and_referenced() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, "/bin/cat", &[]);

        let request = Request {
            user_id: 1,
            text: "find the error".to_string(),
            attachments: vec![Attachment {
                name: "app.log".to_string(),
                bytes: b"line one".to_vec(),
                mime: "text/plain".to_string(),
            }],
        };
        let response = coordinator.handle(request);
        assert!(!response.is_error);
        assert!(response.text.contains("[FILE ACCESS GRANTED]"));
        assert!(response.text.contains("app.log"));

        let staged = dir.path().join("files/1/app.log");
        assert!(staged.exists());
        assert_eq!(std::fs::read(&staged).unwrap(), b"line one");
    }

    #[test]
    #[cfg(unix)]
    fn lifecycle_events_are_emitted() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, "/bin/cat", &[]);
        let mut rx = coordinator.events().subscribe();

        coordinator.handle(Request::text_only(1, "ping"));

        match rx.try_recv().unwrap() {
            ExecutionEvent::Started { user_id, .. } => assert_eq!(user_id, 1),
            other => panic!("expected Started, got {other:?}"),
        }
        match rx.try_recv().unwrap() {
            ExecutionEvent::Finished { outcome, .. } => assert_eq!(outcome, "completed"),
            other => panic!("expected Finished, got {other:?}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn shutdown_cancels_in_flight_executions() {
        let dir = TempDir::new().unwrap();
        let coordinator = Arc::new(coordinator(&dir, "/bin/sh", &["-c", "sleep 30"]));

        let runner = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || coordinator.handle(Request::text_only(1, "long task")))
        };

        let mut waited = Duration::ZERO;
        while !coordinator.is_running(1) && waited < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(20));
            waited += Duration::from_millis(20);
        }

        coordinator.shutdown();
        assert!(!coordinator.is_running(1));

        let response = runner.join().unwrap();
        assert!(response.is_error);
        assert!(response.text.contains("cancelled"));
    }
}
