//! Agent process supervision.
//!
//! Launches one agent invocation as a subprocess, streams its output,
//! enforces the execution deadline, and honors cancellation. Exactly one
//! terminal outcome is produced per invocation:
//!
//! - `Ok(Invocation)` - the agent exited cleanly
//! - `Timeout` - the deadline passed; the process group was terminated
//! - `Cancelled` - the operator cancelled mid-flight
//! - `AgentFailed` - the agent exited nonzero or died unexpectedly
//! - `Launch` - the subprocess could not be started at all
//!
//! Partial output gathered before a timeout or cancellation is preserved on
//! the error so callers can surface it.
//!
//! The prompt travels over stdin (written by a dedicated thread, then closed
//! so the agent sees EOF and runs a single turn). stdout/stderr are read
//! line-wise by background threads into an mpsc channel; the supervising
//! loop drains that channel against the deadline.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use std::io::{BufRead, BufReader, Write};
use std::process::Child;

use thiserror::Error;

use crate::shell::{build_agent_command, AgentExit};
use crate::transcript::{log_line, LogHandle};

/// Poll interval for the supervising loop and the exit watcher.
const TICK: Duration = Duration::from_millis(50);

/// Events emitted by an agent process.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// A line was read from stdout
    Stdout(String),
    /// A line was read from stderr
    Stderr(String),
    /// The process exited
    Exit(AgentExit),
}

/// One fully-specified agent invocation.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    /// Path to the agent binary
    pub binary_path: String,
    /// Arguments to pass to the binary
    pub args: Vec<String>,
    /// Working directory for the process
    pub working_dir: Option<String>,
    /// Custom shell prefix (e.g. "/bin/sh -c")
    pub shell_prefix: Option<String>,
    /// Environment overlay applied to the process
    pub env: Vec<(String, String)>,
    /// Composed prompt, written to stdin and closed
    pub prompt: String,
}

impl AgentCommand {
    pub fn new(binary_path: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            working_dir: None,
            shell_prefix: None,
            env: Vec::new(),
            prompt: prompt.into(),
        }
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn shell_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.shell_prefix = Some(prefix.into());
        self
    }

    pub fn env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }
}

/// Successful invocation result.
#[derive(Debug)]
pub struct Invocation {
    pub output: String,
    pub stderr: String,
    pub exit: AgentExit,
    /// True when output exceeded the configured cap and was dropped.
    pub truncated: bool,
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to launch agent: {0}")]
    Launch(String),

    #[error("execution timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64, partial: String },

    #[error("execution cancelled")]
    Cancelled { partial: String },

    #[error("agent exited with code {code}: {stderr}")]
    AgentFailed { code: i32, stderr: String },
}

/// Cloneable handle that can signal a running agent process.
///
/// This is the non-blocking cancellation entry point: a concurrent control
/// command holds one of these (via the execution registry) and can signal
/// the process group without waiting for the supervising loop.
#[derive(Clone)]
pub struct ProcessTerminator {
    child: Arc<Mutex<Option<Child>>>,
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: i32,
}

impl ProcessTerminator {
    /// Send a graceful termination signal to the process group. Non-blocking.
    pub fn terminate(&self) {
        let guard = match self.child.lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        if guard.is_some() {
            #[cfg(unix)]
            unsafe {
                libc::killpg(self.pgid, libc::SIGTERM);
            }
            #[cfg(not(unix))]
            {
                // No process groups; the supervising loop escalates to kill.
            }
        }
    }

    /// Force kill the process group. Non-blocking; the exit watcher reaps
    /// the child and delivers the terminal event.
    pub fn kill(&self) {
        let mut guard = match self.child.lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        if let Some(child) = guard.as_mut() {
            #[cfg(unix)]
            unsafe {
                libc::killpg(self.pgid, libc::SIGKILL);
            }
            let _ = child.kill();
        }
    }

    /// Check if the process has not been reaped yet.
    pub fn is_running(&self) -> bool {
        self.child.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

/// A running agent process.
pub struct AgentProcess {
    child: Arc<Mutex<Option<Child>>>,
    pgid: i32,
    events: Receiver<ProcessEvent>,
}

impl AgentProcess {
    /// Spawn a new agent process and start its I/O threads.
    ///
    /// The prompt is handed to a writer thread so a large prompt can never
    /// deadlock against a full pipe; the writer closes stdin when done.
    pub fn spawn(config: &AgentCommand, transcript: LogHandle) -> Result<Self, String> {
        let mut cmd = build_agent_command(
            &config.binary_path,
            &config.args,
            config.working_dir.as_deref(),
            config.shell_prefix.as_deref(),
            &config.env,
        )?;

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| format!("Failed to spawn: {}", e))?;
        let pgid = child.id() as i32;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| "Failed to capture stdin".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "Failed to capture stdout".to_string())?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| "Failed to capture stderr".to_string())?;

        let (tx, rx) = mpsc::channel();
        let child_arc = Arc::new(Mutex::new(Some(child)));

        // Prompt writer thread; dropping stdin at the end delivers EOF.
        let prompt = config.prompt.clone();
        let transcript_in = transcript.clone();
        thread::spawn(move || {
            log_line(&transcript_in, "STDIN", &prompt);
            let mut stdin = stdin;
            let _ = stdin.write_all(prompt.as_bytes());
            let _ = stdin.write_all(b"\n");
        });

        // stdout reader thread
        let tx_stdout = tx.clone();
        let transcript_out = transcript.clone();
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines().map_while(Result::ok) {
                log_line(&transcript_out, "STDOUT", &line);
                if tx_stdout.send(ProcessEvent::Stdout(line)).is_err() {
                    break;
                }
            }
        });

        // stderr reader thread
        let tx_stderr = tx.clone();
        let transcript_err = transcript;
        thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(Result::ok) {
                log_line(&transcript_err, "STDERR", &line);
                if tx_stderr.send(ProcessEvent::Stderr(line)).is_err() {
                    break;
                }
            }
        });

        // Exit watcher thread: reaps the child and emits the terminal event.
        let child_arc_exit = Arc::clone(&child_arc);
        let tx_exit = tx;
        thread::spawn(move || loop {
            let mut guard = match child_arc_exit.lock() {
                Ok(g) => g,
                Err(_) => break,
            };
            if let Some(child) = guard.as_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        let _ = tx_exit.send(ProcessEvent::Exit(AgentExit::from_status(status)));
                        guard.take();
                        break;
                    }
                    Ok(None) => {}
                    Err(_) => {
                        guard.take();
                        break;
                    }
                }
            } else {
                break;
            }
            drop(guard);
            thread::sleep(TICK);
        });

        Ok(Self {
            child: child_arc,
            pgid,
            events: rx,
        })
    }

    /// A cloneable termination handle for this process.
    pub fn terminator(&self) -> ProcessTerminator {
        ProcessTerminator {
            child: Arc::clone(&self.child),
            pgid: self.pgid,
        }
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<ProcessEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }
}

/// Supervises agent invocations against a deadline and a cancel signal.
#[derive(Debug, Clone)]
pub struct Supervisor {
    grace_period: Duration,
    max_output_bytes: usize,
}

impl Supervisor {
    pub fn new(grace_period: Duration, max_output_bytes: usize) -> Self {
        Self {
            grace_period,
            max_output_bytes,
        }
    }

    /// Spawn and supervise one invocation.
    ///
    /// `attach` receives the process terminator right after a successful
    /// spawn, before supervision starts; the caller parks it where a
    /// concurrent cancel can reach it.
    pub fn run(
        &self,
        command: &AgentCommand,
        timeout: Duration,
        cancel: Arc<AtomicBool>,
        transcript: LogHandle,
        attach: impl FnOnce(ProcessTerminator),
    ) -> Result<Invocation, SupervisorError> {
        let process = AgentProcess::spawn(command, transcript).map_err(SupervisorError::Launch)?;
        attach(process.terminator());
        self.supervise(process, timeout, cancel)
    }

    /// Drive a spawned process to its single terminal outcome.
    pub fn supervise(
        &self,
        process: AgentProcess,
        timeout: Duration,
        cancel: Arc<AtomicBool>,
    ) -> Result<Invocation, SupervisorError> {
        let term = process.terminator();
        let deadline = Instant::now() + timeout;
        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();
        let mut truncated = false;
        let mut cancel_seen_at: Option<Instant> = None;
        let mut force_killed = false;

        let exit = loop {
            if cancel.load(Ordering::Relaxed) && cancel_seen_at.is_none() {
                cancel_seen_at = Some(Instant::now());
                // The cancel entry point normally signals the group itself;
                // signalling again here covers a flag set with no terminator
                // attached yet.
                term.terminate();
            }

            if let Some(at) = cancel_seen_at {
                if !force_killed && at.elapsed() >= self.grace_period {
                    log::warn!("agent ignored cancellation for {:?}; force killing", at.elapsed());
                    term.kill();
                    force_killed = true;
                }
            }

            match process.recv_timeout(TICK) {
                Ok(ProcessEvent::Stdout(line)) => {
                    append_capped(&mut stdout_buf, &line, self.max_output_bytes, &mut truncated);
                }
                Ok(ProcessEvent::Stderr(line)) => {
                    append_capped(&mut stderr_buf, &line, self.max_output_bytes, &mut truncated);
                }
                Ok(ProcessEvent::Exit(exit)) => break Some(exit),
                Err(RecvTimeoutError::Timeout) => {
                    if cancel_seen_at.is_none() && Instant::now() >= deadline {
                        self.terminate_on_deadline(&term, &process, &mut stdout_buf, &mut stderr_buf, &mut truncated);
                        return Err(SupervisorError::Timeout {
                            timeout_secs: timeout.as_secs(),
                            partial: stdout_buf,
                        });
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break None,
            }
        };

        // The exit watcher and the reader threads share one channel, so
        // output lines can still be in flight behind the exit event. Drain
        // them before resolving the outcome.
        self.drain_stragglers(&process, &mut stdout_buf, &mut stderr_buf, &mut truncated);

        // A clean exit wins the race against a late cancel: the work is
        // already done, so the cancellation is a no-op.
        if let Some(exit) = &exit {
            if exit.success() {
                return Ok(Invocation {
                    output: stdout_buf,
                    stderr: stderr_buf,
                    exit: exit.clone(),
                    truncated,
                });
            }
        }

        if cancel.load(Ordering::Relaxed) {
            return Err(SupervisorError::Cancelled {
                partial: stdout_buf,
            });
        }

        match exit {
            Some(exit) => {
                let stderr = if stderr_buf.trim().is_empty() {
                    match exit.signal {
                        Some(sig) => format!("killed by signal {sig}"),
                        None => format!("exit code {}", exit.code),
                    }
                } else {
                    stderr_buf
                };
                Err(SupervisorError::AgentFailed {
                    code: exit.code,
                    stderr,
                })
            }
            None => {
                log::warn!("agent event channel closed without an exit status");
                Err(SupervisorError::AgentFailed {
                    code: -1,
                    stderr: "agent terminated without reporting an exit status".to_string(),
                })
            }
        }
    }

    /// Collect output still buffered in the channel after the process
    /// exited. The reader threads hit EOF and hang up quickly once the
    /// process is gone, so this ends on disconnect, bounded by a short cap.
    fn drain_stragglers(
        &self,
        process: &AgentProcess,
        stdout_buf: &mut String,
        stderr_buf: &mut String,
        truncated: &mut bool,
    ) {
        let drain_deadline = Instant::now() + Duration::from_millis(500);
        while Instant::now() < drain_deadline {
            match process.recv_timeout(TICK) {
                Ok(ProcessEvent::Stdout(line)) => {
                    append_capped(stdout_buf, &line, self.max_output_bytes, truncated);
                }
                Ok(ProcessEvent::Stderr(line)) => {
                    append_capped(stderr_buf, &line, self.max_output_bytes, truncated);
                }
                Ok(ProcessEvent::Exit(_)) => {}
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Deadline expiry: SIGTERM the group, drain for the grace window, then
    /// escalate to SIGKILL with an operational warning.
    fn terminate_on_deadline(
        &self,
        term: &ProcessTerminator,
        process: &AgentProcess,
        stdout_buf: &mut String,
        stderr_buf: &mut String,
        truncated: &mut bool,
    ) {
        term.terminate();
        let grace_deadline = Instant::now() + self.grace_period;
        let mut exited = false;

        while Instant::now() < grace_deadline {
            match process.recv_timeout(TICK) {
                Ok(ProcessEvent::Stdout(line)) => {
                    append_capped(stdout_buf, &line, self.max_output_bytes, truncated);
                }
                Ok(ProcessEvent::Stderr(line)) => {
                    append_capped(stderr_buf, &line, self.max_output_bytes, truncated);
                }
                Ok(ProcessEvent::Exit(_)) => {
                    exited = true;
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    exited = true;
                    break;
                }
            }
        }

        if !exited {
            log::warn!(
                "agent did not terminate within {:?} grace period; force killing process group",
                self.grace_period
            );
            term.kill();
        }
    }
}

/// Append a line to a capped buffer; once the cap is hit, drop the rest and
/// mark the result truncated.
fn append_capped(buf: &mut String, line: &str, max: usize, truncated: &mut bool) {
    if buf.len() >= max {
        *truncated = true;
        return;
    }
    buf.push_str(line);
    buf.push('\n');
}

// ============================================================================
// TESTS
// ============================================================================
