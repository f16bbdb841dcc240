//! Agent command construction.
//!
//! Builds the `std::process::Command` that launches the agent CLI. The agent
//! runs in the user's login shell so it picks up PATH and environment the way
//! an interactive session would, with fallbacks for non-POSIX shells and
//! proper quoting for arguments with spaces or shell metacharacters.
//!
//! On Unix the child is placed in its own process group so that timeout and
//! cancellation can signal the whole tree, not just the leaf process.

use std::process::Command;

/// Exit status observed when the agent process terminates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentExit {
    /// Process exit code; -1 when the process died from a signal.
    pub code: i32,
    /// Terminating signal, when the process was killed (Unix only).
    pub signal: Option<i32>,
}

impl AgentExit {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code().unwrap_or(-1),
            signal,
        }
    }

    /// True for a clean zero exit with no terminating signal.
    pub fn success(&self) -> bool {
        self.code == 0 && self.signal.is_none()
    }
}

/// Prepend the binary's parent directory to PATH so sibling tools are found.
pub fn prepare_path_env(cmd: &mut Command, binary_path: &str) {
    if binary_path.contains('/') {
        if let Some(dir) = std::path::Path::new(binary_path).parent() {
            if let Some(dir_str) = dir.to_str() {
                let existing = std::env::var("PATH").unwrap_or_default();
                let combined = if existing.is_empty() {
                    dir_str.to_string()
                } else {
                    format!("{}:{}", dir_str, existing)
                };
                cmd.env("PATH", combined);
            }
        }
    }
}

/// Build a command that runs the agent binary with args in a login shell.
///
/// The final command format is: `<prefix> '<quoted_command>'` where the
/// default prefix is `$SHELL -l -c` (with a bash/sh fallback for non-POSIX
/// shells). The environment overlay is applied last so configured tokens win
/// over inherited values.
#[cfg(unix)]
pub fn build_agent_command(
    binary_path: &str,
    args: &[String],
    working_dir: Option<&str>,
    shell_prefix: Option<&str>,
    env_overlay: &[(String, String)],
) -> Result<Command, String> {
    let prefix = get_shell_prefix(shell_prefix);

    let prefix_parts: Vec<&str> = prefix.split_whitespace().collect();
    if prefix_parts.is_empty() {
        return Err("Empty shell prefix".to_string());
    }

    let shell_program = prefix_parts[0];
    let shell_args = &prefix_parts[1..];

    let mut command_parts = Vec::with_capacity(args.len() + 1);
    command_parts.push(
        shlex::try_quote(binary_path)
            .map_err(|_| format!("Invalid path: {}", binary_path))?
            .into_owned(),
    );
    for arg in args {
        command_parts.push(
            shlex::try_quote(arg)
                .map_err(|_| format!("Invalid argument: {}", arg))?
                .into_owned(),
        );
    }
    let full_command = command_parts.join(" ");

    let mut cmd = Command::new(shell_program);
    cmd.args(shell_args).arg(&full_command);

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    prepare_path_env(&mut cmd, binary_path);
    for (key, value) in env_overlay {
        cmd.env(key, value);
    }

    // Own process group, so termination signals reach any children the
    // agent spawns.
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    Ok(cmd)
}

/// Get the shell prefix to use for command execution.
///
/// A custom prefix (e.g. "/bin/bash -c") is used verbatim. Otherwise the
/// default prefix is built from $SHELL with `-l -c`; non-POSIX shells (fish,
/// nushell, ...) fall back to /bin/bash or /bin/sh.
#[cfg(unix)]
fn get_shell_prefix(custom_prefix: Option<&str>) -> String {
    if let Some(prefix) = custom_prefix {
        if !prefix.is_empty() {
            return prefix.to_string();
        }
    }

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());

    let shell_name = std::path::Path::new(&shell)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let non_posix = ["fish", "nu", "nushell", "elvish", "xonsh", "ion"];

    let effective_shell = if non_posix.iter().any(|&s| shell_name == s) {
        if std::path::Path::new("/bin/bash").exists() {
            "/bin/bash"
        } else {
            "/bin/sh"
        }
    } else {
        &shell
    };

    format!("{} -l -c", effective_shell)
}

/// Windows version: runs the binary directly (no login shell concept).
#[cfg(windows)]
pub fn build_agent_command(
    binary_path: &str,
    args: &[String],
    working_dir: Option<&str>,
    _shell_prefix: Option<&str>,
    env_overlay: &[(String, String)],
) -> Result<Command, String> {
    let mut cmd = Command::new(binary_path);
    cmd.args(args);

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    prepare_path_env(&mut cmd, binary_path);
    for (key, value) in env_overlay {
        cmd.env(key, value);
    }

    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_exit_success_requires_zero_and_no_signal() {
        let clean = AgentExit {
            code: 0,
            signal: None,
        };
        assert!(clean.success());

        let signalled = AgentExit {
            code: -1,
            signal: Some(15),
        };
        assert!(!signalled.success());

        let failed = AgentExit {
            code: 2,
            signal: None,
        };
        assert!(!failed.success());
    }

    #[test]
    fn agent_exit_serializes() {
        let exit = AgentExit {
            code: 1,
            signal: Some(9),
        };
        let json = serde_json::to_string(&exit).unwrap();
        assert!(json.contains("\"code\":1"));
        assert!(json.contains("\"signal\":9"));
    }

    #[test]
    #[cfg(unix)]
    fn custom_prefix_is_used_verbatim() {
        let result = get_shell_prefix(Some("/bin/zsh -l -c"));
        assert_eq!(result, "/bin/zsh -l -c");
    }

    #[test]
    #[cfg(unix)]
    fn empty_prefix_falls_back_to_default() {
        let result = get_shell_prefix(Some(""));
        assert!(result.ends_with(" -l -c"));
    }

    #[test]
    #[cfg(unix)]
    fn command_quotes_arguments_with_spaces() {
        let cmd = build_agent_command(
            "/path/with spaces/agent",
            &["value with spaces".to_string()],
            None,
            None,
            &[],
        )
        .unwrap();

        let prog = cmd.get_program().to_str().unwrap();
        assert!(prog.ends_with("sh") || prog.ends_with("zsh") || prog.ends_with("bash"));
    }

    #[test]
    #[cfg(unix)]
    fn env_overlay_is_applied() {
        let cmd = build_agent_command(
            "/usr/bin/agent",
            &[],
            None,
            Some("/bin/sh -c"),
            &[("AGENT_TOKEN".to_string(), "secret".to_string())],
        )
        .unwrap();

        let has_token = cmd
            .get_envs()
            .any(|(k, v)| k == "AGENT_TOKEN" && v == Some(std::ffi::OsStr::new("secret")));
        assert!(has_token);
    }

    #[test]
    #[cfg(unix)]
    fn custom_prefix_selects_shell_program() {
        let cmd =
            build_agent_command("/usr/bin/agent", &[], None, Some("/bin/bash -c"), &[]).unwrap();
        assert_eq!(cmd.get_program().to_str().unwrap(), "/bin/bash");
    }
}
