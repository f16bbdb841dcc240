//! Downstream prompt composition.
//!
//! The agent receives one composed prompt per invocation: a safety preamble
//! derived from the intent classification, a bounded window of prior
//! exchanges, and the current request. The preamble is what actually holds
//! the read-only line: a request without a trigger token is wrapped in an
//! explicit no-execution instruction before it ever reaches the agent.

use crate::session::Exchange;

/// Assistant halves longer than this are clipped when rendered into the
/// context block, so one verbose answer cannot crowd out the window.
const CONTEXT_ASSISTANT_CLIP: usize = 500;

const SAFETY_PREAMBLE: &str = "\
IMPORTANT CONTEXT: You are being driven through a remote chat interface.
The operator writes to you from a phone or computer; your replies are shown
in a chat window, so keep them concise and well-formatted.

CRITICAL RULES - YOU MUST FOLLOW:
1. DO NOT execute ANY system command unless the request explicitly asks for
   an action (execute, run, fix, create, delete, restart, ...)
2. If the operator merely mentions something or asks about status - ONLY
   provide information
3. NEVER run service managers, package managers, or destructive commands
   without an explicit request
4. Default mode is READ-ONLY - analyze and inform

";

/// Prefix applied to the request line when execution is not permitted.
const READ_ONLY_MARKER: &str = "[INFORMATION ONLY - DO NOT EXECUTE COMMANDS]";

/// Compose the full prompt for one invocation.
///
/// `exchanges` is the session's stored context; only the most recent
/// `max_exchanges` are rendered.
pub fn build_prompt(
    request_text: &str,
    exchanges: &[Exchange],
    mutating: bool,
    max_exchanges: usize,
) -> String {
    let mut prompt = String::from(SAFETY_PREAMBLE);

    if mutating {
        prompt.push_str("CURRENT MODE: Execution allowed (operator explicitly requested action)\n");
    } else {
        prompt.push_str("CURRENT MODE: Information only (no execution)\n");
    }
    prompt.push('\n');

    let window_start = exchanges.len().saturating_sub(max_exchanges);
    let window = &exchanges[window_start..];
    if !window.is_empty() {
        prompt.push_str("Previous context:\n");
        for exchange in window {
            prompt.push_str("User: ");
            prompt.push_str(&exchange.user);
            prompt.push('\n');
            prompt.push_str("Assistant: ");
            prompt.push_str(&clip(&exchange.assistant, CONTEXT_ASSISTANT_CLIP));
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    prompt.push_str("Current request: ");
    if !mutating {
        prompt.push_str(READ_ONLY_MARKER);
        prompt.push(' ');
    }
    prompt.push_str(request_text);
    prompt
}

/// Clip text to `max` characters, appending an ellipsis when truncated.
pub fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let clipped: String = text.chars().take(max).collect();
        format!("{clipped}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn exchange(user: &str, assistant: &str) -> Exchange {
        Exchange {
            user: user.to_string(),
            assistant: assistant.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn read_only_prompt_carries_marker_and_mode() {
        let prompt = build_prompt("what is using the disk?", &[], false, 10);
        assert!(prompt.contains("CURRENT MODE: Information only"));
        assert!(prompt.contains(READ_ONLY_MARKER));
        assert!(prompt.ends_with("what is using the disk?"));
    }

    #[test]
    fn mutating_prompt_grants_execution_without_marker() {
        let prompt = build_prompt("restart nginx", &[], true, 10);
        assert!(prompt.contains("CURRENT MODE: Execution allowed"));
        assert!(!prompt.contains(READ_ONLY_MARKER));
    }

    #[test]
    fn context_window_takes_the_most_recent_exchanges() {
        let exchanges: Vec<Exchange> = (0..5)
            .map(|i| exchange(&format!("q{i}"), &format!("a{i}")))
            .collect();
        let prompt = build_prompt("next", &exchanges, false, 2);
        assert!(!prompt.contains("User: q2"));
        assert!(prompt.contains("User: q3"));
        assert!(prompt.contains("User: q4"));
    }

    #[test]
    fn empty_context_omits_the_context_block() {
        let prompt = build_prompt("hello", &[], false, 10);
        assert!(!prompt.contains("Previous context:"));
    }

    #[test]
    fn long_assistant_text_is_clipped_in_context() {
        let long = "x".repeat(600);
        let exchanges = vec![exchange("q", &long)];
        let prompt = build_prompt("next", &exchanges, false, 10);
        assert!(prompt.contains(&format!("{}...", "x".repeat(500))));
        assert!(!prompt.contains(&long));
    }

    #[test]
    fn clip_is_noop_under_the_limit() {
        assert_eq!(clip("short", 100), "short");
    }
}
