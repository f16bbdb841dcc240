//! Request intent classification.
//!
//! Determines how an incoming request should be treated:
//! - Control commands (reset, status, cancel, ...) are handled by the engine
//!   itself and never reach the agent.
//! - Mutating requests contain a trigger token from the configured
//!   multilingual vocabulary and run with execution permission.
//! - Everything else is read-only and runs with an information-only preamble.
//!
//! The trigger vocabulary is a data-driven locale -> token table rather than
//! anything structural, so new locales are a configuration change.

use std::collections::BTreeMap;

/// Reserved instructions handled by the engine rather than the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Reset,
    Status,
    Context,
    History,
    Cancel,
    /// `cd <path>`; `None` means the argument was missing.
    ChangeDir(Option<String>),
    Help,
}

/// Classification outcome for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    ReadOnly,
    Mutating,
    Control(ControlCommand),
}

/// Locale -> trigger token table.
///
/// A request containing any trigger token (case-insensitive substring match
/// over the normalized text) is classified as mutating. Ties break toward
/// mutating: a destructive request must never be under-classified as
/// read-only.
#[derive(Debug, Clone)]
pub struct TriggerVocabulary {
    locales: BTreeMap<String, Vec<String>>,
}

impl Default for TriggerVocabulary {
    fn default() -> Self {
        let mut locales = BTreeMap::new();
        locales.insert(
            "en".to_string(),
            ["execute", "run", "fix", "create", "delete", "restart"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        locales.insert(
            "ru".to_string(),
            [
                "выполни",
                "сделай",
                "запусти",
                "исправь",
                "создай",
                "удали",
                "перезапусти",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        );
        Self { locales }
    }
}

impl TriggerVocabulary {
    /// Create an empty vocabulary (nothing classifies as mutating).
    pub fn empty() -> Self {
        Self {
            locales: BTreeMap::new(),
        }
    }

    /// Replace or add the token list for a locale. Tokens are normalized to
    /// lowercase at insertion.
    pub fn set_locale(&mut self, locale: impl Into<String>, tokens: Vec<String>) {
        self.locales.insert(
            locale.into(),
            tokens.into_iter().map(|t| t.to_lowercase()).collect(),
        );
    }

    /// Iterate over every configured token, all locales flattened.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.locales.values().flatten().map(String::as_str)
    }

    /// True when the normalized (lowercased) text contains any trigger token.
    pub fn matches(&self, normalized: &str) -> bool {
        self.tokens().any(|token| normalized.contains(token))
    }
}

/// Classifies requests against a trigger vocabulary.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    vocabulary: TriggerVocabulary,
}

impl IntentClassifier {
    pub fn new(vocabulary: TriggerVocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &TriggerVocabulary {
        &self.vocabulary
    }

    /// Classify one request. Control command recognition takes precedence
    /// over trigger matching.
    pub fn classify(&self, text: &str) -> Intent {
        if let Some(command) = parse_control(text) {
            return Intent::Control(command);
        }

        if self.vocabulary.matches(&text.to_lowercase()) {
            Intent::Mutating
        } else {
            Intent::ReadOnly
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(TriggerVocabulary::default())
    }
}

/// Parse a control command out of the request text.
///
/// A request is a control command when:
/// - it starts with `/` and the first token names a reserved command
///   (`/status`, `/cd /srv`), or
/// - the whole trimmed text is exactly a reserved single token (`cancel`), or
/// - it is `cd <path>` without the slash (transports may strip it).
fn parse_control(text: &str) -> Option<ControlCommand> {
    let trimmed = text.trim();
    let slash = trimmed.starts_with('/');
    let stripped = trimmed.strip_prefix('/').unwrap_or(trimmed);

    let mut words = stripped.split_whitespace();
    let name = words.next()?.to_lowercase();
    let rest: Vec<&str> = words.collect();

    if name == "cd" {
        if !slash && rest.is_empty() {
            // Bare "cd" with no slash and no argument reads like prose.
            return None;
        }
        let arg = if rest.is_empty() {
            None
        } else {
            Some(rest.join(" "))
        };
        return Some(ControlCommand::ChangeDir(arg));
    }

    // All other commands take no argument; without a slash only an exact
    // single-token match counts ("cancel" yes, "cancel the deploy" no).
    if !slash && !rest.is_empty() {
        return None;
    }

    match name.as_str() {
        "start" => Some(ControlCommand::Start),
        "reset" => Some(ControlCommand::Reset),
        "status" => Some(ControlCommand::Status),
        "context" => Some(ControlCommand::Context),
        "history" => Some(ControlCommand::History),
        "cancel" => Some(ControlCommand::Cancel),
        "help" => Some(ControlCommand::Help),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> IntentClassifier {
        IntentClassifier::default()
    }

    mod control_commands {
        use super::*;

        #[test]
        fn slash_commands_are_recognized() {
            assert_eq!(
                classifier().classify("/reset"),
                Intent::Control(ControlCommand::Reset)
            );
            assert_eq!(
                classifier().classify("/status"),
                Intent::Control(ControlCommand::Status)
            );
            assert_eq!(
                classifier().classify("/help"),
                Intent::Control(ControlCommand::Help)
            );
        }

        #[test]
        fn bare_single_token_is_control() {
            assert_eq!(
                classifier().classify("cancel"),
                Intent::Control(ControlCommand::Cancel)
            );
            assert_eq!(
                classifier().classify("  history  "),
                Intent::Control(ControlCommand::History)
            );
        }

        #[test]
        fn bare_token_with_trailing_words_is_not_control() {
            // "cancel the deploy" is a request for the agent, not /cancel.
            assert_eq!(classifier().classify("cancel the deploy"), Intent::ReadOnly);
        }

        #[test]
        fn cd_carries_its_argument() {
            assert_eq!(
                classifier().classify("/cd /srv/app"),
                Intent::Control(ControlCommand::ChangeDir(Some("/srv/app".to_string())))
            );
            assert_eq!(
                classifier().classify("cd /srv/app"),
                Intent::Control(ControlCommand::ChangeDir(Some("/srv/app".to_string())))
            );
        }

        #[test]
        fn slash_cd_without_argument_is_control_with_missing_arg() {
            assert_eq!(
                classifier().classify("/cd"),
                Intent::Control(ControlCommand::ChangeDir(None))
            );
        }

        #[test]
        fn control_takes_precedence_over_triggers() {
            // "restart" is a trigger token, but "/cancel" must stay control.
            assert_eq!(
                classifier().classify("/cancel"),
                Intent::Control(ControlCommand::Cancel)
            );
        }

        #[test]
        fn unknown_slash_command_falls_through() {
            assert_eq!(classifier().classify("/frobnicate"), Intent::ReadOnly);
        }
    }

    mod trigger_matching {
        use super::*;

        #[test]
        fn exact_trigger_token_is_mutating() {
            assert_eq!(classifier().classify("execute"), Intent::Mutating);
        }

        #[test]
        fn trigger_inside_sentence_is_mutating() {
            assert_eq!(
                classifier().classify("please restart the nginx service"),
                Intent::Mutating
            );
        }

        #[test]
        fn matching_is_case_insensitive() {
            assert_eq!(classifier().classify("RUN the tests"), Intent::Mutating);
        }

        #[test]
        fn localized_trigger_is_mutating() {
            assert_eq!(
                classifier().classify("запусти миграцию базы"),
                Intent::Mutating
            );
            assert_eq!(classifier().classify("удали старые логи"), Intent::Mutating);
        }

        #[test]
        fn plain_question_is_read_only() {
            assert_eq!(
                classifier().classify("show me the list of files"),
                Intent::ReadOnly
            );
        }

        #[test]
        fn custom_locale_extends_the_table() {
            let mut vocabulary = TriggerVocabulary::empty();
            vocabulary.set_locale("de", vec!["starte".to_string()]);
            let classifier = IntentClassifier::new(vocabulary);
            assert_eq!(classifier.classify("starte den Server"), Intent::Mutating);
            assert_eq!(classifier.classify("execute this"), Intent::ReadOnly);
        }
    }
}
