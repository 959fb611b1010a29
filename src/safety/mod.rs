//! Safety Gate
//!
//! Guardrails over input and output text. Stages run in a fixed order and
//! short-circuit on the first violation:
//! sanitize → injection detection → PII redaction → moderation.
//!
//! Given identical text and ruleset version the outcome is identical;
//! there is no hidden randomness, which keeps the gate unit-testable.

use crate::error::CoreError;
use regex::Regex;
use tracing::warn;

/// Bump when any rule list or pattern below changes.
pub const RULESET_VERSION: &str = "2025.08-2";

pub const MAX_INPUT_CHARS: usize = 10_000;

/// Phrases that indicate an attempt to override system behavior.
const INJECTION_CUES: &[&str] = &[
    "ignore previous",
    "ignore all previous",
    "disregard previous",
    "system prompt",
    "as the assistant",
    "you must not follow",
    "new instructions:",
    "### system",
    "begin system",
];

/// Disallowed content, matched whole-word per category.
const BANNED_WORDS: &[(&str, &[&str])] = &[
    ("profanity", &["fuck", "shit", "bitch"]),
    ("discriminatory", &["racist", "sexist"]),
    ("harmful", &["suicide", "self-harm"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Text that has passed every stage, with a note of any PII masked.
#[derive(Debug, Clone)]
pub struct SafeText {
    pub text: String,
    pub redacted_pii: Vec<&'static str>,
}

pub struct SafetyGate {
    email: Regex,
    phone: Regex,
    card: Regex,
    ssn: Regex,
    banned: Vec<(&'static str, Regex)>,
}

impl SafetyGate {
    pub fn new() -> Self {
        // Patterns mirror the classic PII shapes: email, intl phone,
        // 13-19 digit card runs, US SSN.
        let email = Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").expect("email regex");
        let phone = Regex::new(r"\+?\d[\d\s().-]{7,}\d").expect("phone regex");
        let card = Regex::new(r"\b(?:\d[ -]*?){13,19}\b").expect("card regex");
        let ssn = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn regex");

        let banned = BANNED_WORDS
            .iter()
            .map(|(category, words)| {
                let joined = words
                    .iter()
                    .map(|w| regex::escape(w))
                    .collect::<Vec<_>>()
                    .join("|");
                let rx = Regex::new(&format!(r"\b(?:{})\b", joined)).expect("banned-word regex");
                (*category, rx)
            })
            .collect();

        Self {
            email,
            phone,
            card,
            ssn,
            banned,
        }
    }

    pub fn ruleset_version(&self) -> &'static str {
        RULESET_VERSION
    }

    /// Run the full pipeline. A rejection is terminal for the turn: the
    /// caller must not forward the text to the model.
    pub fn check(&self, text: &str, direction: Direction) -> Result<SafeText, CoreError> {
        if direction == Direction::Input {
            self.validate_input(text)?;
        }

        let sanitized = sanitize(text);
        self.check_injection(&sanitized, direction)?;

        let (redacted, pii) = self.redact_pii(sanitized);
        self.moderate(&redacted)?;

        Ok(SafeText {
            text: redacted,
            redacted_pii: pii,
        })
    }

    fn validate_input(&self, text: &str) -> Result<(), CoreError> {
        if text.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "Please enter a non-empty message.".to_string(),
            ));
        }
        if text.chars().count() > MAX_INPUT_CHARS {
            return Err(CoreError::InvalidInput(
                "Re-type your answer.\nYour message is too long.".to_string(),
            ));
        }
        Ok(())
    }

    fn check_injection(&self, text: &str, direction: Direction) -> Result<(), CoreError> {
        // Cues describe instructions aimed at the model; they only apply
        // to text flowing toward it.
        if direction == Direction::Output {
            return Ok(());
        }

        let lowered = text.to_lowercase();
        if let Some(cue) = INJECTION_CUES.iter().find(|c| lowered.contains(**c)) {
            warn!(kind = "injection_detected", cue = %cue, "Safety Gate rejection");
            return Err(CoreError::InjectionDetected(format!("matched cue '{}'", cue)));
        }
        Ok(())
    }

    fn redact_pii(&self, mut text: String) -> (String, Vec<&'static str>) {
        let mut found = Vec::new();
        // Most specific first: the broad phone pattern also matches SSN and
        // card digit runs, so it must only see what the others left behind.
        let rules: [(&Regex, &'static str); 4] = [
            (&self.ssn, "SSN"),
            (&self.card, "CARD"),
            (&self.email, "EMAIL"),
            (&self.phone, "PHONE"),
        ];

        for (rx, label) in rules {
            if rx.is_match(&text) {
                found.push(label);
                text = rx.replace_all(&text, format!("[{}]", label)).into_owned();
            }
        }

        if !found.is_empty() {
            warn!(kind = "pii_redacted", labels = ?found, "Masked PII before prompting");
        }
        (text, found)
    }

    fn moderate(&self, text: &str) -> Result<(), CoreError> {
        let lowered = text.to_lowercase();
        let violations: Vec<&'static str> = self
            .banned
            .iter()
            .filter(|(_, rx)| rx.is_match(&lowered))
            .map(|(category, _)| *category)
            .collect();

        if !violations.is_empty() {
            warn!(kind = "moderation_violation", categories = ?violations, "Safety Gate rejection");
            return Err(CoreError::ModerationViolation(format!(
                "categories: {}",
                violations.join(", ")
            )));
        }
        Ok(())
    }
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip NUL and non-newline control characters, drop structural marker
/// lines that could read as system headers, and trim.
fn sanitize(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let t = line.trim().to_lowercase();
            !(t.starts_with("### system") || t.starts_with("begin system"))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}
