//! Input Validator - Length and Injection Screening
//!
//! Runs before the command filter. Enforces a maximum input length and
//! blocks a small set of injection-suspicious markers, plus shell-specific
//! chained-command payloads.

use regex::{Regex, RegexBuilder};

const MAX_INPUT_LENGTH: usize = 10_000;

/// What kind of input is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Code,
    Command,
    Filename,
    General,
}

/// Screens raw inputs before any execution-path-specific filtering.
pub struct InputValidator {
    suspicious: Vec<Regex>,
    shell_injection: Vec<Regex>,
    max_input_length: usize,
}

fn insensitive(source: &str) -> Regex {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|e| panic!("invalid validator pattern {:?}: {}", source, e))
}

impl InputValidator {
    pub fn new() -> Self {
        let suspicious = vec![
            insensitive(r"<script"),
            insensitive(r"javascript:"),
            insensitive(r"data:"),
            insensitive(r"vbscript:"),
            insensitive(r"on(load|click|error)\s*="),
            insensitive(r"\\x[0-9a-f]{2}"),
            insensitive(r"\\u[0-9a-f]{4}"),
            insensitive(r"%3c"),
            insensitive(r"%3e"),
            insensitive(r"&lt;"),
            insensitive(r"&gt;"),
        ];

        // Chained-command payloads that smuggle the forbidden actions past
        // a per-command check.
        let shell_injection = vec![
            insensitive(r";\s*rm\s+-rf\s+/"),
            insensitive(r"&&\s*rm\s+-rf\s+/"),
            insensitive(r"\|\|\s*rm\s+-rf\s+/"),
            insensitive(r"`rm\s+-rf\s+/`"),
            insensitive(r"\$\(\s*rm\s+-rf\s+/"),
            insensitive(r";\s*sudo\s"),
            insensitive(r"&&\s*sudo\s"),
        ];

        Self {
            suspicious,
            shell_injection,
            max_input_length: MAX_INPUT_LENGTH,
        }
    }

    /// Validate an input. Returns the rejection reason, or `None` if valid.
    pub fn validate(&self, input: &str, kind: InputKind) -> Option<String> {
        if input.len() > self.max_input_length {
            return Some(format!(
                "Input too long: {} > {}",
                input.len(),
                self.max_input_length
            ));
        }

        for pattern in &self.suspicious {
            if pattern.is_match(input) {
                return Some(format!(
                    "Input contains suspicious pattern: {}",
                    pattern.as_str()
                ));
            }
        }

        match kind {
            InputKind::Command => self.validate_command(input),
            InputKind::Filename => Self::validate_filename(input),
            InputKind::Code | InputKind::General => None,
        }
    }

    fn validate_command(&self, command: &str) -> Option<String> {
        for pattern in &self.shell_injection {
            if pattern.is_match(command) {
                return Some(format!(
                    "Command contains dangerous injection pattern: {}",
                    pattern.as_str()
                ));
            }
        }
        None
    }

    fn validate_filename(filename: &str) -> Option<String> {
        if filename.contains("..") || filename.starts_with('/') {
            return Some("Filename contains path traversal".to_string());
        }
        for ch in ['<', '>', ':', '"', '|', '?', '*', '\0'] {
            if filename.contains(ch) {
                return Some(format!("Filename contains dangerous character: {:?}", ch));
            }
        }
        None
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_limit() {
        let v = InputValidator::new();
        let long = "a".repeat(MAX_INPUT_LENGTH + 1);
        assert!(v.validate(&long, InputKind::General).is_some());
        let exactly = "a".repeat(MAX_INPUT_LENGTH);
        assert!(v.validate(&exactly, InputKind::General).is_none());
    }

    #[test]
    fn test_suspicious_markers() {
        let v = InputValidator::new();
        assert!(v.validate("<script>alert(1)</script>", InputKind::General).is_some());
        assert!(v.validate("javascript:void(0)", InputKind::General).is_some());
        assert!(v.validate("onerror=steal()", InputKind::General).is_some());
        assert!(v.validate("%3Cimg%3E", InputKind::General).is_some());
    }

    #[test]
    fn test_shell_injection_chains() {
        let v = InputValidator::new();
        assert!(v.validate("ls; rm -rf /", InputKind::Command).is_some());
        assert!(v.validate("true && sudo reboot", InputKind::Command).is_some());
        assert!(v.validate("echo $(rm -rf /tmp)", InputKind::Command).is_none());
        assert!(v.validate("ls -la && cat out.txt", InputKind::Command).is_none());
    }

    #[test]
    fn test_filename_validation() {
        let v = InputValidator::new();
        assert!(v.validate("../../etc/passwd", InputKind::Filename).is_some());
        assert!(v.validate("/abs/path", InputKind::Filename).is_some());
        assert!(v.validate("weird|name", InputKind::Filename).is_some());
        assert!(v.validate("report-final.pdf", InputKind::Filename).is_none());
    }
}
