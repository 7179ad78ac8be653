//! Error taxonomy: typed pipeline errors, classification of failed
//! sandbox runs and the builder for minimal fallback results.

use thiserror::Error;

use crate::feedback::{JudgeResult, Message};
use crate::sandbox::ExecutionOutcome;
use crate::status::{Locale, Status};

/// Errors raised inside the pipeline. All of these are caught at the
/// orchestrator boundary and converted into an `internal error` result;
/// none propagate to the caller.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// Staging the submission files failed before the sandbox started.
    /// Fatal, never retried.
    #[error("failed to stage submission: {0}")]
    Staging(#[source] std::io::Error),
    /// The sandbox process could not be launched or awaited.
    #[error("failed to run sandbox: {0}")]
    Launch(#[source] std::io::Error),
    /// The judge produced malformed or contradictory protocol output.
    #[error("{title}: {description}")]
    Protocol { title: String, description: String },
    #[error("internal judge error: {0}")]
    Internal(String),
}

impl JudgeError {
    pub fn protocol(title: impl Into<String>, description: impl Into<String>) -> Self {
        JudgeError::Protocol {
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Classification of a failed sandbox run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MemoryLimit,
    TimeLimit,
    Internal,
}

/// Recognizer for one error kind: the exit codes it can produce and the
/// stderr substrings that confirm it. An empty token list means the exit
/// code alone is sufficient.
#[derive(Debug, Clone)]
pub struct ErrorIdentifier {
    pub kind: ErrorKind,
    pub codes: Vec<i32>,
    pub tokens: Vec<String>,
}

impl ErrorIdentifier {
    pub fn new(kind: ErrorKind, codes: &[i32], tokens: &[&str]) -> Self {
        Self {
            kind,
            codes: codes.to_vec(),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn matches(&self, exit_code: i32, stderr: &str) -> bool {
        self.codes.contains(&exit_code)
            && (self.tokens.is_empty() || self.tokens.iter().any(|t| stderr.contains(t.as_str())))
    }
}

/// Exit codes reconstructed from a kill signal (SIGKILL itself, or the
/// shell convention 128 + SIGKILL). These cannot be told apart by code
/// alone: both the host's memory limiter and the watchdog kill with
/// signal 9.
const KILL_SIGNAL_CODES: [i32; 2] = [9, 137];

/// The static identifier table, in match priority order: memory limit
/// before time limit, internal error as the fallback.
pub fn default_identifiers() -> Vec<ErrorIdentifier> {
    vec![
        // The container receives signal 9 from the host when the memory
        // limit is exceeded.
        ErrorIdentifier::new(ErrorKind::MemoryLimit, &[1], &["got signal 9"]),
        // Exit codes of the external timeout killer.
        ErrorIdentifier::new(ErrorKind::TimeLimit, &[9, 124, 137], &[]),
    ]
}

/// Classify a failed run.
///
/// Kill-signal codes are ambiguous between an OOM kill and a watchdog
/// kill, so the watchdog race decides: if the external timeout fired
/// before the process exited it was a timeout, otherwise the same signal
/// is read as a memory-limit kill. This is a heuristic with a known
/// false-classification risk; the signal number is not a real exit
/// status.
pub fn classify(identifiers: &[ErrorIdentifier], outcome: &ExecutionOutcome) -> ErrorKind {
    if KILL_SIGNAL_CODES.contains(&outcome.exit_code) {
        return if outcome.timed_out {
            ErrorKind::TimeLimit
        } else {
            ErrorKind::MemoryLimit
        };
    }

    identifiers
        .iter()
        .find(|identifier| identifier.matches(outcome.exit_code, &outcome.stderr))
        .map(|identifier| identifier.kind)
        .unwrap_or(ErrorKind::Internal)
}

/// Builder for a minimal, schema-valid result on failure paths where no
/// judge output exists. Each setter consumes and returns the builder, so
/// a builder value is never shared or mutated in place.
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    accepted: bool,
    status: Status,
    description: String,
    message_format: String,
    message_description: String,
    message_permission: String,
}

impl Default for ErrorBuilder {
    fn default() -> Self {
        Self {
            accepted: false,
            status: Status::RuntimeError,
            description: "runtime error".to_string(),
            message_format: "text".to_string(),
            message_description: String::new(),
            message_permission: "staff".to_string(),
        }
    }
}

impl ErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted(mut self, accepted: bool) -> Self {
        self.accepted = accepted;
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn message_format(mut self, format: impl Into<String>) -> Self {
        self.message_format = format.into();
        self
    }

    pub fn message_description(mut self, description: impl Into<String>) -> Self {
        self.message_description = description.into();
        self
    }

    pub fn message_permission(mut self, permission: impl Into<String>) -> Self {
        self.message_permission = permission.into();
        self
    }

    pub fn build(self) -> JudgeResult {
        JudgeResult {
            accepted: self.accepted,
            status: self.status,
            description: Some(self.description),
            groups: vec![],
            messages: vec![Message::Rich {
                format: self.message_format,
                description: self.message_description,
                permission: Some(self.message_permission),
            }],
            annotations: vec![],
            runtime_metrics: None,
        }
    }
}

/// Build the fallback result for a classified failure.
pub fn error_result(kind: ErrorKind, stderr: &str, locale: Locale) -> JudgeResult {
    let status = match kind {
        ErrorKind::MemoryLimit => Status::MemoryLimitExceeded,
        ErrorKind::TimeLimit => Status::TimeLimitExceeded,
        ErrorKind::Internal => Status::InternalError,
    };
    ErrorBuilder::new()
        .status(status)
        .description(status.human(locale))
        .message_description(stderr)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn outcome(exit_code: i32, stderr: &str, timed_out: bool) -> ExecutionOutcome {
        ExecutionOutcome {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            wall_time: Duration::from_millis(10),
            timed_out,
        }
    }

    #[test]
    fn test_memory_kill_token_classifies_as_memory_limit() {
        let table = default_identifiers();
        let kind = classify(&table, &outcome(1, "container got signal 9", false));
        assert_eq!(kind, ErrorKind::MemoryLimit);
    }

    #[test]
    fn test_timeout_command_exit_code_classifies_as_time_limit() {
        let table = default_identifiers();
        let kind = classify(&table, &outcome(124, "whatever", false));
        assert_eq!(kind, ErrorKind::TimeLimit);
    }

    #[test]
    fn test_kill_signal_without_watchdog_reads_as_memory_limit() {
        let table = default_identifiers();
        assert_eq!(classify(&table, &outcome(137, "", false)), ErrorKind::MemoryLimit);
        assert_eq!(classify(&table, &outcome(9, "", false)), ErrorKind::MemoryLimit);
    }

    #[test]
    fn test_kill_signal_with_watchdog_reads_as_time_limit() {
        let table = default_identifiers();
        assert_eq!(classify(&table, &outcome(137, "", true)), ErrorKind::TimeLimit);
        assert_eq!(classify(&table, &outcome(9, "", true)), ErrorKind::TimeLimit);
    }

    #[test]
    fn test_unmatched_exit_code_falls_back_to_internal() {
        let table = default_identifiers();
        assert_eq!(classify(&table, &outcome(1, "no token here", false)), ErrorKind::Internal);
        assert_eq!(classify(&table, &outcome(42, "", false)), ErrorKind::Internal);
    }

    #[test]
    fn test_builder_defaults() {
        let result = ErrorBuilder::new().build();
        assert!(!result.accepted);
        assert_eq!(result.status, Status::RuntimeError);
        assert_eq!(result.description.as_deref(), Some("runtime error"));
        assert_eq!(result.messages.len(), 1);
        match &result.messages[0] {
            Message::Rich { format, permission, .. } => {
                assert_eq!(format, "text");
                assert_eq!(permission.as_deref(), Some("staff"));
            }
            Message::Plain(_) => panic!("expected rich message"),
        }
    }

    #[test]
    fn test_error_result_maps_classification_to_status() {
        let result = error_result(ErrorKind::TimeLimit, "killed", Locale::En);
        assert_eq!(result.status, Status::TimeLimitExceeded);
        assert_eq!(result.description.as_deref(), Some("Time limit exceeded"));

        let result = error_result(ErrorKind::MemoryLimit, "", Locale::Nl);
        assert_eq!(result.status, Status::MemoryLimitExceeded);
        assert_eq!(result.description.as_deref(), Some("Geheugenlimiet overschreden"));
    }
}
