use serde::Serialize;
use std::path::PathBuf;

/// Error text reported when an execution outlives its time budget.
pub const TIMEOUT_MESSAGE: &str = "execution exceeded the configured time limit";

/// Which failure shape produced an unsuccessful outcome.
///
/// Callers use this to keep timeouts distinct from exceptions raised by the
/// submitted code in user-facing text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The evaluated code raised.
    Runtime,
    /// The time budget elapsed before the worker finished.
    Timeout,
    /// Something outside the evaluated code failed (I/O, interpreter launch).
    Internal,
}

/// The single value that leaves the engine for every execution.
///
/// Fields are private so the pairing between `success` and `error` cannot be
/// broken after construction:
///
/// - `success == true` means `error` is absent and `failure` is absent.
/// - `success == false` means `error` is present and non-empty, and
///   `artifact_paths` is empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    success: bool,
    output: Option<String>,
    error: Option<String>,
    artifact_paths: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<FailureKind>,
}

impl ExecutionOutcome {
    /// Clean completion with captured stdout and the artifact set.
    #[must_use]
    pub fn succeeded(output: String, artifact_paths: Vec<PathBuf>) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            artifact_paths,
            failure: None,
        }
    }

    /// The evaluated code raised; `partial_output` is whatever reached stdout first.
    #[must_use]
    pub fn runtime_failure(error: impl Into<String>, partial_output: String) -> Self {
        Self::failed(FailureKind::Runtime, error.into(), Some(partial_output))
    }

    #[must_use]
    pub fn timed_out() -> Self {
        Self::failed(FailureKind::Timeout, TIMEOUT_MESSAGE.to_string(), None)
    }

    #[must_use]
    pub fn internal_failure(error: impl Into<String>) -> Self {
        Self::failed(FailureKind::Internal, error.into(), None)
    }

    fn failed(kind: FailureKind, error: String, output: Option<String>) -> Self {
        let error = if error.trim().is_empty() {
            match kind {
                FailureKind::Runtime => "execution failed without a traceback".to_string(),
                FailureKind::Timeout => TIMEOUT_MESSAGE.to_string(),
                FailureKind::Internal => "internal engine failure".to_string(),
            }
        } else {
            error
        };
        Self {
            success: false,
            output,
            error: Some(error),
            artifact_paths: Vec::new(),
            failure: Some(kind),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn artifact_paths(&self) -> &[PathBuf] {
        &self.artifact_paths
    }

    #[must_use]
    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.failure == Some(FailureKind::Timeout)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn failures_never_carry_artifacts_or_empty_errors() {
        let outcome = ExecutionOutcome::runtime_failure("  ", "partial".to_string());
        assert!(!outcome.success());
        assert!(outcome.error().is_some_and(|e| !e.trim().is_empty()));
        assert!(outcome.artifact_paths().is_empty());
        assert_eq!(outcome.output(), Some("partial"));
    }

    #[test]
    fn timeout_has_no_output() {
        let outcome = ExecutionOutcome::timed_out();
        assert!(outcome.is_timeout());
        assert_eq!(outcome.output(), None);
        assert_eq!(outcome.error(), Some(TIMEOUT_MESSAGE));
    }

    #[test]
    fn success_serializes_without_failure_kind() {
        let outcome = ExecutionOutcome::succeeded(String::new(), Vec::new());
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["success"], true);
        assert!(value["error"].is_null());
        assert!(value.get("failure").is_none());
    }
}
