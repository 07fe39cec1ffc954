use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub type EngineResult<T> = Result<T, EngineError>;

/// Stable error codes shared by the library and the CLI exit status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "E_POLICY_DENIED")]
    PolicyDenied,
    #[serde(rename = "E_PERMISSION_DENIED")]
    PermissionDenied,
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    #[serde(rename = "E_RUNTIME")]
    Runtime,
    #[serde(rename = "E_CONFIG")]
    Config,
    #[serde(rename = "E_IO")]
    Io,
    #[serde(rename = "E_HISTORY")]
    History,
    #[serde(rename = "E_PROTOCOL")]
    Protocol,
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    pub const ALL: [Self; 9] = [
        Self::PolicyDenied,
        Self::PermissionDenied,
        Self::Timeout,
        Self::Runtime,
        Self::Config,
        Self::Io,
        Self::History,
        Self::Protocol,
        Self::Internal,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PolicyDenied => "E_POLICY_DENIED",
            Self::PermissionDenied => "E_PERMISSION_DENIED",
            Self::Timeout => "E_TIMEOUT",
            Self::Runtime => "E_RUNTIME",
            Self::Config => "E_CONFIG",
            Self::Io => "E_IO",
            Self::History => "E_HISTORY",
            Self::Protocol => "E_PROTOCOL",
            Self::Internal => "E_INTERNAL",
        }
    }

    /// Process exit status the CLI uses for this code.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::PolicyDenied => 2,
            Self::PermissionDenied => 3,
            Self::Timeout => 4,
            Self::Runtime => 5,
            Self::Config => 6,
            Self::Io => 7,
            Self::History => 8,
            Self::Protocol => 10,
            Self::Internal => 9,
        }
    }

    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable form of an [`EngineError`] for JSON output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Errors raised by configuration, history and environment plumbing.
///
/// Execution failures never take this shape; they are folded into an
/// `ExecutionOutcome` before leaving the coordinator.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<Value>,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn policy_denied(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::PolicyDenied, message, context)
    }

    pub fn config(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Config, message, context)
    }

    pub fn io(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Io,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn history(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::History,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn protocol(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Protocol,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message, None)
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }

    #[must_use]
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            context: self.context.clone(),
        }
    }
}

impl Diagnostic for EngineError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code))
    }
}
