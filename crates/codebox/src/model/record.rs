use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::model::{ExecutionOutcome, RecordId};

/// Who asked for an execution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    pub name: String,
}

impl Sender {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A history entry before the store has assigned an id and timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub sender_id: String,
    pub sender_name: String,
    pub code: String,
    pub description: Option<String>,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub artifact_paths: Vec<PathBuf>,
    pub duration_ms: u64,
}

impl NewRecord {
    /// Capture an outcome together with who ran it and how long it took.
    #[must_use]
    pub fn from_outcome(
        sender: &Sender,
        code: &str,
        description: Option<&str>,
        outcome: &ExecutionOutcome,
        elapsed: Duration,
    ) -> Self {
        Self {
            sender_id: sender.id.clone(),
            sender_name: sender.name.clone(),
            code: code.to_string(),
            description: description
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string),
            success: outcome.success(),
            output: outcome.output().map(str::to_string),
            error: outcome.error().map(str::to_string),
            artifact_paths: outcome.artifact_paths().to_vec(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// An immutable, persisted execution record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: RecordId,
    pub sender_id: String,
    pub sender_name: String,
    pub code: String,
    pub description: Option<String>,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub artifact_paths: Vec<PathBuf>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    #[must_use]
    pub fn from_new(id: RecordId, record: NewRecord, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            sender_id: record.sender_id,
            sender_name: record.sender_name,
            code: record.code,
            description: record.description,
            success: record.success,
            output: record.output,
            error: record.error,
            artifact_paths: record.artifact_paths,
            duration_ms: record.duration_ms,
            created_at,
        }
    }
}
