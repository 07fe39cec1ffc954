//! Execution history.
//!
//! The engine only ever appends. Querying, deletion and statistics exist for
//! operators (the CLI `history` commands) and share one filtering path so
//! every store answers queries identically.

mod jsonl;
mod memory;

pub use jsonl::JsonlHistory;
pub use memory::MemoryHistory;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::{HistoryRecord, NewRecord, RecordId};
use crate::runner::EngineResult;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 200;

/// Records younger than this count as recent in [`HistoryStats`].
pub const RECENT_WINDOW_DAYS: i64 = 7;

/// Persistence for executed code and its outcome.
pub trait HistoryStore: Send + Sync {
    fn append(&self, record: NewRecord) -> EngineResult<RecordId>;
    fn get(&self, id: RecordId) -> EngineResult<Option<HistoryRecord>>;
    fn query(&self, query: &HistoryQuery) -> EngineResult<HistoryPage>;
    /// Returns whether a record was removed.
    fn delete(&self, id: RecordId) -> EngineResult<bool>;
    /// Returns how many records were removed.
    fn delete_where(&self, scope: DeleteScope) -> EngineResult<usize>;
    fn stats(&self, now: DateTime<Utc>) -> EngineResult<HistoryStats>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
    pub sender_id: Option<String>,
    /// Case-insensitive match on code, description or sender name.
    pub keyword: Option<String>,
    pub success: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sender_id: None,
            keyword: None,
            success: None,
            since: None,
            until: None,
        }
    }
}

impl HistoryQuery {
    fn matches(&self, record: &HistoryRecord, keyword: Option<&str>) -> bool {
        if let Some(sender) = &self.sender_id {
            if &record.sender_id != sender {
                return false;
            }
        }
        if let Some(success) = self.success {
            if record.success != success {
                return false;
            }
        }
        if self.since.is_some_and(|since| record.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| record.created_at > until) {
            return false;
        }
        keyword.map_or(true, |needle| {
            record.code.to_lowercase().contains(needle)
                || record.sender_name.to_lowercase().contains(needle)
                || record
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(needle))
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub records: Vec<HistoryRecord>,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    All,
    Succeeded,
    Failed,
}

impl DeleteScope {
    #[must_use]
    pub fn includes(self, record: &HistoryRecord) -> bool {
        match self {
            Self::All => true,
            Self::Succeeded => record.success,
            Self::Failed => !record.success,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage of successful executions, rounded to two decimals.
    pub success_rate: f64,
    pub unique_users: usize,
    pub recent: usize,
}

/// Filter, order newest first and slice one page.
pub(crate) fn paginate(records: Vec<HistoryRecord>, query: &HistoryQuery) -> HistoryPage {
    let keyword = query
        .keyword
        .as_deref()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty());
    let mut matched: Vec<HistoryRecord> = records
        .into_iter()
        .filter(|record| query.matches(record, keyword.as_deref()))
        .collect();
    matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, MAX_PAGE_SIZE);
    let total_count = matched.len();
    let total_pages = total_count.div_ceil(page_size);
    let records = matched
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .collect();

    HistoryPage {
        records,
        total_count,
        page,
        page_size,
        total_pages,
    }
}

pub(crate) fn compute_stats(records: &[HistoryRecord], now: DateTime<Utc>) -> HistoryStats {
    let total = records.len();
    let successful = records.iter().filter(|r| r.success).count();
    let unique_users = records
        .iter()
        .map(|r| r.sender_id.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    let cutoff = now - ChronoDuration::days(RECENT_WINDOW_DAYS);
    let recent = records.iter().filter(|r| r.created_at >= cutoff).count();
    HistoryStats {
        total,
        successful,
        failed: total - successful,
        success_rate: success_rate(successful, total),
        unique_users,
        recent,
    }
}

#[allow(clippy::cast_precision_loss)] // counts stay far below 2^52
fn success_rate(successful: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percent = successful as f64 / total as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_rounds_to_two_decimals() {
        assert!((success_rate(1, 3) - 33.33).abs() < f64::EPSILON * 100.0);
        assert!((success_rate(2, 3) - 66.67).abs() < f64::EPSILON * 100.0);
        assert!(success_rate(0, 0).abs() < f64::EPSILON);
    }
}
