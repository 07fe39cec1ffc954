use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};

use super::{
    compute_stats, paginate, DeleteScope, HistoryPage, HistoryQuery, HistoryStats, HistoryStore,
};
use crate::model::{HistoryRecord, NewRecord, RecordId};
use crate::runner::{EngineError, EngineResult};

#[derive(Debug)]
struct State {
    last_id: RecordId,
    records: Vec<HistoryRecord>,
}

/// In-process history, lost on drop.
#[derive(Debug)]
pub struct MemoryHistory {
    state: Mutex<State>,
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                last_id: RecordId::new(0),
                records: Vec::new(),
            }),
        }
    }
}

impl MemoryHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|err| EngineError::history("history lock poisoned", err))
    }
}

impl HistoryStore for MemoryHistory {
    fn append(&self, record: NewRecord) -> EngineResult<RecordId> {
        let mut state = self.lock()?;
        let id = state.last_id.next();
        state.last_id = id;
        state
            .records
            .push(HistoryRecord::from_new(id, record, Utc::now()));
        Ok(id)
    }

    fn get(&self, id: RecordId) -> EngineResult<Option<HistoryRecord>> {
        let state = self.lock()?;
        Ok(state.records.iter().find(|r| r.id == id).cloned())
    }

    fn query(&self, query: &HistoryQuery) -> EngineResult<HistoryPage> {
        let records = self.lock()?.records.clone();
        Ok(paginate(records, query))
    }

    fn delete(&self, id: RecordId) -> EngineResult<bool> {
        let mut state = self.lock()?;
        let before = state.records.len();
        state.records.retain(|r| r.id != id);
        Ok(state.records.len() != before)
    }

    fn delete_where(&self, scope: DeleteScope) -> EngineResult<usize> {
        let mut state = self.lock()?;
        let before = state.records.len();
        state.records.retain(|r| !scope.includes(r));
        Ok(before - state.records.len())
    }

    fn stats(&self, now: DateTime<Utc>) -> EngineResult<HistoryStats> {
        let state = self.lock()?;
        Ok(compute_stats(&state.records, now))
    }
}
