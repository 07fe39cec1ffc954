use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{
    compute_stats, paginate, DeleteScope, HistoryPage, HistoryQuery, HistoryStats, HistoryStore,
};
use crate::model::{HistoryRecord, NewRecord, RecordId};
use crate::runner::{EngineError, EngineResult};

/// History kept as one JSON object per line.
///
/// Appends go to the end of the file. Deletions rewrite the file through a
/// temporary sibling and an atomic rename. A single mutex serializes all
/// access from this process; concurrent writers in other processes are not
/// coordinated.
#[derive(Debug)]
pub struct JsonlHistory {
    path: PathBuf,
    last_id: Mutex<RecordId>,
}

impl JsonlHistory {
    /// Open (or lazily create) the history file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| EngineError::io("failed to create history directory", err))?;
        }
        let last_id = read_records(&path)?
            .iter()
            .map(|r| r.id)
            .max()
            .unwrap_or(RecordId::new(0));
        Ok(Self {
            path,
            last_id: Mutex::new(last_id),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, RecordId>> {
        self.last_id
            .lock()
            .map_err(|err| EngineError::history("history lock poisoned", err))
    }

    fn rewrite(&self, records: &[HistoryRecord]) -> EngineResult<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|err| EngineError::history("failed to create temp history file", err))?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            for record in records {
                write_line(&mut writer, record)?;
            }
            writer
                .flush()
                .map_err(|err| EngineError::history("failed to write history", err))?;
        }
        tmp.persist(&self.path)
            .map_err(|err| EngineError::history("failed to replace history file", err))?;
        Ok(())
    }

    fn remove_matching(&self, predicate: impl Fn(&HistoryRecord) -> bool) -> EngineResult<usize> {
        let _guard = self.lock()?;
        let records = read_records(&self.path)?;
        let before = records.len();
        let kept: Vec<HistoryRecord> = records.into_iter().filter(|r| !predicate(r)).collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.rewrite(&kept)?;
        }
        Ok(removed)
    }
}

impl HistoryStore for JsonlHistory {
    fn append(&self, record: NewRecord) -> EngineResult<RecordId> {
        let mut last_id = self.lock()?;
        let id = last_id.next();
        let record = HistoryRecord::from_new(id, record, Utc::now());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| EngineError::history("failed to open history file", err))?;
        write_line(&mut file, &record)?;
        *last_id = id;
        Ok(id)
    }

    fn get(&self, id: RecordId) -> EngineResult<Option<HistoryRecord>> {
        let _guard = self.lock()?;
        Ok(read_records(&self.path)?.into_iter().find(|r| r.id == id))
    }

    fn query(&self, query: &HistoryQuery) -> EngineResult<HistoryPage> {
        let _guard = self.lock()?;
        Ok(paginate(read_records(&self.path)?, query))
    }

    fn delete(&self, id: RecordId) -> EngineResult<bool> {
        Ok(self.remove_matching(|r| r.id == id)? > 0)
    }

    fn delete_where(&self, scope: DeleteScope) -> EngineResult<usize> {
        self.remove_matching(|r| scope.includes(r))
    }

    fn stats(&self, now: DateTime<Utc>) -> EngineResult<HistoryStats> {
        let _guard = self.lock()?;
        Ok(compute_stats(&read_records(&self.path)?, now))
    }
}

fn write_line(writer: &mut impl Write, record: &HistoryRecord) -> EngineResult<()> {
    let mut line = serde_json::to_vec(record)
        .map_err(|err| EngineError::history("failed to encode history record", err))?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .map_err(|err| EngineError::history("failed to write history", err))
}

/// All parseable records; malformed lines are skipped with a warning.
fn read_records(path: &Path) -> EngineResult<Vec<HistoryRecord>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(EngineError::history("failed to read history file", err)),
    };
    let mut records = Vec::new();
    for (index, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryRecord>(line) {
            Ok(record) => records.push(record),
            Err(err) => tracing::warn!(line = index + 1, error = %err, "skipping malformed history line"),
        }
    }
    Ok(records)
}
