// Test module - relaxed lint rules
#![allow(clippy::default_trait_access)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! History store behavior, shared by the in-memory and JSONL stores.

use std::fs;
use std::io::Write;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use codebox::history::{DeleteScope, HistoryQuery, HistoryStore, JsonlHistory, MemoryHistory};
use codebox::model::{ExecutionOutcome, NewRecord, RecordId, Sender};

// =============================================================================
// Helper Functions
// =============================================================================

fn record(sender: &str, code: &str, success: bool) -> NewRecord {
    let outcome = if success {
        ExecutionOutcome::succeeded(format!("ran {code}\n"), Vec::new())
    } else {
        ExecutionOutcome::runtime_failure("Traceback: NameError", String::new())
    };
    NewRecord::from_outcome(
        &Sender::new(sender, format!("{sender}-name")),
        code,
        None,
        &outcome,
        Duration::from_millis(12),
    )
}

fn seed(store: &dyn HistoryStore) -> Vec<RecordId> {
    vec![
        store.append(record("alice", "print('plot chart')", true)).unwrap(),
        store.append(record("bob", "undefined_name", false)).unwrap(),
        store.append(record("alice", "x = 1", true)).unwrap(),
        store.append(record("carol", "print(y)", false)).unwrap(),
        store.append(record("alice", "import json", true)).unwrap(),
    ]
}

fn check_ids_and_get(store: &dyn HistoryStore) {
    let ids = seed(store);
    let raw: Vec<u64> = ids.iter().map(|id| id.get()).collect();
    assert_eq!(raw, [1, 2, 3, 4, 5]);

    let fetched = store.get(ids[1]).unwrap().unwrap();
    assert_eq!(fetched.sender_id, "bob");
    assert!(!fetched.success);
    assert_eq!(fetched.error.as_deref(), Some("Traceback: NameError"));
    assert_eq!(fetched.duration_ms, 12);
    assert!(store.get(RecordId::new(99)).unwrap().is_none());
}

fn check_query(store: &dyn HistoryStore) {
    seed(store);

    let all = store.query(&HistoryQuery::default()).unwrap();
    assert_eq!(all.total_count, 5);
    assert_eq!(all.total_pages, 1);
    let newest_first: Vec<u64> = all.records.iter().map(|r| r.id.get()).collect();
    assert_eq!(newest_first, [5, 4, 3, 2, 1]);

    let alice = store
        .query(&HistoryQuery {
            sender_id: Some("alice".to_string()),
            ..HistoryQuery::default()
        })
        .unwrap();
    assert_eq!(alice.total_count, 3);

    let failed = store
        .query(&HistoryQuery {
            success: Some(false),
            ..HistoryQuery::default()
        })
        .unwrap();
    assert!(failed.records.iter().all(|r| !r.success));
    assert_eq!(failed.total_count, 2);

    let keyword = store
        .query(&HistoryQuery {
            keyword: Some("  CHART ".to_string()),
            ..HistoryQuery::default()
        })
        .unwrap();
    assert_eq!(keyword.total_count, 1);

    let by_name = store
        .query(&HistoryQuery {
            keyword: Some("carol-NAME".to_string()),
            ..HistoryQuery::default()
        })
        .unwrap();
    assert_eq!(by_name.total_count, 1);

    let future = store
        .query(&HistoryQuery {
            since: Some(Utc::now() + ChronoDuration::hours(1)),
            ..HistoryQuery::default()
        })
        .unwrap();
    assert_eq!(future.total_count, 0);
}

fn check_paging(store: &dyn HistoryStore) {
    seed(store);
    let page_two = store
        .query(&HistoryQuery {
            page: 2,
            page_size: 2,
            ..HistoryQuery::default()
        })
        .unwrap();
    assert_eq!(page_two.total_pages, 3);
    let ids: Vec<u64> = page_two.records.iter().map(|r| r.id.get()).collect();
    assert_eq!(ids, [3, 2]);

    let past_end = store
        .query(&HistoryQuery {
            page: 9,
            page_size: 2,
            ..HistoryQuery::default()
        })
        .unwrap();
    assert!(past_end.records.is_empty());
    assert_eq!(past_end.total_count, 5);

    let clamped = store
        .query(&HistoryQuery {
            page: 0,
            page_size: 0,
            ..HistoryQuery::default()
        })
        .unwrap();
    assert_eq!(clamped.page, 1);
    assert_eq!(clamped.page_size, 1);
    assert_eq!(clamped.records.len(), 1);
}

fn check_delete(store: &dyn HistoryStore) {
    let ids = seed(store);
    assert!(store.delete(ids[0]).unwrap());
    assert!(!store.delete(ids[0]).unwrap());
    assert_eq!(store.delete_where(DeleteScope::Failed).unwrap(), 2);
    let remaining = store.query(&HistoryQuery::default()).unwrap();
    assert_eq!(remaining.total_count, 2);
    assert!(remaining.records.iter().all(|r| r.success));

    // Ids keep increasing after deletions.
    let next = store.append(record("dave", "pass", true)).unwrap();
    assert_eq!(next.get(), 6);

    assert_eq!(store.delete_where(DeleteScope::All).unwrap(), 3);
    assert_eq!(store.query(&HistoryQuery::default()).unwrap().total_count, 0);
}

fn check_stats(store: &dyn HistoryStore) {
    let empty = store.stats(Utc::now()).unwrap();
    assert_eq!(empty.total, 0);
    assert!(empty.success_rate.abs() < f64::EPSILON);

    seed(store);
    let stats = store.stats(Utc::now()).unwrap();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.successful, 3);
    assert_eq!(stats.failed, 2);
    assert!((stats.success_rate - 60.0).abs() < 1e-9);
    assert_eq!(stats.unique_users, 3);
    assert_eq!(stats.recent, 5);

    let later = store.stats(Utc::now() + ChronoDuration::days(30)).unwrap();
    assert_eq!(later.recent, 0);
}

// =============================================================================
// In-memory Store
// =============================================================================

#[test]
fn memory_assigns_ids_and_fetches() {
    check_ids_and_get(&MemoryHistory::new());
}

#[test]
fn memory_query_filters() {
    check_query(&MemoryHistory::new());
}

#[test]
fn memory_paging() {
    check_paging(&MemoryHistory::new());
}

#[test]
fn memory_delete() {
    check_delete(&MemoryHistory::new());
}

#[test]
fn memory_stats() {
    check_stats(&MemoryHistory::new());
}

// =============================================================================
// JSONL Store
// =============================================================================

fn jsonl_store() -> (tempfile::TempDir, JsonlHistory) {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonlHistory::open(dir.path().join("nested").join("history.jsonl")).unwrap();
    (dir, store)
}

#[test]
fn jsonl_assigns_ids_and_fetches() {
    let (_dir, store) = jsonl_store();
    check_ids_and_get(&store);
}

#[test]
fn jsonl_query_filters() {
    let (_dir, store) = jsonl_store();
    check_query(&store);
}

#[test]
fn jsonl_paging() {
    let (_dir, store) = jsonl_store();
    check_paging(&store);
}

#[test]
fn jsonl_delete() {
    let (_dir, store) = jsonl_store();
    check_delete(&store);
}

#[test]
fn jsonl_stats() {
    let (_dir, store) = jsonl_store();
    check_stats(&store);
}

#[test]
fn jsonl_reopen_continues_ids() {
    let (_dir, store) = jsonl_store();
    seed(&store);
    let path = store.path().to_path_buf();
    drop(store);

    let reopened = JsonlHistory::open(&path).unwrap();
    assert_eq!(reopened.query(&HistoryQuery::default()).unwrap().total_count, 5);
    let id = reopened.append(record("erin", "pass", true)).unwrap();
    assert_eq!(id.get(), 6);
}

#[test]
fn jsonl_skips_malformed_lines() {
    let (_dir, store) = jsonl_store();
    store.append(record("alice", "x = 1", true)).unwrap();
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(store.path())
        .unwrap();
    writeln!(file, "{{not json").unwrap();
    drop(file);
    store.append(record("bob", "y = 2", true)).unwrap();

    let page = store.query(&HistoryQuery::default()).unwrap();
    assert_eq!(page.total_count, 2);
    assert_eq!(
        fs::read_to_string(store.path()).unwrap().lines().count(),
        3
    );
}

#[test]
fn jsonl_lines_are_self_contained_json() {
    let (_dir, store) = jsonl_store();
    store.append(record("alice", "print('multi\\nline')\nx = 2", true)).unwrap();
    let contents = fs::read_to_string(store.path()).unwrap();
    assert_eq!(contents.lines().count(), 1);
    let value: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
    assert_eq!(value["id"], 1);
    assert_eq!(value["sender_id"], "alice");
    assert!(value["created_at"].is_string());
}
