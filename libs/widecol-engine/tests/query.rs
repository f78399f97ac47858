//! Integration tests for query-filtered views: key ranges, time ranges and
//! value predicates as applied by the in-memory store.

use std::sync::Arc;

use chrono::DateTime;
use pretty_assertions::assert_eq;

use widecol_api::error::QueryError;
use widecol_api::query::{Operator, Query};
use widecol_api::row::Row;
use widecol_api::value::{TypedValue, ValueType};
use widecol_engine::{ColumnTypes, EngineError, ScanEngine, TableCache, TypeRegistry};
use widecol_store_memory::{MemoryStore, MemoryTable};

/// Table `words` with string keys and a `w:text` column; `w:n` holds an
/// Integer on every other row.
fn words(entries: &[(&str, &str)]) -> (ScanEngine, Arc<MemoryTable>) {
    let store = Arc::new(MemoryStore::new());
    let data = store.create_table("words", &["w", "meta"]);
    for (i, (key, text)) in entries.iter().enumerate() {
        data.put(key.as_bytes(), "w", "text", text.as_bytes());
        if i % 2 == 0 {
            data.put(key.as_bytes(), "w", "n", &(i as i32).to_be_bytes());
        }
    }
    let mut types = ColumnTypes::new();
    types.set("key", ValueType::String);
    types.set("w:n", ValueType::Integer);
    let engine = ScanEngine::new(
        Arc::new(TableCache::new(store)),
        "words",
        Arc::new(TypeRegistry::new()),
        types,
    );
    (engine, data)
}

const ENTRIES: &[(&str, &str)] = &[
    ("a", "abcdef"),
    ("b", "xabc"),
    ("b1", "abc"),
    ("c", "hello"),
    ("d", "world"),
    ("e", "yabc"),
];

fn keys(rows: &[Row]) -> Vec<String> {
    rows.iter().map(|r| r.key().formatted()).collect()
}

fn predicate(op: Operator, ty: ValueType, word: &str, column: &str) -> Query {
    Query::builder()
        .family("w")
        .column(column)
        .word(op, ty, word)
        .build()
        .unwrap()
}

fn filtered(query: Query) -> Vec<String> {
    let (mut engine, _) = words(ENTRIES);
    engine.set_query(Some(query)).unwrap();
    keys(engine.current_page(100).unwrap())
}

#[test]
fn end_key_is_included() {
    let query = Query::builder()
        .start_key(TypedValue::text("b"))
        .end_key(TypedValue::text("b"))
        .build()
        .unwrap();
    assert_eq!(filtered(query), vec!["b", "b1"]);

    let query = Query::builder().end_key(TypedValue::text("c")).build().unwrap();
    assert_eq!(filtered(query), vec!["a", "b", "b1", "c"]);
}

#[test]
fn starts_with_is_anchored() {
    let query = predicate(Operator::StartsWith, ValueType::String, "abc", "text");
    assert_eq!(filtered(query), vec!["a", "b1"]);
}

#[test]
fn ends_with_and_contains() {
    let query = predicate(Operator::EndsWith, ValueType::String, "abc", "text");
    assert_eq!(filtered(query), vec!["b", "b1", "e"]);

    let query = predicate(Operator::Contains, ValueType::String, "l", "text");
    assert_eq!(filtered(query), vec!["c", "d"]);
}

#[test]
fn equal_matches_encoded_bytes_only() {
    let query = predicate(Operator::Equal, ValueType::Integer, "2", "n");
    assert_eq!(filtered(query), vec!["b1"]);

    let query = predicate(Operator::Equal, ValueType::String, "abc", "text");
    assert_eq!(filtered(query), vec!["b1"]);
}

#[test]
fn comparisons_skip_rows_without_the_column() {
    let query = predicate(Operator::NotEqual, ValueType::Integer, "0", "n");
    assert_eq!(filtered(query), vec!["b1", "d"]);

    let query = predicate(Operator::GreaterOrEqual, ValueType::Integer, "2", "n");
    assert_eq!(filtered(query), vec!["b1", "d"]);

    let query = predicate(Operator::Less, ValueType::Integer, "4", "n");
    assert_eq!(filtered(query), vec!["a", "b1"]);
}

#[test]
fn column_without_word_requires_the_column() {
    let query = Query::builder().family("w").column("n").build().unwrap();
    let (mut engine, _) = words(ENTRIES);
    engine.set_query(Some(query)).unwrap();
    assert_eq!(keys(engine.current_page(100).unwrap()), vec!["a", "b1", "d"]);
    assert_eq!(engine.row_count().unwrap(), 3);
}

#[test]
fn paging_stays_inside_the_filter() {
    let (mut engine, _) = words(ENTRIES);
    let query = predicate(Operator::Contains, ValueType::String, "abc", "text");
    engine.set_query(Some(query)).unwrap();
    assert_eq!(keys(engine.current_page(2).unwrap()), vec!["a", "b"]);
    assert_eq!(keys(engine.next_page(2).unwrap()), vec!["b1", "e"]);
    assert_eq!(keys(engine.next_page(2).unwrap()), vec!["b1", "e"]);
    assert_eq!(engine.row_count().unwrap(), 4);
}

#[test]
fn set_query_unpositions_the_engine() {
    let (mut engine, data) = words(ENTRIES);
    engine.current_page(2).unwrap();
    engine.next_page(2).unwrap();
    engine.row_count().unwrap();

    engine
        .set_query(Some(Query::builder().start_key(TypedValue::text("c")).build().unwrap()))
        .unwrap();
    assert_eq!(engine.page_index(), None);
    assert!(engine.rows().is_empty());
    assert!(!engine.row_counter().is_cached());

    let scans = data.scan_count();
    assert_eq!(keys(engine.current_page(2).unwrap()), vec!["c", "d"]);
    assert_eq!(data.scan_count(), scans + 1);
    assert_eq!(engine.row_count().unwrap(), 3);

    engine.set_query(None).unwrap();
    assert_eq!(keys(engine.current_page(2).unwrap()), vec!["a", "b"]);
}

#[test]
fn unknown_family_is_rejected_before_scanning() {
    let (mut engine, data) = words(ENTRIES);
    engine.current_page(3).unwrap();
    let scans = data.scan_count();

    let query = Query::builder().family("x").column("y").build().unwrap();
    let err = engine.set_query(Some(query)).unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidQuery(QueryError::UnknownFamily(ref f)) if f == "x"
    ));
    assert_eq!(data.scan_count(), scans);
    assert_eq!(engine.page_index(), Some(0));
    assert_eq!(engine.column_families().unwrap(), vec!["w", "meta"]);
}

#[test]
fn time_range_is_inclusive_at_both_ends() {
    let store = Arc::new(MemoryStore::new());
    let data = store.create_table("events", &["e"]);
    for (key, ts) in [("k1", 1_000), ("k2", 2_000), ("k3", 3_000), ("k4", 4_000)] {
        data.put_at(key.as_bytes(), "e", "v", b"x", ts);
    }
    let mut engine = ScanEngine::new(
        Arc::new(TableCache::new(store)),
        "events",
        Arc::new(TypeRegistry::new()),
        ColumnTypes::new(),
    );

    let query = Query::builder()
        .start_date(DateTime::from_timestamp_millis(2_000).unwrap())
        .end_date(DateTime::from_timestamp_millis(3_000).unwrap())
        .build()
        .unwrap();
    engine.set_query(Some(query)).unwrap();
    assert_eq!(keys(engine.current_page(10).unwrap()), vec!["k2", "k3"]);

    let query = Query::builder()
        .start_date(DateTime::from_timestamp_millis(3_000).unwrap())
        .build()
        .unwrap();
    engine.set_query(Some(query)).unwrap();
    assert_eq!(keys(engine.current_page(10).unwrap()), vec!["k3", "k4"]);
}
