use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use regex::Regex;

use widecol_api::error::StoreError;
use widecol_api::store::{
    CompareOp, Comparator, RowMutation, RowResult, ScanCursor, ScanSpec, Store, Table, TimeRange,
    ValueFilter,
};

// ═══════════════════════════════════════════════════════════════
//  MemoryStoreConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_versions() -> usize {
    3
}

#[derive(Debug, serde::Deserialize)]
pub struct MemoryStoreConfig {
    /// Versions kept per cell; older ones are dropped on write.
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_versions: default_max_versions(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

/// In-process wide-column store: ordered rows, versioned cells, forward
/// scans with key range, time range and single-column-value filters.
///
/// Counts scans and handle opens so tests can observe cache behavior.
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, Arc<MemoryTable>>>,
    max_versions: usize,
    unavailable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            max_versions: config.max_versions.max(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Build from a JSON config object (`"{}"` for defaults).
    pub fn from_json(config_json: &str) -> Result<Self, StoreError> {
        let config: MemoryStoreConfig = if config_json.trim() == "{}" {
            MemoryStoreConfig::default()
        } else {
            serde_json::from_str(config_json)
                .map_err(|e| StoreError::rejected(format!("memory store config: {e}")))?
        };
        Ok(Self::with_config(config))
    }

    /// Create (or replace) a table with the given column families.
    pub fn create_table(&self, name: &str, families: &[&str]) -> Arc<MemoryTable> {
        let table = Arc::new(MemoryTable {
            name: name.to_string(),
            families: families.iter().map(|f| f.to_string()).collect(),
            rows: RwLock::new(BTreeMap::new()),
            max_versions: self.max_versions,
            clock: AtomicI64::new(0),
            scans: AtomicUsize::new(0),
            handles: AtomicUsize::new(0),
            fail_after: RwLock::new(None),
        });
        write(&self.tables).insert(name.to_string(), table.clone());
        tracing::debug!(table = %name, ?families, "created memory table");
        table
    }

    /// Simulate a cluster outage: every store call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::unavailable("memory store is offline"))
        } else {
            Ok(())
        }
    }
}

impl Store for MemoryStore {
    fn table_names(&self) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        Ok(read(&self.tables).keys().cloned().collect())
    }

    fn column_families(&self, table: &str) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        read(&self.tables)
            .get(table)
            .map(|t| t.families.clone())
            .ok_or_else(|| StoreError::table_not_found(table))
    }

    fn table(&self, table: &str) -> Result<Arc<dyn Table>, StoreError> {
        self.check_available()?;
        let data = read(&self.tables)
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::table_not_found(table))?;
        data.handles.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryTableHandle {
            data,
            closed: AtomicBool::new(false),
        }))
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryTable
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct Version {
    ts_ms: i64,
    value: Vec<u8>,
}

/// `(family, qualifier)` → versions, newest first.
type Columns = BTreeMap<(String, String), Vec<Version>>;

/// Table data shared by all handles opened on it.
pub struct MemoryTable {
    name: String,
    families: Vec<String>,
    rows: RwLock<BTreeMap<Vec<u8>, Columns>>,
    max_versions: usize,
    /// Last assigned write timestamp. Writes without an explicit timestamp
    /// get `max(now, last + 1)`, so they are strictly increasing.
    clock: AtomicI64,
    scans: AtomicUsize,
    handles: AtomicUsize,
    fail_after: RwLock<Option<usize>>,
}

impl MemoryTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write one cell at the next clock tick.
    pub fn put(&self, key: &[u8], family: &str, qualifier: &str, value: &[u8]) {
        let ts = self.tick();
        self.put_at(key, family, qualifier, value, ts);
    }

    /// Write one cell at an explicit timestamp.
    pub fn put_at(&self, key: &[u8], family: &str, qualifier: &str, value: &[u8], ts_ms: i64) {
        self.clock.fetch_max(ts_ms, Ordering::SeqCst);
        let mut rows = write(&self.rows);
        let versions = rows
            .entry(key.to_vec())
            .or_default()
            .entry((family.to_string(), qualifier.to_string()))
            .or_default();
        let pos = versions
            .iter()
            .position(|v| v.ts_ms <= ts_ms)
            .unwrap_or(versions.len());
        if versions.get(pos).is_some_and(|v| v.ts_ms == ts_ms) {
            versions[pos].value = value.to_vec();
        } else {
            versions.insert(pos, Version { ts_ms, value: value.to_vec() });
        }
        versions.truncate(self.max_versions);
    }

    pub fn row_count(&self) -> usize {
        read(&self.rows).len()
    }

    /// Number of scans opened on this table so far.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Number of handles opened on this table so far.
    pub fn handle_count(&self) -> usize {
        self.handles.load(Ordering::SeqCst)
    }

    /// Make every scan fail with an I/O error after yielding `rows` rows.
    pub fn fail_scans_after(&self, rows: Option<usize>) {
        *write(&self.fail_after) = rows;
    }

    fn tick(&self) -> i64 {
        let now = now_ms();
        let mut last = self.clock.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .clock
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    fn open_scan(&self, spec: &ScanSpec) -> Result<MemoryCursor, StoreError> {
        let matcher = spec.filter.as_ref().map(FilterMatcher::new).transpose()?;
        let time_range = spec.time_range.unwrap_or(TimeRange::ALL);

        let lower = match &spec.start_row {
            Some(start) => Bound::Included(start.clone()),
            None => Bound::Unbounded,
        };
        let upper = match &spec.stop_row {
            Some(stop) => Bound::Excluded(stop.clone()),
            None => Bound::Unbounded,
        };
        if let (Bound::Included(lo), Bound::Excluded(hi)) = (&lower, &upper) {
            if lo >= hi {
                self.scans.fetch_add(1, Ordering::SeqCst);
                return Ok(MemoryCursor::empty());
            }
        }

        let pending: VecDeque<RowResult> = read(&self.rows)
            .range((lower, upper))
            .filter_map(|(key, columns)| latest_in_range(key, columns, &time_range))
            .collect();

        self.scans.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            table = %self.name,
            candidates = pending.len(),
            filtered = matcher.is_some(),
            "opened memory scan"
        );
        Ok(MemoryCursor {
            pending,
            matcher,
            yielded: 0,
            fail_after: *read(&self.fail_after),
        })
    }
}

fn latest_in_range(key: &[u8], columns: &Columns, range: &TimeRange) -> Option<RowResult> {
    let cells: BTreeMap<(String, String), Vec<u8>> = columns
        .iter()
        .filter_map(|(col, versions)| {
            versions
                .iter()
                .find(|v| range.contains(v.ts_ms))
                .map(|v| (col.clone(), v.value.clone()))
        })
        .collect();
    if cells.is_empty() {
        return None;
    }
    Some(RowResult { key: key.to_vec(), cells })
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ═══════════════════════════════════════════════════════════════
//  Handle + cursor
// ═══════════════════════════════════════════════════════════════

struct MemoryTableHandle {
    data: Arc<MemoryTable>,
    closed: AtomicBool,
}

impl MemoryTableHandle {
    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::rejected(format!("table handle '{}' is closed", self.data.name)))
        } else {
            Ok(())
        }
    }
}

impl Table for MemoryTableHandle {
    fn name(&self) -> &str {
        &self.data.name
    }

    fn scan(&self, spec: &ScanSpec) -> Result<Box<dyn ScanCursor>, StoreError> {
        self.check_open()?;
        Ok(Box::new(self.data.open_scan(spec)?))
    }

    fn mutate(&self, mutation: &RowMutation) -> Result<(), StoreError> {
        self.check_open()?;
        for (family, _, _) in &mutation.puts {
            if !self.data.families.contains(family) {
                return Err(StoreError::rejected(format!("unknown column family '{family}'")));
            }
        }
        let ts = self.data.tick();
        for (family, qualifier, value) in &mutation.puts {
            self.data.put_at(&mutation.key, family, qualifier, value, ts);
        }
        if !mutation.deletes.is_empty() {
            let mut rows = write(&self.data.rows);
            if let Some(columns) = rows.get_mut(&mutation.key) {
                for col in &mutation.deletes {
                    columns.remove(col);
                }
                if columns.is_empty() {
                    rows.remove(&mutation.key);
                }
            }
        }
        Ok(())
    }

    fn delete_row(&self, key: &[u8]) -> Result<(), StoreError> {
        self.check_open()?;
        write(&self.data.rows).remove(key);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct MemoryCursor {
    pending: VecDeque<RowResult>,
    matcher: Option<FilterMatcher>,
    yielded: usize,
    fail_after: Option<usize>,
}

impl MemoryCursor {
    fn empty() -> Self {
        Self {
            pending: VecDeque::new(),
            matcher: None,
            yielded: 0,
            fail_after: None,
        }
    }
}

impl ScanCursor for MemoryCursor {
    fn next(&mut self) -> Result<Option<RowResult>, StoreError> {
        if self.fail_after.is_some_and(|n| self.yielded >= n) {
            return Err(StoreError::io("connection reset while fetching batch"));
        }
        while let Some(row) = self.pending.pop_front() {
            if self.matcher.as_ref().is_none_or(|m| m.keeps(&row)) {
                self.yielded += 1;
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

/// Compiled single-column-value filter.
struct FilterMatcher {
    filter: ValueFilter,
    pattern: Option<Regex>,
}

impl FilterMatcher {
    fn new(filter: &ValueFilter) -> Result<Self, StoreError> {
        let pattern = match &filter.comparator {
            Comparator::Pattern(p) => Some(
                Regex::new(p).map_err(|e| StoreError::rejected(format!("bad pattern: {e}")))?,
            ),
            _ => None,
        };
        Ok(Self {
            filter: filter.clone(),
            pattern,
        })
    }

    fn keeps(&self, row: &RowResult) -> bool {
        let Some(value) = row.value(&self.filter.family, &self.filter.qualifier) else {
            return !self.filter.filter_if_missing;
        };
        let hit = match &self.filter.comparator {
            Comparator::Binary(operand) => {
                return self.filter.op.matches(value.cmp(operand.as_slice()));
            }
            Comparator::Substring(needle) => String::from_utf8_lossy(value).contains(needle.as_str()),
            Comparator::Pattern(_) => self
                .pattern
                .as_ref()
                .is_some_and(|re| re.is_match(&String::from_utf8_lossy(value))),
        };
        // Text comparators only answer "matches or not".
        match self.filter.op {
            CompareOp::Equal => hit,
            CompareOp::NotEqual => !hit,
            _ => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Lock helpers
// ═══════════════════════════════════════════════════════════════

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("memory store read lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("memory store write lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (MemoryStore, Arc<MemoryTable>) {
        let store = MemoryStore::new();
        let table = store.create_table("t", &["d"]);
        for (key, name) in [("a", "abcdef"), ("b", "xabc"), ("c", "zzz")] {
            table.put_at(key.as_bytes(), "d", "name", name.as_bytes(), 10);
        }
        table.put_at(b"d", "d", "other", b"1", 20);
        (store, table)
    }

    fn keys(store: &MemoryStore, spec: &ScanSpec) -> Vec<String> {
        let handle = store.table("t").unwrap();
        let mut cursor = handle.scan(spec).unwrap();
        let mut out = Vec::new();
        while let Some(row) = cursor.next().unwrap() {
            out.push(String::from_utf8(row.key).unwrap());
        }
        out
    }

    fn name_filter(op: CompareOp, comparator: Comparator) -> ScanSpec {
        ScanSpec {
            filter: Some(ValueFilter {
                family: "d".into(),
                qualifier: "name".into(),
                op,
                comparator,
                filter_if_missing: true,
            }),
            ..ScanSpec::default()
        }
    }

    #[test]
    fn stop_row_is_exclusive() {
        let (store, _) = seeded();
        let spec = ScanSpec {
            start_row: Some(b"b".to_vec()),
            stop_row: Some(b"d".to_vec()),
            ..ScanSpec::default()
        };
        assert_eq!(keys(&store, &spec), vec!["b", "c"]);
    }

    #[test]
    fn anchored_pattern_matches_prefix_only() {
        let (store, _) = seeded();
        let spec = name_filter(CompareOp::Equal, Comparator::Pattern("^abc".into()));
        assert_eq!(keys(&store, &spec), vec!["a"]);
    }

    #[test]
    fn substring_not_equal_keeps_misses() {
        let (store, _) = seeded();
        let spec = name_filter(CompareOp::NotEqual, Comparator::Substring("abc".into()));
        assert_eq!(keys(&store, &spec), vec!["c"]);
    }

    #[test]
    fn binary_comparator_orders_bytes() {
        let (store, _) = seeded();
        let spec = name_filter(CompareOp::Greater, Comparator::Binary(b"b".to_vec()));
        assert_eq!(keys(&store, &spec), vec!["b", "c"]);
    }

    #[test]
    fn missing_column_kept_without_filter_if_missing() {
        let (store, _) = seeded();
        let mut spec = name_filter(CompareOp::Equal, Comparator::Binary(b"zzz".to_vec()));
        if let Some(f) = spec.filter.as_mut() {
            f.filter_if_missing = false;
        }
        assert_eq!(keys(&store, &spec), vec!["c", "d"]);
    }

    #[test]
    fn time_range_hides_rows_without_versions_in_range() {
        let (store, _) = seeded();
        let spec = ScanSpec {
            time_range: Some(TimeRange { min_ms: 15, max_ms: 25 }),
            ..ScanSpec::default()
        };
        assert_eq!(keys(&store, &spec), vec!["d"]);
    }

    #[test]
    fn newest_version_wins() {
        let (store, table) = seeded();
        table.put_at(b"a", "d", "name", b"new", 30);
        let handle = store.table("t").unwrap();
        let mut cursor = handle.scan(&ScanSpec::default()).unwrap();
        let first = cursor.next().unwrap().unwrap();
        assert_eq!(first.value("d", "name"), Some(&b"new"[..]));
    }

    #[test]
    fn closed_handle_rejects_scans() {
        let (store, table) = seeded();
        let handle = store.table("t").unwrap();
        handle.close();
        assert!(handle.scan(&ScanSpec::default()).is_err());
        assert_eq!(table.handle_count(), 1);
    }

    #[test]
    fn injected_failure_surfaces_as_io() {
        let (store, table) = seeded();
        table.fail_scans_after(Some(1));
        let handle = store.table("t").unwrap();
        let mut cursor = handle.scan(&ScanSpec::default()).unwrap();
        assert!(cursor.next().unwrap().is_some());
        let err = cursor.next().unwrap_err();
        assert_eq!(err.kind, widecol_api::error::StoreErrorKind::Io);
    }

    #[test]
    fn mutation_rejects_unknown_family() {
        let (store, _) = seeded();
        let handle = store.table("t").unwrap();
        let m = RowMutation::new(b"z".to_vec()).put("nope", "q", b"v".to_vec());
        assert!(handle.mutate(&m).is_err());
    }

    #[test]
    fn config_from_json() {
        let store = MemoryStore::from_json(r#"{"max_versions": 1}"#).unwrap();
        let table = store.create_table("t", &["d"]);
        table.put_at(b"k", "d", "q", b"1", 1);
        table.put_at(b"k", "d", "q", b"2", 2);
        let spec = ScanSpec {
            time_range: Some(TimeRange { min_ms: 0, max_ms: 2 }),
            ..ScanSpec::default()
        };
        assert!(keys(&store, &spec).is_empty());
    }
}
