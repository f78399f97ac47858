use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::StoreError;

/// Comparison applied by a single-column-value filter: `cell_value OP operand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl CompareOp {
    /// Whether an ordering of `cell_value` relative to the operand satisfies the op.
    pub fn matches(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Equal => ordering == Equal,
            CompareOp::NotEqual => ordering != Equal,
            CompareOp::Less => ordering == Less,
            CompareOp::LessOrEqual => ordering != Greater,
            CompareOp::Greater => ordering == Greater,
            CompareOp::GreaterOrEqual => ordering != Less,
        }
    }
}

/// Operand side of a single-column-value filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparator {
    /// Lexicographic byte comparison against the encoded operand.
    Binary(Vec<u8>),
    /// Case-sensitive substring test on the cell value as UTF-8 text.
    Substring(String),
    /// Regular-expression search on the cell value as UTF-8 text.
    Pattern(String),
}

/// Store-side filter keeping rows whose `family:qualifier` value satisfies
/// `op` against `comparator`.
///
/// Rows lacking the column are dropped when `filter_if_missing` is set.
/// `Substring` and `Pattern` comparators only pair with `Equal`/`NotEqual`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueFilter {
    pub family: String,
    pub qualifier: String,
    pub op: CompareOp,
    pub comparator: Comparator,
    pub filter_if_missing: bool,
}

/// Half-open cell timestamp range `[min_ms, max_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub min_ms: i64,
    pub max_ms: i64,
}

impl TimeRange {
    pub const ALL: TimeRange = TimeRange { min_ms: 0, max_ms: i64::MAX };

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.min_ms && ts_ms < self.max_ms
    }
}

/// Parameters for one forward scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSpec {
    /// First row key to return (inclusive).
    pub start_row: Option<Vec<u8>>,
    /// Row key to stop before (exclusive).
    pub stop_row: Option<Vec<u8>>,
    pub time_range: Option<TimeRange>,
    pub filter: Option<ValueFilter>,
    /// Rows fetched per round trip. Efficiency hint only.
    pub caching: Option<usize>,
}

/// One row as returned by a scan: key plus the latest value per column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowResult {
    pub key: Vec<u8>,
    /// `(family, qualifier)` → latest raw value.
    pub cells: BTreeMap<(String, String), Vec<u8>>,
}

impl RowResult {
    pub fn value(&self, family: &str, qualifier: &str) -> Option<&[u8]> {
        self.cells
            .get(&(family.to_string(), qualifier.to_string()))
            .map(Vec::as_slice)
    }
}

/// A write against one row: cells to put and columns to delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowMutation {
    pub key: Vec<u8>,
    /// `(family, qualifier, value)`.
    pub puts: Vec<(String, String, Vec<u8>)>,
    /// `(family, qualifier)`.
    pub deletes: Vec<(String, String)>,
}

impl RowMutation {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key, ..Self::default() }
    }

    pub fn put(mut self, family: &str, qualifier: &str, value: Vec<u8>) -> Self {
        self.puts.push((family.to_string(), qualifier.to_string(), value));
        self
    }

    pub fn delete(mut self, family: &str, qualifier: &str) -> Self {
        self.deletes.push((family.to_string(), qualifier.to_string()));
        self
    }
}

/// Forward-only row iterator over one scan.
///
/// `next` may block on network I/O; callers check cancellation between calls.
pub trait ScanCursor: Send {
    fn next(&mut self) -> Result<Option<RowResult>, StoreError>;
}

/// An open table handle.
pub trait Table: Send + Sync {
    fn name(&self) -> &str;

    /// Open a forward scan. Rows come back in key order.
    fn scan(&self, spec: &ScanSpec) -> Result<Box<dyn ScanCursor>, StoreError>;

    /// Apply a single-row mutation.
    fn mutate(&self, mutation: &RowMutation) -> Result<(), StoreError>;

    /// Delete a whole row.
    fn delete_row(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Release resources held by the handle. Further calls may fail.
    fn close(&self) {}
}

/// A connected cluster.
///
/// The engine doesn't know concrete implementations. For the engine, a
/// store is just this trait.
pub trait Store: Send + Sync {
    fn table_names(&self) -> Result<Vec<String>, StoreError>;

    fn column_families(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Open a handle for `table`. Fails with `TableNotFound` for unknown tables.
    fn table(&self, table: &str) -> Result<Arc<dyn Table>, StoreError>;
}
