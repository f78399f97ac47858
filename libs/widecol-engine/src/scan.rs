//! Bidirectional paging over a forward-only store scan.
//!
//! The engine keeps a stack of [`Marker`]s, one per page loaded in this
//! session. Moving forward opens a new scan just after the top marker's last
//! key; moving back pops a marker and replays its cached rows, so going back
//! never touches the store. Markers are never evicted.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use widecol_api::error::{QueryError, StoreError};
use widecol_api::query::Query;
use widecol_api::row::{KEY_COLUMN, Row, column_name, split_column};
use widecol_api::store::{RowMutation, ScanSpec, Table};
use widecol_api::value::{TypedValue, ValueType};

use crate::config::EngineConfig;
use crate::counter::{CountCache, RowCounter};
use crate::decode::{ConversionIssue, RowDecoder};
use crate::error::EngineError;
use crate::filter::{QueryFilterBuilder, ScanStart, key_successor};
use crate::marker::{Marker, MarkerStack};
use crate::registry::{ColumnTypes, TypeRegistry};
use crate::tables::TableCache;

/// Paging state for one table view.
///
/// Paging calls take `&mut self`; callers serialize them. Row counting can
/// run elsewhere through [`ScanEngine::row_counter`].
pub struct ScanEngine {
    tables: Arc<TableCache>,
    table: String,
    registry: Arc<TypeRegistry>,
    types: ColumnTypes,
    filter: Arc<QueryFilterBuilder>,
    caching: Option<usize>,
    markers: MarkerStack,
    counts: Arc<CountCache>,
    cancel: CancellationToken,
    issues: Vec<ConversionIssue>,
}

impl std::fmt::Debug for ScanEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanEngine")
            .field("table", &self.table)
            .field("query", &self.filter.query())
            .field("markers", &self.markers.len())
            .finish()
    }
}

impl ScanEngine {
    pub fn new(
        tables: Arc<TableCache>,
        table: impl Into<String>,
        registry: Arc<TypeRegistry>,
        types: ColumnTypes,
    ) -> Self {
        Self {
            tables,
            table: table.into(),
            registry,
            types,
            filter: Arc::new(QueryFilterBuilder::default()),
            caching: None,
            markers: MarkerStack::new(),
            counts: Arc::new(CountCache::default()),
            cancel: CancellationToken::new(),
            issues: Vec::new(),
        }
    }

    /// Engine configured from `config`: date pattern, column types and
    /// scan caching.
    pub fn from_config(
        tables: Arc<TableCache>,
        table: impl Into<String>,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let registry = config.registry()?;
        let types = config.column_types(&registry)?;
        Ok(Self::new(tables, table, Arc::new(registry), types).with_caching(config.scan_caching))
    }

    /// Rows fetched per store round trip.
    pub fn with_caching(mut self, caching: usize) -> Self {
        self.caching = Some(caching);
        self.filter = Arc::new(QueryFilterBuilder::new(self.filter.query().cloned(), self.caching));
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn column_types(&self) -> &ColumnTypes {
        &self.types
    }

    pub fn query(&self) -> Option<&Query> {
        self.filter.query()
    }

    // ═══════════════════════════════════════════════════════════════
    //  Paging
    // ═══════════════════════════════════════════════════════════════

    /// Forget every page and the cached row count. With a seed, the next
    /// `current_page` starts at that key (inclusive).
    pub fn reset_cursor(&mut self, seed: Option<TypedValue>) {
        self.markers.clear();
        self.counts.invalidate();
        self.issues.clear();
        if let Some(key) = seed {
            tracing::debug!(table = %self.table, seed = %key, "cursor reset to seed");
            self.markers.push(Marker::seed(key));
        } else {
            tracing::debug!(table = %self.table, "cursor reset");
        }
    }

    /// The page on display. Reloads from the start unless the top page was
    /// loaded with `page_size`; a pending seed is loaded from the seed.
    pub fn current_page(&mut self, page_size: usize) -> Result<&[Row], EngineError> {
        let seed = match self.markers.top() {
            Some(top) if top.page_size() == Some(page_size) => return Ok(self.rows()),
            Some(top) if top.is_seed() => top.last_key().map(|k| k.raw().to_vec()),
            _ => None,
        };

        let start = match &seed {
            Some(key) => ScanStart::At(key),
            None => ScanStart::Beginning,
        };
        let (marker, issues) = self.load(start, page_size)?;
        tracing::info!(
            table = %self.table,
            rows = marker.rows().len(),
            seeded = seed.is_some(),
            "loaded first page"
        );
        if seed.is_some() {
            self.markers.replace_top(marker);
        } else {
            self.markers.clear();
            self.markers.push(marker);
        }
        self.issues = issues;
        Ok(self.rows())
    }

    /// The page after the one on display. At the end of the table nothing
    /// is pushed and the current page is returned again.
    pub fn next_page(&mut self, page_size: usize) -> Result<&[Row], EngineError> {
        let last = match self.markers.top() {
            None => return self.current_page(page_size),
            Some(top) if top.is_seed() => return self.current_page(page_size),
            Some(top) => top.last_key().map(|k| k.raw().to_vec()),
        };
        let Some(last) = last else {
            // The page on display is empty: nothing follows it.
            return Ok(self.rows());
        };

        let (marker, issues) = self.load(ScanStart::After(&last), page_size)?;
        if marker.is_empty() {
            tracing::debug!(table = %self.table, "end of table");
            return Ok(self.rows());
        }
        self.markers.push(marker);
        self.issues = issues;
        tracing::info!(
            table = %self.table,
            page = self.markers.len() - 1,
            rows = self.rows().len(),
            "loaded page"
        );
        Ok(self.rows())
    }

    /// The page before the one on display, replayed from cache. On the
    /// first page this returns the first page again.
    pub fn prev_page(&mut self) -> &[Row] {
        if self.markers.pop_to_previous() {
            tracing::debug!(table = %self.table, page = self.markers.len() - 1, "back one page");
        }
        self.rows()
    }

    /// Rows of the page on display; empty when unpositioned.
    pub fn rows(&self) -> &[Row] {
        self.markers.top().map(Marker::rows).unwrap_or_default()
    }

    /// Editable rows of the page on display. Edits stay in the cached page.
    pub fn rows_mut(&mut self) -> &mut [Row] {
        self.markers.top_mut().map(Marker::rows_mut).unwrap_or_default()
    }

    /// Zero-based index of the page on display.
    pub fn page_index(&self) -> Option<usize> {
        match self.markers.top() {
            Some(top) if !top.is_seed() => Some(self.markers.len() - 1),
            _ => None,
        }
    }

    pub fn has_previous(&self) -> bool {
        self.markers.len() > 1
    }

    pub fn is_positioned(&self) -> bool {
        self.page_index().is_some()
    }

    /// Conversion problems from the last page load or type change.
    pub fn diagnostics(&self) -> &[ConversionIssue] {
        &self.issues
    }

    /// Token checked between row pulls. A cancelled operation returns
    /// [`EngineError::Cancelled`]; the engine then arms a fresh token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn load(
        &mut self,
        start: ScanStart<'_>,
        page_size: usize,
    ) -> Result<(Marker, Vec<ConversionIssue>), EngineError> {
        let result = self.scan_rows(start, page_size);
        let (rows, issues) = self.rearm_if_cancelled(result)?;
        Ok((Marker::loaded(rows, page_size), issues))
    }

    /// A cancelled token stays cancelled; swap in a fresh one so the next
    /// operation runs.
    fn rearm_if_cancelled<T>(&mut self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if matches!(result, Err(EngineError::Cancelled)) {
            tracing::debug!(table = %self.table, "cancel token re-armed");
            self.cancel = CancellationToken::new();
        }
        result
    }

    fn scan_rows(
        &self,
        start: ScanStart<'_>,
        limit: usize,
    ) -> Result<(Vec<Row>, Vec<ConversionIssue>), EngineError> {
        let table = self.tables.get(&self.table)?;
        let spec = self.filter.spec_from(start);
        tracing::debug!(table = %self.table, spec = ?spec, limit, "opening scan");
        let mut cursor = table
            .scan(&spec)
            .map_err(|e| e.with_context(format!("scan '{}'", self.table)))?;

        let decoder = RowDecoder::new(&self.types);
        let mut rows = Vec::with_capacity(limit.min(1024));
        let mut issues = Vec::new();
        while rows.len() < limit {
            if self.cancel.is_cancelled() {
                tracing::info!(table = %self.table, loaded = rows.len(), "page load cancelled");
                return Err(EngineError::Cancelled);
            }
            match cursor.next()? {
                Some(result) if self.filter.is_valid_row(&result) => {
                    rows.push(decoder.decode(result, &mut issues));
                }
                Some(_) => {}
                None => break,
            }
        }
        Ok((rows, issues))
    }

    // ═══════════════════════════════════════════════════════════════
    //  Counting and schema discovery
    // ═══════════════════════════════════════════════════════════════

    /// Handle that counts rows of the current view on another thread.
    /// Cancelling the engine token also stops the handle.
    pub fn row_counter(&self) -> RowCounter {
        RowCounter::new(
            self.tables.clone(),
            self.table.clone(),
            self.filter.clone(),
            self.counts.clone(),
            self.cancel.child_token(),
        )
    }

    /// Number of rows in the current view. Cached until the cursor is
    /// reset, the query changes or the engine writes.
    pub fn row_count(&mut self) -> Result<u64, EngineError> {
        let result = self.row_counter().count();
        self.rearm_if_cancelled(result)
    }

    /// Column names, `key` first. Positioned: the columns of the page on
    /// display. Unpositioned: those seen in the first `sample_size` rows.
    pub fn columns(&mut self, sample_size: usize) -> Result<Vec<String>, EngineError> {
        let seed = match self.markers.top() {
            Some(top) if !top.is_seed() => None,
            top => Some(top.and_then(Marker::last_key).map(|k| k.raw().to_vec())),
        };
        let discovered: BTreeSet<String> = match seed {
            None => self.markers.top().map(|top| top.columns().clone()).unwrap_or_default(),
            Some(seed) => {
                let start = seed.as_deref().map_or(ScanStart::Beginning, ScanStart::At);
                let result = self.scan_rows(start, sample_size);
                let (rows, _) = self.rearm_if_cancelled(result)?;
                tracing::debug!(table = %self.table, sampled = rows.len(), "sampled columns");
                rows.iter()
                    .flat_map(|r| r.columns().map(str::to_string))
                    .collect()
            }
        };
        Ok(std::iter::once(KEY_COLUMN.to_string())
            .chain(discovered.into_iter().filter(|c| c != KEY_COLUMN))
            .collect())
    }

    /// Set the type of `column` (or `key`) and re-tag every cached value
    /// in place. Returns how many values did not fit and fell back to
    /// `BinaryString`. Those replace any earlier `diagnostics` for the column.
    pub fn update_column_type(&mut self, column: &str, value_type: ValueType) -> usize {
        self.types.set(column, value_type.clone());
        let mut failed = Vec::new();
        for marker in self.markers.iter_mut() {
            if column == KEY_COLUMN {
                if let Some(key) = marker.last_key_mut() {
                    if let Err(error) = key.retag(value_type.clone()) {
                        // Resume uses the raw bytes, which retag keeps.
                        tracing::debug!(table = %self.table, %error, "resume key kept as binary");
                    }
                }
            }
            for row in marker.rows_mut() {
                let result = if column == KEY_COLUMN {
                    row.retag_key(value_type.clone())
                } else {
                    match row.get_mut(column) {
                        Some(cell) => cell.value.retag(value_type.clone()),
                        None => Ok(()),
                    }
                };
                if let Err(error) = result {
                    failed.push(ConversionIssue {
                        row_key: row.key_bytes().to_vec(),
                        column: column.to_string(),
                        error,
                    });
                }
            }
        }
        tracing::info!(
            table = %self.table,
            column = %column,
            value_type = %value_type,
            fallbacks = failed.len(),
            "column type changed"
        );
        let count = failed.len();
        self.issues.retain(|issue| issue.column != column);
        self.issues.extend(failed);
        count
    }

    /// [`update_column_type`](Self::update_column_type) by type name.
    pub fn update_column_type_by_name(
        &mut self,
        column: &str,
        type_name: &str,
    ) -> Result<usize, EngineError> {
        let value_type = self.registry.resolve(type_name)?;
        Ok(self.update_column_type(column, value_type))
    }

    // ═══════════════════════════════════════════════════════════════
    //  Query and writes
    // ═══════════════════════════════════════════════════════════════

    /// Replace the active query and reset the cursor. A query naming a
    /// family the table doesn't have is rejected before any scan.
    pub fn set_query(&mut self, query: Option<Query>) -> Result<(), EngineError> {
        if let Some(family) = query.as_ref().and_then(Query::family) {
            let families = self.tables.column_families(&self.table)?;
            if !families.iter().any(|f| f == family) {
                return Err(QueryError::UnknownFamily(family.to_string()).into());
            }
        }
        tracing::info!(table = %self.table, filtered = query.is_some(), "query changed");
        self.filter = Arc::new(QueryFilterBuilder::new(query, self.caching));
        self.reset_cursor(None);
        Ok(())
    }

    pub fn column_families(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.tables.column_families(&self.table)?)
    }

    /// Write every cell of `row` to the store. Stored cells that `row` no
    /// longer has are deleted.
    pub fn save_row(&self, row: &Row) -> Result<(), EngineError> {
        let table = self.tables.get(&self.table)?;
        let mut mutation = RowMutation::new(row.key_bytes().to_vec());
        for cell in row.cells() {
            let (family, qualifier) = split_column(cell.column()).ok_or_else(|| {
                StoreError::rejected(format!("column '{}' has no family", cell.column()))
            })?;
            mutation = mutation.put(family, qualifier, cell.value.raw().to_vec());
        }
        for (family, qualifier) in stored_columns(table.as_ref(), row.key_bytes())? {
            if !row.contains(&column_name(&family, &qualifier)) {
                mutation = mutation.delete(&family, &qualifier);
            }
        }
        table.mutate(&mutation)?;
        self.counts.invalidate();
        tracing::info!(
            table = %self.table,
            row = %row.key(),
            cells = row.len(),
            removed = mutation.deletes.len(),
            "saved row"
        );
        Ok(())
    }

    /// Delete the row with `key` from the store and from every cached page.
    pub fn delete_row(&mut self, key: &TypedValue) -> Result<(), EngineError> {
        self.tables.get(&self.table)?.delete_row(key.raw())?;
        for marker in self.markers.iter_mut() {
            marker.remove_row(key.raw());
        }
        self.counts.invalidate();
        tracing::info!(table = %self.table, row = %key, "deleted row");
        Ok(())
    }
}

/// Columns currently stored for the row with exactly `key`.
fn stored_columns(table: &dyn Table, key: &[u8]) -> Result<Vec<(String, String)>, EngineError> {
    let spec = ScanSpec {
        start_row: Some(key.to_vec()),
        stop_row: Some(key_successor(key)),
        ..ScanSpec::default()
    };
    let mut cursor = table.scan(&spec)?;
    Ok(match cursor.next()? {
        Some(stored) if stored.key == key => stored.cells.into_keys().collect(),
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use widecol_store_memory::MemoryStore;

    use super::*;

    fn engine(rows: usize) -> ScanEngine {
        let store = Arc::new(MemoryStore::new());
        let data = store.create_table("t", &["d"]);
        for i in 0..rows {
            data.put(format!("k{i:02}").as_bytes(), "d", "v", b"x");
        }
        ScanEngine::new(
            Arc::new(TableCache::new(store)),
            "t",
            Arc::new(TypeRegistry::new()),
            ColumnTypes::new(),
        )
    }

    fn keys(rows: &[Row]) -> Vec<String> {
        rows.iter().map(|r| r.key().formatted()).collect()
    }

    #[test]
    fn unpositioned_engine_has_no_page() {
        let mut engine = engine(3);
        assert!(engine.rows().is_empty());
        assert!(engine.prev_page().is_empty());
        assert_eq!(engine.page_index(), None);
    }

    #[test]
    fn next_page_from_unpositioned_loads_first_page() {
        let mut engine = engine(5);
        assert_eq!(keys(engine.next_page(2).unwrap()), ["k00", "k01"]);
        assert_eq!(engine.page_index(), Some(0));
    }

    #[test]
    fn seed_loads_inclusively() {
        let mut engine = engine(5);
        engine.reset_cursor(Some(TypedValue::binary(b"k02".to_vec())));
        assert_eq!(engine.page_index(), None);
        assert_eq!(keys(engine.current_page(2).unwrap()), ["k02", "k03"]);
        assert_eq!(keys(engine.next_page(2).unwrap()), ["k04"]);
        assert!(engine.has_previous());
    }

    #[test]
    fn empty_table_stays_on_empty_page() {
        let mut engine = engine(0);
        assert!(engine.current_page(10).unwrap().is_empty());
        assert!(engine.next_page(10).unwrap().is_empty());
        assert_eq!(engine.page_index(), Some(0));
    }

    #[test]
    fn changed_page_size_reloads_from_start() {
        let mut engine = engine(6);
        engine.current_page(2).unwrap();
        engine.next_page(2).unwrap();
        assert_eq!(keys(engine.current_page(3).unwrap()), ["k00", "k01", "k02"]);
        assert!(!engine.has_previous());
    }

    #[test]
    fn from_config_applies_key_type() {
        let store = Arc::new(MemoryStore::new());
        let data = store.create_table("t", &["d"]);
        data.put(&9i64.to_be_bytes(), "d", "v", b"x");
        let config = EngineConfig::parse("key_type = \"Long\"\nscan_caching = 7\n").unwrap();
        let mut engine =
            ScanEngine::from_config(Arc::new(TableCache::new(store)), "t", &config).unwrap();
        assert_eq!(keys(engine.current_page(5).unwrap()), ["9"]);
        assert!(engine.diagnostics().is_empty());
    }

    #[test]
    fn failed_key_retag_still_resumes_after_last_key() {
        let mut engine = engine(5);
        engine.current_page(2).unwrap();
        assert_eq!(engine.update_column_type(KEY_COLUMN, ValueType::Integer), 2);
        assert_eq!(engine.diagnostics().len(), 2);
        assert_eq!(keys(engine.next_page(2).unwrap()), ["k02", "k03"]);
    }

    #[test]
    fn columns_list_key_first() {
        let mut engine = engine(2);
        assert_eq!(engine.columns(10).unwrap(), ["key", "d:v"]);
        engine.current_page(1).unwrap();
        assert_eq!(engine.columns(10).unwrap(), ["key", "d:v"]);
    }
}
