use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::filter::QueryFilterBuilder;
use crate::tables::TableCache;

#[derive(Debug, Default)]
struct CountState {
    generation: u64,
    count: Option<u64>,
}

/// Row-count cache shared by an engine and every counter it hands out.
///
/// Each reset bumps the generation. A count is only stored when it was
/// started under the current generation.
#[derive(Debug, Default)]
pub(crate) struct CountCache {
    state: Mutex<CountState>,
}

impl CountCache {
    pub(crate) fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub(crate) fn invalidate(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.count = None;
    }

    fn get(&self, generation: u64) -> Option<u64> {
        let state = self.lock();
        if state.generation == generation { state.count } else { None }
    }

    fn store(&self, generation: u64, count: u64) -> bool {
        let mut state = self.lock();
        if state.generation == generation {
            state.count = Some(count);
            true
        } else {
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, CountState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("row count lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Counts the rows of a table view on its own scan.
///
/// Cheap to clone and `Send`, so a count can run on a blocking worker while
/// the owning engine keeps paging. It never touches the engine's markers.
#[derive(Debug, Clone)]
pub struct RowCounter {
    tables: Arc<TableCache>,
    table: String,
    filter: Arc<QueryFilterBuilder>,
    generation: u64,
    cache: Arc<CountCache>,
    cancel: CancellationToken,
}

impl RowCounter {
    pub(crate) fn new(
        tables: Arc<TableCache>,
        table: String,
        filter: Arc<QueryFilterBuilder>,
        cache: Arc<CountCache>,
        cancel: CancellationToken,
    ) -> Self {
        let generation = cache.generation();
        Self { tables, table, filter, generation, cache, cancel }
    }

    /// Token that stops a running count between row pulls.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether a count is already cached for this counter's generation.
    pub fn is_cached(&self) -> bool {
        self.cache.get(self.generation).is_some()
    }

    /// Number of rows in the view. The first call scans the whole range;
    /// later calls return the cached value until the engine resets.
    pub fn count(&self) -> Result<u64, EngineError> {
        if let Some(count) = self.cache.get(self.generation) {
            tracing::debug!(table = %self.table, count, "row count cache hit");
            return Ok(count);
        }

        let table = self.tables.get(&self.table)?;
        let spec = self.filter.spec();
        tracing::debug!(table = %self.table, spec = ?spec, "counting rows");
        let mut cursor = table
            .scan(&spec)
            .map_err(|e| e.with_context(format!("count rows of '{}'", self.table)))?;

        let mut count = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(table = %self.table, counted = count, "row count cancelled");
                return Err(EngineError::Cancelled);
            }
            match cursor.next()? {
                Some(row) if self.filter.is_valid_row(&row) => count += 1,
                Some(_) => {}
                None => break,
            }
        }

        if self.cache.store(self.generation, count) {
            tracing::info!(table = %self.table, count, "counted rows");
        } else {
            tracing::debug!(table = %self.table, count, "view changed during count, not cached");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use widecol_store_memory::MemoryStore;

    use super::*;

    fn counter(rows: usize) -> (RowCounter, Arc<widecol_store_memory::MemoryTable>) {
        let store = Arc::new(MemoryStore::new());
        let data = store.create_table("t", &["d"]);
        for i in 0..rows {
            data.put(format!("r{i:03}").as_bytes(), "d", "v", b"x");
        }
        let counter = RowCounter::new(
            Arc::new(TableCache::new(store)),
            "t".to_string(),
            Arc::new(QueryFilterBuilder::default()),
            Arc::new(CountCache::default()),
            CancellationToken::new(),
        );
        (counter, data)
    }

    #[test]
    fn second_count_is_served_from_cache() {
        let (counter, data) = counter(12);
        assert_eq!(counter.count().unwrap(), 12);
        let scans = data.scan_count();
        assert_eq!(counter.clone().count().unwrap(), 12);
        assert_eq!(data.scan_count(), scans);
        assert!(counter.is_cached());
    }

    #[test]
    fn stale_generation_never_populates_cache() {
        let (counter, data) = counter(3);
        counter.cache.invalidate();
        assert_eq!(counter.count().unwrap(), 3);
        assert!(!counter.is_cached());
        assert_eq!(counter.cache.get(counter.cache.generation()), None);
        data.put(b"r999", "d", "v", b"x");
        assert_eq!(counter.count().unwrap(), 4);
    }

    #[test]
    fn cancelled_count_returns_cancelled() {
        let (counter, _) = counter(5);
        counter.cancel_token().cancel();
        assert!(matches!(counter.count(), Err(EngineError::Cancelled)));
        assert!(!counter.is_cached());
    }
}
