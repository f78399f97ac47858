use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use widecol_api::error::StoreError;
use widecol_api::store::{Store, Table};

/// Cache of open table handles for one store connection.
///
/// Handles are opened lazily on first `get` and kept until disposed, so the
/// scan engine never reopens a table per batch. Uses interior mutability so
/// it can be shared between engines and background workers.
pub struct TableCache {
    store: RwLock<Arc<dyn Store>>,
    tables: RwLock<HashMap<String, Arc<dyn Table>>>,
}

impl std::fmt::Debug for TableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCache")
            .field("open", &self.open_tables())
            .finish()
    }
}

impl TableCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store: RwLock::new(store),
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<dyn Store> {
        read(&self.store).clone()
    }

    /// Return the cached handle for `name`, opening it on first use.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Table>, StoreError> {
        if let Some(table) = read(&self.tables).get(name) {
            return Ok(table.clone());
        }
        let mut tables = write(&self.tables);
        // Another caller may have opened it while we waited for the lock.
        if let Some(table) = tables.get(name) {
            return Ok(table.clone());
        }
        let table = self
            .store()
            .table(name)
            .map_err(|e| e.with_context(format!("open table '{name}'")))?;
        tracing::debug!(table = %name, "opened table handle");
        tables.insert(name.to_string(), table.clone());
        Ok(table)
    }

    /// Close and evict one handle. Returns whether it was open.
    pub fn dispose(&self, name: &str) -> bool {
        match write(&self.tables).remove(name) {
            Some(table) => {
                table.close();
                tracing::debug!(table = %name, "closed table handle");
                true
            }
            None => false,
        }
    }

    /// Close every cached handle.
    pub fn clear(&self) {
        let drained: Vec<_> = write(&self.tables).drain().collect();
        for (_, table) in &drained {
            table.close();
        }
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "closed all table handles");
        }
    }

    /// Switch to another cluster: close every handle, then replace the store.
    pub fn switch_store(&self, store: Arc<dyn Store>) {
        self.clear();
        *write(&self.store) = store;
        tracing::info!("switched store connection");
    }

    pub fn table_names(&self) -> Result<Vec<String>, StoreError> {
        self.store().table_names()
    }

    pub fn column_families(&self, name: &str) -> Result<Vec<String>, StoreError> {
        self.store().column_families(name)
    }

    /// Names of tables with an open handle, sorted.
    pub fn open_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.tables).keys().cloned().collect();
        names.sort();
        names
    }
}

impl Drop for TableCache {
    fn drop(&mut self) {
        self.clear();
    }
}

pub(crate) fn read<T: ?Sized>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("table cache read lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn write<T: ?Sized>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("table cache write lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
