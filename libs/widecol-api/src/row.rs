use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::error::ConversionError;
use crate::value::{TypedValue, ValueType};

/// Pseudo-column name under which the row key is listed and typed.
pub const KEY_COLUMN: &str = "key";

/// Join a family and qualifier into the `family:qualifier` column name.
pub fn column_name(family: &str, qualifier: &str) -> String {
    format!("{family}:{qualifier}")
}

/// Split `family:qualifier`. Qualifiers may themselves contain `:`.
pub fn split_column(column: &str) -> Option<(&str, &str)> {
    column.split_once(':')
}

/// Non-owning handle from a cell to the row that owns it: the row key bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowRef(Vec<u8>);

impl RowRef {
    pub fn key(&self) -> &[u8] {
        &self.0
    }
}

/// One column value of a row.
#[derive(Debug, Clone)]
pub struct Cell {
    row: RowRef,
    column: String,
    pub value: TypedValue,
}

impl Cell {
    /// The row this cell belongs to. Lookup only; the `Row` owns the cell.
    pub fn row(&self) -> &RowRef {
        &self.row
    }

    /// `family:qualifier`.
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn family(&self) -> &str {
        split_column(&self.column).map_or("", |(f, _)| f)
    }

    pub fn qualifier(&self) -> &str {
        split_column(&self.column).map_or(self.column.as_str(), |(_, q)| q)
    }
}

/// A materialized row: a typed key plus its cells keyed by column name.
///
/// Equality is key equality.
#[derive(Debug, Clone)]
pub struct Row {
    key: TypedValue,
    cells: BTreeMap<String, Cell>,
}

impl Row {
    pub fn new(key: TypedValue) -> Self {
        Self { key, cells: BTreeMap::new() }
    }

    pub fn key(&self) -> &TypedValue {
        &self.key
    }

    pub fn key_bytes(&self) -> &[u8] {
        self.key.raw()
    }

    /// Handle that cells of this row carry.
    pub fn row_ref(&self) -> RowRef {
        RowRef(self.key.raw().to_vec())
    }

    /// Change the key type. The key bytes are untouched.
    pub fn retag_key(&mut self, value_type: ValueType) -> Result<(), ConversionError> {
        self.key.retag(value_type)
    }

    /// Insert or replace the cell for `column`.
    pub fn set(&mut self, column: impl Into<String>, value: TypedValue) -> &mut Cell {
        let row = self.row_ref();
        match self.cells.entry(column.into()) {
            Entry::Occupied(entry) => {
                let cell = entry.into_mut();
                cell.value = value;
                cell
            }
            Entry::Vacant(entry) => {
                let column = entry.key().clone();
                entry.insert(Cell { row, column, value })
            }
        }
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells.get(column)
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut Cell> {
        self.cells.get_mut(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Cell> {
        self.cells.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.cells.contains_key(column)
    }

    /// Cells in column-name order.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.key.raw() == other.key.raw()
    }
}

impl Eq for Row {}
