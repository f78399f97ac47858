use std::collections::BTreeSet;

use widecol_api::row::Row;
use widecol_api::value::TypedValue;

/// Cursor position after one loaded batch: the rows of that page, the
/// columns they carry and the key to resume after.
#[derive(Debug, Clone)]
pub struct Marker {
    last_key: Option<TypedValue>,
    rows: Vec<Row>,
    columns: BTreeSet<String>,
    /// Page size the batch was loaded with. `None` for a seed that has not
    /// been loaded yet.
    page_size: Option<usize>,
}

impl Marker {
    /// A loaded batch. `last_key` is the key of its final row.
    pub fn loaded(rows: Vec<Row>, page_size: usize) -> Self {
        let last_key = rows.last().map(|r| r.key().clone());
        let columns = rows
            .iter()
            .flat_map(|r| r.columns().map(str::to_string))
            .collect();
        Self { last_key, rows, columns, page_size: Some(page_size) }
    }

    /// A resume point with no rows. The next page load starts at `key`.
    pub fn seed(key: TypedValue) -> Self {
        Self {
            last_key: Some(key),
            rows: Vec::new(),
            columns: BTreeSet::new(),
            page_size: None,
        }
    }

    pub fn is_seed(&self) -> bool {
        self.page_size.is_none()
    }

    pub fn page_size(&self) -> Option<usize> {
        self.page_size
    }

    pub fn last_key(&self) -> Option<&TypedValue> {
        self.last_key.as_ref()
    }

    pub fn first_key(&self) -> Option<&TypedValue> {
        self.rows.first().map(Row::key)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last_key_mut(&mut self) -> Option<&mut TypedValue> {
        self.last_key.as_mut()
    }

    /// Drop the row with `key` from the cached page. The resume key stays.
    pub fn remove_row(&mut self, key: &[u8]) -> bool {
        let before = self.rows.len();
        self.rows.retain(|r| r.key_bytes() != key);
        before != self.rows.len()
    }
}

/// Stack of markers, bottom is page 0, top is the page on display.
#[derive(Debug, Default)]
pub struct MarkerStack {
    markers: Vec<Marker>,
}

impl MarkerStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a checkpoint. Markers must come in scan order.
    pub fn push(&mut self, marker: Marker) {
        debug_assert!(
            match (self.top().and_then(Marker::last_key), marker.first_key()) {
                (Some(prev), Some(first)) => prev.raw() < first.raw(),
                _ => true,
            },
            "markers pushed out of key order"
        );
        self.markers.push(marker);
    }

    /// Step back one page. The bottom marker is never popped.
    pub fn pop_to_previous(&mut self) -> bool {
        if self.markers.len() > 1 {
            self.markers.pop();
            true
        } else {
            false
        }
    }

    /// Replace a pending seed with its loaded page.
    pub fn replace_top(&mut self, marker: Marker) {
        self.markers.pop();
        self.markers.push(marker);
    }

    pub fn top(&self) -> Option<&Marker> {
        self.markers.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Marker> {
        self.markers.last_mut()
    }

    pub fn clear(&mut self) {
        self.markers.clear();
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Marker> {
        self.markers.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(keys: &[&str]) -> Marker {
        let rows = keys
            .iter()
            .map(|k| {
                let mut row = Row::new(TypedValue::text(*k));
                row.set("d:v", TypedValue::text("x"));
                row
            })
            .collect();
        Marker::loaded(rows, keys.len())
    }

    #[test]
    fn loaded_marker_records_last_key_and_columns() {
        let marker = page(&["a", "b"]);
        assert_eq!(marker.last_key().unwrap().raw(), b"b");
        assert!(marker.columns().contains("d:v"));
        assert!(!marker.is_seed());
    }

    #[test]
    fn empty_batch_has_no_resume_key() {
        let marker = Marker::loaded(Vec::new(), 10);
        assert!(marker.last_key().is_none());
        assert!(marker.is_empty());
    }

    #[test]
    fn bottom_marker_is_kept() {
        let mut stack = MarkerStack::new();
        stack.push(page(&["a"]));
        stack.push(page(&["b"]));
        assert!(stack.pop_to_previous());
        assert!(!stack.pop_to_previous());
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.top().unwrap().first_key().unwrap().raw(), b"a");
    }

    #[test]
    fn seed_is_replaced_by_its_page() {
        let mut stack = MarkerStack::new();
        stack.push(Marker::seed(TypedValue::text("m")));
        assert!(stack.top().unwrap().is_seed());
        stack.replace_top(page(&["m", "n"]));
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.top().unwrap().page_size(), Some(2));
    }

    #[test]
    fn remove_row_keeps_resume_key() {
        let mut marker = page(&["a", "b"]);
        assert!(marker.remove_row(b"b"));
        assert!(!marker.remove_row(b"zz"));
        assert_eq!(marker.rows().len(), 1);
        assert_eq!(marker.last_key().unwrap().raw(), b"b");
    }
}
