//! Translation of a [`Query`] into store scan parameters.

use chrono::{DateTime, Utc};

use widecol_api::query::{Operator, Query};
use widecol_api::store::{Comparator, CompareOp, RowResult, ScanSpec, TimeRange, ValueFilter};

/// Appended to the end key to form the exclusive stop row, so the end key
/// and longer keys sharing it as a prefix stay inside the range.
pub const STOP_ROW_PAD: [u8; 4] = [0xFF; 4];

/// Where a scan begins, before the query's own start key is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStart<'a> {
    Beginning,
    /// At this key, inclusive.
    At(&'a [u8]),
    /// Strictly after this key.
    After(&'a [u8]),
}

/// Builds scan specs for one table view under an optional query.
#[derive(Debug, Clone, Default)]
pub struct QueryFilterBuilder {
    query: Option<Query>,
    caching: Option<usize>,
}

impl QueryFilterBuilder {
    pub fn new(query: Option<Query>, caching: Option<usize>) -> Self {
        Self { query, caching }
    }

    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    pub fn caching(&self) -> Option<usize> {
        self.caching
    }

    /// Scan covering the whole query range.
    pub fn spec(&self) -> ScanSpec {
        self.spec_from(ScanStart::Beginning)
    }

    /// Scan resuming at `start`. The start row never precedes the
    /// query's start key.
    pub fn spec_from(&self, start: ScanStart<'_>) -> ScanSpec {
        let resume = match start {
            ScanStart::Beginning => None,
            ScanStart::At(key) => Some(key.to_vec()),
            ScanStart::After(key) => Some(key_successor(key)),
        };
        let query_start = self
            .query
            .as_ref()
            .and_then(Query::start_key)
            .map(|k| k.raw().to_vec());
        let start_row = match (resume, query_start) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let Some(query) = &self.query else {
            return ScanSpec { start_row, caching: self.caching, ..ScanSpec::default() };
        };

        ScanSpec {
            start_row,
            stop_row: query.end_key().map(|k| stop_row(k.raw())),
            time_range: time_range(query.start_date(), query.end_date()),
            filter: value_filter(query),
            caching: self.caching,
        }
    }

    /// Whether a scanned row belongs in the view. Rows lacking the probed
    /// column are skipped, matching what the store-side filter drops.
    pub fn is_valid_row(&self, row: &RowResult) -> bool {
        match self.query.as_ref().and_then(|q| q.family().zip(q.column())) {
            Some((family, column)) => row.value(family, column).is_some(),
            None => true,
        }
    }
}

/// Smallest key sorting strictly after `key`.
pub fn key_successor(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0x00);
    next
}

fn stop_row(end_key: &[u8]) -> Vec<u8> {
    let mut stop = Vec::with_capacity(end_key.len() + STOP_ROW_PAD.len());
    stop.extend_from_slice(end_key);
    stop.extend_from_slice(&STOP_ROW_PAD);
    stop
}

/// Inclusive `[start, end]` in milliseconds mapped to the store's `[min, max)`.
fn time_range(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<TimeRange> {
    if start.is_none() && end.is_none() {
        return None;
    }
    let min_ms = start.map_or(0, |d| d.timestamp_millis().max(0));
    let max_ms = end.map_or(i64::MAX, |d| d.timestamp_millis().saturating_add(1));
    Some(TimeRange { min_ms, max_ms })
}

fn value_filter(query: &Query) -> Option<ValueFilter> {
    let predicate = query.predicate()?;
    let (family, column) = query.family().zip(query.column())?;
    let word = &predicate.word;
    let text = String::from_utf8_lossy(word.raw());

    let (op, comparator) = match predicate.operator {
        Operator::Contains => (CompareOp::Equal, Comparator::Substring(text.into_owned())),
        Operator::StartsWith => (
            CompareOp::Equal,
            Comparator::Pattern(format!("^{}", regex::escape(&text))),
        ),
        Operator::EndsWith => (
            CompareOp::Equal,
            Comparator::Pattern(format!("{}$", regex::escape(&text))),
        ),
        other => (
            other.compare_op()?,
            Comparator::Binary(word.raw().to_vec()),
        ),
    };

    Some(ValueFilter {
        family: family.to_string(),
        qualifier: column.to_string(),
        op,
        comparator,
        filter_if_missing: true,
    })
}
