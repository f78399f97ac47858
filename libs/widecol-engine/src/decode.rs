use std::fmt;

use widecol_api::error::ConversionError;
use widecol_api::row::{KEY_COLUMN, Row, column_name};
use widecol_api::store::RowResult;
use widecol_api::value::{TypedValue, escape_binary};

use crate::registry::ColumnTypes;

/// A value that did not decode under its configured type and is shown as
/// `BinaryString` instead.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionIssue {
    pub row_key: Vec<u8>,
    pub column: String,
    pub error: ConversionError,
}

impl fmt::Display for ConversionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {} column {}: {}", escape_binary(&self.row_key), self.column, self.error)
    }
}

/// Materializes scan results into typed rows.
pub struct RowDecoder<'a> {
    types: &'a ColumnTypes,
}

impl<'a> RowDecoder<'a> {
    pub fn new(types: &'a ColumnTypes) -> Self {
        Self { types }
    }

    /// Decode one row. Cells that fail to decode fall back to
    /// `BinaryString` and are appended to `issues`; the row is always built.
    pub fn decode(&self, result: RowResult, issues: &mut Vec<ConversionIssue>) -> Row {
        let RowResult { key, cells } = result;
        let (key_value, key_error) = TypedValue::decode_lossy(self.types.key_type(), key);
        let mut row = Row::new(key_value);
        if let Some(error) = key_error {
            report(issues, row.key_bytes(), KEY_COLUMN, error);
        }

        for ((family, qualifier), raw) in cells {
            let column = column_name(&family, &qualifier);
            let (value, error) = TypedValue::decode_lossy(self.types.type_for(&column), raw);
            if let Some(error) = error {
                report(issues, row.key_bytes(), &column, error);
            }
            row.set(column, value);
        }
        row
    }
}

fn report(issues: &mut Vec<ConversionIssue>, row_key: &[u8], column: &str, error: ConversionError) {
    tracing::warn!(
        row = %escape_binary(row_key),
        column = %column,
        error = %error,
        "value shown as binary"
    );
    issues.push(ConversionIssue {
        row_key: row_key.to_vec(),
        column: column.to_string(),
        error,
    });
}
