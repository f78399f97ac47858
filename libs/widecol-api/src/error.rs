use std::fmt;

/// Error kind for store access errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Cluster or region server unreachable. Transient, may retry.
    Unavailable,
    /// The named table does not exist.
    TableNotFound,
    /// Transport or I/O failure while reading a batch.
    Io,
    /// The store refused the request (bad scan parameters, closed handle).
    Rejected,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErrorKind::Unavailable => f.write_str("unavailable"),
            StoreErrorKind::TableNotFound => f.write_str("table not found"),
            StoreErrorKind::Io => f.write_str("io"),
            StoreErrorKind::Rejected => f.write_str("rejected"),
        }
    }
}

/// Store access error returned by all store trait methods.
#[derive(Debug, Clone)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self { kind: StoreErrorKind::Unavailable, message: msg.into() }
    }

    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self { kind: StoreErrorKind::TableNotFound, message: table.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: StoreErrorKind::Io, message: msg.into() }
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self { kind: StoreErrorKind::Rejected, message: msg.into() }
    }

    /// Add context to the error, preserving the original kind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

/// A single value could not be decoded, encoded or parsed under its type.
///
/// Always local to one cell: callers recover by falling back to a
/// binary-safe rendering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot convert value as {type_name}: {message}")]
pub struct ConversionError {
    pub type_name: String,
    pub message: String,
}

impl ConversionError {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}

/// A query descriptor is inconsistent and cannot be turned into a scan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("family and column must be given together")]
    IncompleteColumn,

    #[error("a value predicate needs a family, a column and an operator")]
    IncompletePredicate,

    #[error("operator {operator} does not apply to {type_name} values")]
    UnsupportedOperator { operator: String, type_name: String },

    #[error("start key sorts after end key")]
    InvertedKeyRange,

    #[error("start date is after end date")]
    InvertedTimeRange,

    #[error("unknown column family '{0}'")]
    UnknownFamily(String),

    #[error("invalid predicate word: {0}")]
    Word(#[from] ConversionError),
}
