use widecol_api::error::{ConversionError, QueryError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("unknown value type '{0}'")]
    UnknownType(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Store` variant, context is added to the inner `StoreError`.
    /// For `Config`, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Store(e) => EngineError::Store(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            other => other,
        }
    }

    /// Whether retrying the same call may succeed (store outages, I/O).
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store(e) => matches!(
                e.kind,
                widecol_api::error::StoreErrorKind::Unavailable
                    | widecol_api::error::StoreErrorKind::Io
            ),
            EngineError::Io(_) | EngineError::Cancelled => true,
            _ => false,
        }
    }
}
