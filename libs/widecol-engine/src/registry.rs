//! Type lookup for the engine: built-in codecs, registered custom
//! converters, and per-column type overrides.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use widecol_api::converter::TypeConverter;
use widecol_api::row::KEY_COLUMN;
use widecol_api::value::{DateTimeFormat, ValueType};

use crate::error::EngineError;

/// Resolves type names to codecs. One registry per engine (or shared by
/// several engines through `Arc`); there is no process-wide instance.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    date_format: DateTimeFormat,
    custom: BTreeMap<String, Arc<dyn TypeConverter>>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("date_format", &self.date_format)
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date_format(mut self, pattern: &str) -> Result<Self, EngineError> {
        self.date_format = DateTimeFormat::new(pattern)?;
        Ok(self)
    }

    pub fn date_format(&self) -> &DateTimeFormat {
        &self.date_format
    }

    /// Add a custom converter. Names may not shadow a built-in or an
    /// already registered converter.
    pub fn register(&mut self, converter: Arc<dyn TypeConverter>) -> Result<(), EngineError> {
        let name = converter.name().to_string();
        let folded = name.to_ascii_lowercase();
        if ValueType::builtin(&name, &self.date_format).is_some() || self.custom.contains_key(&folded)
        {
            return Err(EngineError::Config(format!(
                "value type '{name}' is already registered"
            )));
        }
        tracing::info!(value_type = %name, "registered custom converter");
        self.custom.insert(folded, converter);
        Ok(())
    }

    /// Resolve a type name, case-insensitively.
    pub fn resolve(&self, name: &str) -> Result<ValueType, EngineError> {
        if let Some(ty) = ValueType::builtin(name, &self.date_format) {
            return Ok(ty);
        }
        self.custom
            .get(&name.to_ascii_lowercase())
            .map(|c| ValueType::Custom(c.clone()))
            .ok_or_else(|| EngineError::UnknownType(name.to_string()))
    }

    /// All known type names: built-ins first, then custom converters.
    pub fn type_names(&self) -> Vec<String> {
        ValueType::BUILTIN_NAMES
            .iter()
            .map(|n| n.to_string())
            .chain(self.custom.values().map(|c| c.name().to_string()))
            .collect()
    }
}

/// Explicit column → type assignments, with the name heuristic as fallback.
#[derive(Debug, Clone, Default)]
pub struct ColumnTypes {
    explicit: HashMap<String, ValueType>,
}

impl ColumnTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type for `column` (`family:qualifier` or `key`).
    pub fn type_for(&self, column: &str) -> ValueType {
        self.explicit
            .get(column)
            .cloned()
            .unwrap_or_else(|| ValueType::from_column_name(column))
    }

    pub fn key_type(&self) -> ValueType {
        self.type_for(KEY_COLUMN)
    }

    pub fn set(&mut self, column: impl Into<String>, value_type: ValueType) {
        self.explicit.insert(column.into(), value_type);
    }

    pub fn is_explicit(&self, column: &str) -> bool {
        self.explicit.contains_key(column)
    }
}
