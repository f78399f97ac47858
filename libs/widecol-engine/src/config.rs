use std::collections::BTreeMap;

use serde::Deserialize;

use widecol_api::row::KEY_COLUMN;
use widecol_api::value::DEFAULT_DATE_TIME_FORMAT;

use crate::error::EngineError;
use crate::registry::{ColumnTypes, TypeRegistry};

/// Engine configuration, parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Rows per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Rows sampled to discover columns before the first page is loaded.
    #[serde(default = "default_column_sample_size")]
    pub column_sample_size: usize,

    /// Rows fetched per store round trip.
    #[serde(default = "default_scan_caching")]
    pub scan_caching: usize,

    /// `strftime` pattern for `DateTime` values.
    #[serde(default = "default_date_time_format")]
    pub date_time_format: String,

    /// Row key type name. Shorthand for a `key` entry in `column_types`.
    #[serde(default)]
    pub key_type: Option<String>,

    /// Column (`family:qualifier` or `key`) → type name.
    #[serde(default)]
    pub column_types: BTreeMap<String, String>,
}

fn default_page_size() -> usize {
    100
}

fn default_column_sample_size() -> usize {
    100
}

fn default_scan_caching() -> usize {
    100
}

fn default_date_time_format() -> String {
    DEFAULT_DATE_TIME_FORMAT.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            column_sample_size: default_column_sample_size(),
            scan_caching: default_scan_caching(),
            date_time_format: default_date_time_format(),
            key_type: None,
            column_types: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        for (name, value) in [
            ("page_size", self.page_size),
            ("column_sample_size", self.column_sample_size),
            ("scan_caching", self.scan_caching),
        ] {
            if value == 0 {
                return Err(EngineError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    /// Registry with the configured date/time pattern. Custom converters
    /// are registered on the result by the caller.
    pub fn registry(&self) -> Result<TypeRegistry, EngineError> {
        TypeRegistry::new()
            .with_date_format(&self.date_time_format)
            .map_err(|e| e.with_context("date_time_format"))
    }

    /// Resolve `column_types` against `registry`.
    pub fn column_types(&self, registry: &TypeRegistry) -> Result<ColumnTypes, EngineError> {
        let mut types = ColumnTypes::new();
        for (column, type_name) in &self.column_types {
            let ty = registry
                .resolve(type_name)
                .map_err(|e| EngineError::Config(format!("column '{column}': {e}")))?;
            types.set(column.clone(), ty);
        }
        if let Some(type_name) = &self.key_type {
            let ty = registry
                .resolve(type_name)
                .map_err(|e| EngineError::Config(format!("key_type: {e}")))?;
            types.set(KEY_COLUMN, ty);
        }
        Ok(types)
    }
}

#[cfg(test)]
mod tests {
    use widecol_api::value::ValueType;

    use super::*;

    #[test]
    fn defaults_apply_to_empty_document() {
        let config = EngineConfig::parse("").unwrap();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.date_time_format, DEFAULT_DATE_TIME_FORMAT);
        assert!(config.column_types.is_empty());
    }

    #[test]
    fn column_types_resolve_through_registry() {
        let config = EngineConfig::parse(
            r#"
            page_size = 25
            date_time_format = "%Y-%m-%d"

            [column_types]
            key = "Integer"
            "d:born" = "datetime"
            "#,
        )
        .unwrap();
        let registry = config.registry().unwrap();
        let types = config.column_types(&registry).unwrap();
        assert_eq!(types.key_type(), ValueType::Integer);
        assert_eq!(types.type_for("d:born").name(), "DateTime");
    }

    #[test]
    fn unknown_type_names_fail() {
        let config = EngineConfig::parse("[column_types]\n\"d:x\" = \"Decimal\"\n").unwrap();
        let registry = config.registry().unwrap();
        let err = config.column_types(&registry).unwrap_err();
        assert!(err.to_string().contains("d:x"));
    }

    #[test]
    fn key_type_shorthand_wins_over_map_entry() {
        let config = EngineConfig::parse(
            "key_type = \"long\"\n[column_types]\nkey = \"String\"\n",
        )
        .unwrap();
        let types = config.column_types(&config.registry().unwrap()).unwrap();
        assert_eq!(types.key_type(), ValueType::Long);
    }

    #[test]
    fn load_reads_file_and_names_it_in_errors() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("widecol.toml");
        std::fs::write(&good, "scan_caching = 500\n").unwrap();
        let config = EngineConfig::load(good.to_str().unwrap()).unwrap();
        assert_eq!(config.scan_caching, 500);

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "page_size = 0\n").unwrap();
        let err = EngineConfig::load(bad.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));

        assert!(EngineConfig::load(dir.path().join("missing.toml").to_str().unwrap()).is_err());
    }

    #[test]
    fn zero_page_size_is_rejected() {
        assert!(matches!(EngineConfig::parse("page_size = 0"), Err(EngineError::Config(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(EngineConfig::parse("pagesize = 10").is_err());
    }
}
