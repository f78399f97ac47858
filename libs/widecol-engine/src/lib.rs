//! Paging and typed-decoding engine over a forward-only wide-column scan.
//!
//! [`ScanEngine`] is the entry point: it owns the page history for one
//! table view and answers current, next and previous page requests, row
//! counts and column discovery. Everything store-specific goes through the
//! traits in `widecol_api::store`.

pub mod config;
pub mod counter;
pub mod decode;
pub mod error;
pub mod filter;
pub mod marker;
pub mod registry;
pub mod scan;
pub mod tables;

pub use config::EngineConfig;
pub use counter::RowCounter;
pub use decode::ConversionIssue;
pub use error::EngineError;
pub use filter::QueryFilterBuilder;
pub use registry::{ColumnTypes, TypeRegistry};
pub use scan::ScanEngine;
pub use tables::TableCache;
