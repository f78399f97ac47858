pub mod converter;
pub mod error;
pub mod query;
pub mod row;
pub mod store;
pub mod value;
