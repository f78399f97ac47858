//! User-facing filter descriptor for a table view.
//!
//! A `Query` is validated once, when built, and is immutable afterwards.
//! The engine turns it into store scan parameters.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::QueryError;
use crate::row::column_name;
use crate::store::CompareOp;
use crate::value::{TypedValue, ValueType};

/// Comparison a value predicate applies to the probed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Contains,
    StartsWith,
    EndsWith,
}

impl Operator {
    pub const ALL: [Operator; 9] = [
        Operator::Equal,
        Operator::NotEqual,
        Operator::Less,
        Operator::LessOrEqual,
        Operator::Greater,
        Operator::GreaterOrEqual,
        Operator::Contains,
        Operator::StartsWith,
        Operator::EndsWith,
    ];

    /// Byte-wise compare op, for operators that compare encoded values.
    pub fn compare_op(self) -> Option<CompareOp> {
        match self {
            Operator::Equal => Some(CompareOp::Equal),
            Operator::NotEqual => Some(CompareOp::NotEqual),
            Operator::Less => Some(CompareOp::Less),
            Operator::LessOrEqual => Some(CompareOp::LessOrEqual),
            Operator::Greater => Some(CompareOp::Greater),
            Operator::GreaterOrEqual => Some(CompareOp::GreaterOrEqual),
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => None,
        }
    }

    /// Operators that match text rather than encoded bytes.
    pub fn is_textual(self) -> bool {
        self.compare_op().is_none()
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts-with",
            Operator::EndsWith => "ends-with",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Operator::ALL
            .into_iter()
            .find(|op| op.symbol() == normalized)
            .or(match normalized.as_str() {
                "==" | "eq" => Some(Operator::Equal),
                "<>" | "ne" => Some(Operator::NotEqual),
                "lt" => Some(Operator::Less),
                "le" => Some(Operator::LessOrEqual),
                "gt" => Some(Operator::Greater),
                "ge" => Some(Operator::GreaterOrEqual),
                "startswith" => Some(Operator::StartsWith),
                "endswith" => Some(Operator::EndsWith),
                _ => None,
            })
            .ok_or_else(|| format!("unknown operator '{s}'"))
    }
}

/// Single-column value predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub operator: Operator,
    pub word: TypedValue,
}

/// Key range, time range and at most one value predicate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    start_key: Option<TypedValue>,
    end_key: Option<TypedValue>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    family: Option<String>,
    column: Option<String>,
    predicate: Option<Predicate>,
}

impl Query {
    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }

    pub fn start_key(&self) -> Option<&TypedValue> {
        self.start_key.as_ref()
    }

    pub fn end_key(&self) -> Option<&TypedValue> {
        self.end_key.as_ref()
    }

    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    /// `family:column` when the query names a column.
    pub fn probed_column(&self) -> Option<String> {
        match (&self.family, &self.column) {
            (Some(f), Some(c)) => Some(column_name(f, c)),
            _ => None,
        }
    }

    /// True when the query restricts nothing.
    pub fn is_empty(&self) -> bool {
        *self == Query::default()
    }
}

/// Builder for [`Query`]. Validation happens in [`QueryBuilder::build`].
#[derive(Debug, Default)]
pub struct QueryBuilder {
    start_key: Option<TypedValue>,
    end_key: Option<TypedValue>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    family: Option<String>,
    column: Option<String>,
    word: Option<(Operator, ValueType, String)>,
}

impl QueryBuilder {
    pub fn start_key(mut self, key: TypedValue) -> Self {
        self.start_key = Some(key);
        self
    }

    pub fn end_key(mut self, key: TypedValue) -> Self {
        self.end_key = Some(key);
        self
    }

    pub fn start_date(mut self, date: DateTime<Utc>) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn end_date(mut self, date: DateTime<Utc>) -> Self {
        self.end_date = Some(date);
        self
    }

    pub fn family(mut self, family: &str) -> Self {
        self.family = Some(family.to_string());
        self
    }

    pub fn column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    /// Value predicate: `operator` applied to `word`, parsed as `word_type`.
    pub fn word(mut self, operator: Operator, word_type: ValueType, word: &str) -> Self {
        self.word = Some((operator, word_type, word.to_string()));
        self
    }

    pub fn build(self) -> Result<Query, QueryError> {
        if self.family.is_some() != self.column.is_some() {
            return Err(QueryError::IncompleteColumn);
        }

        let predicate = match self.word {
            None => None,
            Some(_) if self.family.is_none() => return Err(QueryError::IncompletePredicate),
            Some((operator, word_type, text)) => {
                if operator.is_textual() && !word_type.is_textual() {
                    return Err(QueryError::UnsupportedOperator {
                        operator: operator.to_string(),
                        type_name: word_type.name().to_string(),
                    });
                }
                let word = TypedValue::parse(word_type, &text)?;
                Some(Predicate { operator, word })
            }
        };

        if let (Some(start), Some(end)) = (&self.start_key, &self.end_key) {
            if start.raw() > end.raw() {
                return Err(QueryError::InvertedKeyRange);
            }
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(QueryError::InvertedTimeRange);
            }
        }

        Ok(Query {
            start_key: self.start_key,
            end_key: self.end_key,
            start_date: self.start_date,
            end_date: self.end_date,
            family: self.family,
            column: self.column,
            predicate,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn family_and_column_go_together() {
        let err = Query::builder().family("d").build().unwrap_err();
        assert_eq!(err, QueryError::IncompleteColumn);
        let q = Query::builder().family("d").column("name").build().unwrap();
        assert_eq!(q.probed_column().as_deref(), Some("d:name"));
    }

    #[test]
    fn word_needs_a_column() {
        let err = Query::builder()
            .word(Operator::Equal, ValueType::String, "x")
            .build()
            .unwrap_err();
        assert_eq!(err, QueryError::IncompletePredicate);
    }

    #[test]
    fn textual_operator_rejects_numeric_word() {
        let err = Query::builder()
            .family("d")
            .column("age")
            .word(Operator::Contains, ValueType::Integer, "4")
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedOperator { .. }));
    }

    #[test]
    fn malformed_word_is_rejected() {
        let err = Query::builder()
            .family("d")
            .column("age")
            .word(Operator::Greater, ValueType::Integer, "forty")
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::Word(_)));
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let err = Query::builder()
            .start_key(TypedValue::text("b"))
            .end_key(TypedValue::text("a"))
            .build()
            .unwrap_err();
        assert_eq!(err, QueryError::InvertedKeyRange);

        let late = DateTime::from_timestamp_millis(2_000).unwrap();
        let early = DateTime::from_timestamp_millis(1_000).unwrap();
        let err = Query::builder()
            .start_date(late)
            .end_date(early)
            .build()
            .unwrap_err();
        assert_eq!(err, QueryError::InvertedTimeRange);
    }

    #[test]
    fn operator_parses_symbols_and_names() {
        assert_eq!("<=".parse::<Operator>().unwrap(), Operator::LessOrEqual);
        assert_eq!("starts_with".parse::<Operator>().unwrap(), Operator::StartsWith);
        assert_eq!("GE".parse::<Operator>().unwrap(), Operator::GreaterOrEqual);
        assert!("~".parse::<Operator>().is_err());
    }

    #[test]
    fn default_query_is_empty() {
        assert!(Query::builder().build().unwrap().is_empty());
    }
}
