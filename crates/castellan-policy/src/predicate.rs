//! Storage-level predicates for bulk filtering.
//!
//! Common policies (ownership, attribute equality, role requirements) can be
//! translated into a predicate that a storage layer applies to a whole
//! collection, instead of evaluating the policy item by item.

use castellan_types::{AttributeValue, Resource};
use thiserror::Error;

/// Error raised while rendering a predicate for a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    /// A literal failed validation (e.g. contains SQL injection attempts).
    #[error("invalid literal in row filter: {0:?}")]
    InvalidLiteral(String),

    /// A column name is not a plain identifier.
    #[error("invalid column name in row filter: {0:?}")]
    InvalidColumn(String),
}

/// Operator for row filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// Equal (=)
    Eq,

    /// Not equal (!=)
    Ne,

    /// IN list
    In,

    /// NOT IN list
    NotIn,
}

impl FilterOperator {
    /// Returns the SQL representation of this operator.
    pub fn to_sql(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "!=",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT IN",
        }
    }
}

/// A single `column <op> value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct RowFilter {
    /// Resource attribute / column name to filter on.
    pub column: String,

    /// Operator for comparison.
    pub operator: FilterOperator,

    /// Value to compare against. List values pair with `In`/`NotIn`.
    pub value: AttributeValue,
}

impl RowFilter {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: AttributeValue) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
        }
    }

    /// Evaluates this filter against an in-memory resource.
    ///
    /// A resource that lacks the column never matches.
    pub fn matches(&self, resource: &dyn Resource) -> bool {
        let Some(actual) = resource.attribute(&self.column) else {
            return false;
        };
        match self.operator {
            FilterOperator::Eq | FilterOperator::In => self.value.matches(&actual),
            FilterOperator::Ne | FilterOperator::NotIn => !self.value.matches(&actual),
        }
    }

    /// Renders the filter. An empty `In` list matches nothing and an empty
    /// `NotIn` list matches everything.
    fn to_sql(&self) -> Result<String, PredicateError> {
        validate_column(&self.column)?;
        let literals = self.value.literals();
        if literals.is_empty() {
            match self.operator {
                FilterOperator::In => return Ok("FALSE".to_string()),
                FilterOperator::NotIn => return Ok("TRUE".to_string()),
                FilterOperator::Eq | FilterOperator::Ne => {}
            }
        }
        for literal in &literals {
            validate_sql_literal(literal)?;
        }
        let op = self.operator.to_sql();
        let rendered = match self.operator {
            FilterOperator::In | FilterOperator::NotIn => format!("({})", literals.join(", ")),
            FilterOperator::Eq | FilterOperator::Ne => literals.join(", "),
        };
        Ok(format!("{} {op} {rendered}", self.column))
    }
}

/// Outcome of translating a policy into a storage-level predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum StoragePredicate {
    /// Every item in the collection is allowed.
    All,

    /// No item in the collection is allowed.
    Nothing,

    /// Items matching all filters are allowed.
    Filter(Vec<RowFilter>),
}

impl StoragePredicate {
    pub fn filter(filter: RowFilter) -> Self {
        StoragePredicate::Filter(vec![filter])
    }

    /// Evaluates the predicate against an in-memory resource.
    pub fn matches(&self, resource: &dyn Resource) -> bool {
        match self {
            StoragePredicate::All => true,
            StoragePredicate::Nothing => false,
            StoragePredicate::Filter(filters) => filters.iter().all(|f| f.matches(resource)),
        }
    }

    /// Generates a SQL WHERE clause (without the `WHERE` keyword).
    ///
    /// `All` renders as `TRUE`, `Nothing` as `FALSE`.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError`] if a column or literal fails validation.
    pub fn to_where_clause(&self) -> Result<String, PredicateError> {
        match self {
            StoragePredicate::All => Ok("TRUE".to_string()),
            StoragePredicate::Nothing => Ok("FALSE".to_string()),
            StoragePredicate::Filter(filters) if filters.is_empty() => Ok("TRUE".to_string()),
            StoragePredicate::Filter(filters) => {
                let mut parts = Vec::with_capacity(filters.len());
                for f in filters {
                    parts.push(f.to_sql()?);
                }
                Ok(parts.join(" AND "))
            }
        }
    }
}

fn validate_column(column: &str) -> Result<(), PredicateError> {
    let valid = !column.is_empty()
        && column
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !column.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(PredicateError::InvalidColumn(column.to_string()))
    }
}

/// Validates that a value is a safe SQL literal.
///
/// Accepts: integers, floats, booleans (`true`/`false`), and simple quoted
/// strings (single-quoted, no embedded quotes or backslashes).
fn validate_sql_literal(value: &str) -> Result<(), PredicateError> {
    if value.parse::<i64>().is_ok() || value.parse::<f64>().is_ok_and(f64::is_finite) {
        return Ok(());
    }

    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
        return Ok(());
    }

    if value.len() >= 2
        && value.starts_with('\'')
        && value.ends_with('\'')
        && !value[1..value.len() - 1].contains('\'')
        && !value[1..value.len() - 1].contains('\\')
    {
        return Ok(());
    }

    Err(PredicateError::InvalidLiteral(value.to_string()))
}
