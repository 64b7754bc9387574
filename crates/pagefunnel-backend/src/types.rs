//! Common types used across backends.

use chrono::NaiveDate;
use std::fmt;
use std::time::Duration;

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Table in the session-local temporary catalog.
    pub fn temp(name: impl Into<String>) -> Self {
        Self::new("temp", name)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// The (company code, data-date month) slice one run owns.
///
/// Rendered as the SQL predicate used both for the delete and as the
/// write-time guard of the insert, so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopePredicate {
    /// Column holding the company code
    pub company_column: String,

    pub company_code: i16,

    /// Date column whose year-month selects the slice
    pub date_column: String,

    /// Run data date; only its year-month is significant
    pub data_date: NaiveDate,
}

impl ScopePredicate {
    pub fn new(company_code: i16, data_date: NaiveDate) -> Self {
        Self {
            company_column: "COMPANY_CODE".to_string(),
            company_code,
            date_column: "DP_DATA_DT".to_string(),
            data_date,
        }
    }

    /// `YYYY-MM` of the data date.
    pub fn month_key(&self) -> String {
        self.data_date.format("%Y-%m").to_string()
    }

    pub fn to_sql(&self) -> String {
        format!(
            "{} = {} AND left(CAST({} AS VARCHAR), 7) = left('{}', 7)",
            self.company_column,
            self.company_code,
            self.date_column,
            self.data_date.format("%Y-%m-%d")
        )
    }
}

impl fmt::Display for ScopePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}, {}={}",
            self.company_column,
            self.company_code,
            self.date_column,
            self.month_key()
        )
    }
}

/// Result of replacing one scope of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Rows removed from the scope.
    pub deleted: usize,

    /// Rows written into the scope.
    pub inserted: usize,

    /// Whether delete and insert committed atomically.
    pub transactional: bool,

    pub duration: Duration,
}
