//! Statement safety checks.
//!
//! [`SqlClassifier`] decides whether generated SQL is read-only before it
//! reaches the database, and [`inspect_dml`] pulls the shape out of a
//! data-modification statement (target table, filter, row count) so guided
//! edits can be validated and simulated.

mod classify;
mod inspect;

pub use classify::{classify_sql, SqlClassifier};
pub use inspect::{inspect_dml, DmlInspection};

use std::fmt;

/// Safety level classification for SQL statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SafetyLevel {
    /// Read-only (SELECT, EXPLAIN, SHOW).
    Safe,
    /// Changes rows (INSERT, UPDATE, MERGE).
    Mutating,
    /// Removes data or changes schema (DELETE, DROP, TRUNCATE, ALTER, ...).
    Destructive,
}

impl SafetyLevel {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Safe)
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => write!(f, "Safe"),
            Self::Mutating => write!(f, "Mutating"),
            Self::Destructive => write!(f, "Destructive"),
        }
    }
}

/// The type of SQL statement detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Drop,
    Truncate,
    Alter,
    Create,
    Grant,
    Revoke,
    Explain,
    Show,
    Merge,
    /// Multiple statements detected; contains the most dangerous type.
    Multiple(Box<StatementType>),
    Unknown,
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "SELECT"),
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
            Self::Drop => write!(f, "DROP"),
            Self::Truncate => write!(f, "TRUNCATE"),
            Self::Alter => write!(f, "ALTER"),
            Self::Create => write!(f, "CREATE"),
            Self::Grant => write!(f, "GRANT"),
            Self::Revoke => write!(f, "REVOKE"),
            Self::Explain => write!(f, "EXPLAIN"),
            Self::Show => write!(f, "SHOW"),
            Self::Merge => write!(f, "MERGE"),
            Self::Multiple(inner) => write!(f, "Multiple ({})", inner),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Result of classifying a SQL string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    pub level: SafetyLevel,
    pub statement_type: StatementType,
    /// Why the statement was classified conservatively, if it was.
    pub warning: Option<String>,
}

impl ClassificationResult {
    pub fn new(level: SafetyLevel, statement_type: StatementType) -> Self {
        Self {
            level,
            statement_type,
            warning: None,
        }
    }

    pub fn with_warning(
        level: SafetyLevel,
        statement_type: StatementType,
        warning: impl Into<String>,
    ) -> Self {
        Self {
            level,
            statement_type,
            warning: Some(warning.into()),
        }
    }

    /// Returns true for a single read-only SELECT (including CTE queries).
    pub fn is_plain_select(&self) -> bool {
        self.level.is_read_only() && self.statement_type == StatementType::Select
    }
}
