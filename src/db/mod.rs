//! Database abstraction layer.
//!
//! Provides a trait-based interface for the two database capabilities the
//! conversational core consumes: schema introspection and read-only query
//! execution. No client in this module ever commits a write.

mod mock;
mod postgres;
mod schema;
mod sqlite;
mod types;

pub use mock::{FailingDatabaseClient, MockDatabaseClient};
pub use postgres::PostgresClient;
pub use schema::{Column, ForeignKey, Schema, Table};
pub use sqlite::SqliteClient;
pub use types::{ColumnInfo, QueryResult, Row, Value};

use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    Sqlite,
}

impl DatabaseBackend {
    /// Returns the backend as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Parses a backend from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Returns the default port for this backend.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Sqlite => 0,
        }
    }

    /// Returns the URL scheme for this backend.
    pub fn url_scheme(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// SQL dialect name used in model prompts.
    pub fn dialect_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::Sqlite => "SQLite",
        }
    }
}

/// Creates a database client for the given backend and configuration.
///
/// Errors from this function are connection errors: the session cannot start.
pub async fn connect(config: &ConnectionConfig, max_rows: usize) -> Result<Box<dyn DatabaseClient>> {
    match config.backend {
        DatabaseBackend::Postgres => {
            let client = PostgresClient::connect(config).await?.with_max_rows(max_rows);
            Ok(Box::new(client))
        }
        DatabaseBackend::Sqlite => {
            let client = SqliteClient::connect(config).await?.with_max_rows(max_rows);
            Ok(Box::new(client))
        }
    }
}

/// Interface for database clients.
///
/// Implementations must only ever read: `execute_query` is called with
/// statements that have already been validated as SELECTs, and backends
/// additionally run them in a read-only context.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Introspects the database schema, returning table and relationship information.
    async fn introspect_schema(&self) -> Result<Schema>;

    /// Executes a read-only SQL query and returns the results.
    async fn execute_query(&self, sql: &str) -> Result<QueryResult>;

    /// Closes the database connection.
    async fn close(&self) -> Result<()>;

    /// Returns the backend this client talks to.
    fn backend(&self) -> DatabaseBackend;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!(DatabaseBackend::parse("postgresql"), Some(DatabaseBackend::Postgres));
        assert_eq!(DatabaseBackend::parse("SQLite"), Some(DatabaseBackend::Sqlite));
        assert_eq!(DatabaseBackend::parse("mysql"), None);
    }

    #[test]
    fn test_backend_dialect_name() {
        assert_eq!(DatabaseBackend::Postgres.dialect_name(), "PostgreSQL");
        assert_eq!(DatabaseBackend::Sqlite.dialect_name(), "SQLite");
    }
}
