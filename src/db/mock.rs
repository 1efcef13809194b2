//! Mock database clients for testing and offline demos.

use super::{
    Column, ColumnInfo, DatabaseBackend, DatabaseClient, ForeignKey, QueryResult, Row, Schema,
    Table, Value,
};
use crate::error::{ConverseError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

static FROM_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bfrom\s+([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"));

/// An in-memory client with a small fixed dataset.
///
/// `SELECT ... FROM <table>` returns that table's rows, `COUNT(*)` returns
/// the row count; anything else yields an empty result. Executed statements
/// are recorded so tests can assert what reached the database.
pub struct MockDatabaseClient {
    schema: Schema,
    data: HashMap<String, (Vec<ColumnInfo>, Vec<Row>)>,
    executed: Mutex<Vec<String>>,
}

impl MockDatabaseClient {
    /// Creates a mock with the built-in artist/customers/orders dataset.
    pub fn new() -> Self {
        let schema = Schema {
            tables: vec![
                Table::new("artist")
                    .with_column(Column::new("id", "integer").nullable(false))
                    .with_column(Column::new("name", "text").nullable(false))
                    .with_primary_key(&["id"]),
                Table::new("customers")
                    .with_column(Column::new("id", "integer").nullable(false))
                    .with_column(Column::new("name", "text").nullable(false))
                    .with_column(Column::new("email", "text"))
                    .with_primary_key(&["id"]),
                Table::new("orders")
                    .with_column(Column::new("id", "integer").nullable(false))
                    .with_column(Column::new("customer_id", "integer").nullable(false))
                    .with_column(Column::new("total", "real").nullable(false))
                    .with_column(
                        Column::new("status", "text")
                            .nullable(false)
                            .with_default("'pending'"),
                    )
                    .with_primary_key(&["id"]),
            ],
            foreign_keys: vec![ForeignKey::new(
                "orders",
                vec!["customer_id".to_string()],
                "customers",
                vec!["id".to_string()],
            )],
        };

        let mut client = Self::with_schema(schema);
        client.insert_rows(
            "artist",
            vec![
                vec![Value::Int(1), Value::from("AC/DC")],
                vec![Value::Int(2), Value::from("Aerosmith")],
            ],
        );
        client.insert_rows(
            "customers",
            vec![
                vec![Value::Int(1), Value::from("Ada"), Value::from("ada@example.com")],
                vec![Value::Int(2), Value::from("Linus"), Value::Null],
            ],
        );
        client.insert_rows(
            "orders",
            vec![
                vec![Value::Int(1), Value::Int(1), Value::Float(12.5), Value::from("shipped")],
                vec![Value::Int(2), Value::Int(2), Value::Float(99.99), Value::from("pending")],
            ],
        );
        client
    }

    /// Creates a mock with the given schema and no rows.
    pub fn with_schema(schema: Schema) -> Self {
        let data = schema
            .tables
            .iter()
            .map(|t| {
                let columns = t
                    .columns
                    .iter()
                    .map(|c| ColumnInfo::new(&c.name, &c.data_type))
                    .collect();
                (t.name.to_lowercase(), (columns, Vec::new()))
            })
            .collect();

        Self {
            schema,
            data,
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the rows of a table.
    pub fn insert_rows(&mut self, table: &str, rows: Vec<Row>) {
        if let Some((_, existing)) = self.data.get_mut(&table.to_lowercase()) {
            *existing = rows;
        }
    }

    /// Statements executed so far.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn introspect_schema(&self) -> Result<Schema> {
        Ok(self.schema.clone())
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(sql.to_string());
        }

        if !sql.trim_start().to_uppercase().starts_with("SELECT") {
            return Err(ConverseError::execution(
                "attempt to write a readonly database",
            ));
        }

        let table = FROM_TABLE
            .captures(sql)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_lowercase());

        let Some((columns, rows)) = table.as_ref().and_then(|t| self.data.get(t)) else {
            if let Some(name) = table {
                return Err(ConverseError::execution(format!("no such table: {name}")));
            }
            return Ok(QueryResult::with_data(vec![], vec![]));
        };

        let result = if sql.to_lowercase().contains("count(") {
            QueryResult::with_data(
                vec![ColumnInfo::new("count", "integer")],
                vec![vec![Value::Int(rows.len() as i64)]],
            )
        } else {
            QueryResult::with_data(columns.clone(), rows.clone())
        };

        Ok(result.with_execution_time(Duration::from_millis(1)))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Sqlite
    }
}

/// A client whose database is unreachable.
#[derive(Debug, Default)]
pub struct FailingDatabaseClient;

#[async_trait]
impl DatabaseClient for FailingDatabaseClient {
    async fn introspect_schema(&self) -> Result<Schema> {
        Err(ConverseError::connection("database is unreachable"))
    }

    async fn execute_query(&self, _sql: &str) -> Result<QueryResult> {
        Err(ConverseError::execution("database is unreachable"))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_select_returns_table_rows() {
        let client = MockDatabaseClient::new();
        let result = client.execute_query("SELECT * FROM artist").await.unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.column_names(), vec!["id", "name"]);
    }

    #[tokio::test]
    async fn test_mock_count() {
        let client = MockDatabaseClient::new();
        let result = client
            .execute_query("SELECT COUNT(*) FROM orders WHERE status = 'pending'")
            .await
            .unwrap();
        assert_eq!(result.rows[0][0], Value::Int(2));
    }

    #[tokio::test]
    async fn test_mock_refuses_writes_and_records_them() {
        let client = MockDatabaseClient::new();
        let result = client.execute_query("DELETE FROM artist").await;
        assert!(matches!(result, Err(ConverseError::Execution(_))));
        assert_eq!(client.executed(), vec!["DELETE FROM artist"]);
    }

    #[tokio::test]
    async fn test_mock_unknown_table() {
        let client = MockDatabaseClient::new();
        let err = client.execute_query("SELECT * FROM albums").await.unwrap_err();
        assert!(err.message().contains("albums"));
    }

    #[tokio::test]
    async fn test_failing_client() {
        let client = FailingDatabaseClient;
        assert!(client.introspect_schema().await.unwrap_err().is_fatal());
        assert!(!client.execute_query("SELECT 1").await.unwrap_err().is_fatal());
    }
}
