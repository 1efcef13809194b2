//! SQLite database client implementation.
//!
//! The database file is opened with `read_only(true)`: SQLite itself refuses
//! any write issued through this client.

use crate::config::ConnectionConfig;
use crate::db::{
    Column, ColumnInfo, DatabaseBackend, DatabaseClient, ForeignKey, QueryResult, Row, Schema,
    Table, Value,
};
use crate::error::{ConverseError, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as SqlxColumn, Executor, Row as SqlxRow, TypeInfo, ValueRef};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const QUERY_TIMEOUT_SECS: u64 = 30;

/// SQLite database client.
#[derive(Debug)]
pub struct SqliteClient {
    pool: SqlitePool,
    max_rows: usize,
}

impl SqliteClient {
    /// Creates a client from an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_rows: 1000,
        }
    }

    /// Sets the maximum number of rows kept from a query.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Opens the database file named by `config.database` in read-only mode.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let path = config
            .database
            .as_deref()
            .ok_or_else(|| ConverseError::connection("SQLite database path is required"))?;

        if !Path::new(path).exists() {
            return Err(ConverseError::connection(format!(
                "SQLite database '{path}' does not exist."
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                ConverseError::connection(format!("Failed to open SQLite database '{path}': {e}"))
            })?;

        debug!(path, "Opened SQLite database read-only");
        Ok(Self::from_pool(pool))
    }

    async fn fetch_tables(&self) -> Result<Vec<Table>> {
        let table_names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConverseError::connection(format!("Failed to fetch tables: {e}")))?;

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            tables.push(self.fetch_table(name).await?);
        }
        Ok(tables)
    }

    async fn fetch_table(&self, name: String) -> Result<Table> {
        let rows: Vec<(i64, String, String, i64, Option<String>, i64)> = sqlx::query_as(
            r#"SELECT cid, name, type, "notnull", dflt_value, pk FROM pragma_table_info(?)"#,
        )
        .bind(&name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConverseError::connection(format!("Failed to fetch columns for {name}: {e}")))?;

        let mut pk_columns: Vec<(i64, String)> = Vec::new();
        let mut columns = Vec::with_capacity(rows.len());

        for (_cid, col_name, data_type, notnull, default, pk) in rows {
            if pk > 0 {
                pk_columns.push((pk, col_name.clone()));
            }
            columns.push(Column {
                name: col_name,
                data_type: if data_type.is_empty() {
                    "TEXT".to_string()
                } else {
                    data_type
                },
                // SQLite reports PK columns as nullable unless declared otherwise
                is_nullable: notnull == 0 && pk == 0,
                default,
            });
        }

        pk_columns.sort_by_key(|(seq, _)| *seq);

        Ok(Table {
            name,
            columns,
            primary_key: pk_columns.into_iter().map(|(_, c)| c).collect(),
        })
    }

    async fn fetch_foreign_keys(&self, tables: &[Table]) -> Result<Vec<ForeignKey>> {
        let mut foreign_keys = Vec::new();

        for table in tables {
            let rows: Vec<(i64, String, String, Option<String>)> = sqlx::query_as(
                r#"SELECT id, "table", "from", "to" FROM pragma_foreign_key_list(?) ORDER BY id, seq"#,
            )
            .bind(&table.name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                ConverseError::connection(format!(
                    "Failed to fetch foreign keys for {}: {e}",
                    table.name
                ))
            })?;

            let mut current: Option<(i64, ForeignKey)> = None;
            for (id, to_table, from_col, to_col) in rows {
                // A NULL target column refers to the parent's primary key
                let to_col = to_col.unwrap_or_else(|| {
                    tables
                        .iter()
                        .find(|t| t.name == to_table)
                        .and_then(|t| t.primary_key.first().cloned())
                        .unwrap_or_else(|| "rowid".to_string())
                });

                match current.as_mut() {
                    Some((current_id, fk)) if *current_id == id => {
                        fk.from_columns.push(from_col);
                        fk.to_columns.push(to_col);
                    }
                    _ => {
                        if let Some((_, fk)) = current.take() {
                            foreign_keys.push(fk);
                        }
                        current = Some((
                            id,
                            ForeignKey::new(&table.name, vec![from_col], to_table, vec![to_col]),
                        ));
                    }
                }
            }
            if let Some((_, fk)) = current {
                foreign_keys.push(fk);
            }
        }

        Ok(foreign_keys)
    }

    async fn describe_columns(&self, sql: &str) -> Vec<ColumnInfo> {
        match self.pool.describe(sql).await {
            Ok(describe) => describe
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            Err(e) => {
                debug!(error = %e, "Could not describe empty result");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl DatabaseClient for SqliteClient {
    async fn introspect_schema(&self) -> Result<Schema> {
        let tables = self.fetch_tables().await?;
        let foreign_keys = self.fetch_foreign_keys(&tables).await?;
        debug!(tables = tables.len(), "Introspected SQLite schema");

        Ok(Schema {
            tables,
            foreign_keys,
        })
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(
            Duration::from_secs(QUERY_TIMEOUT_SECS),
            sqlx::query(sql).fetch_all(&self.pool),
        )
        .await
        .map_err(|_| {
            ConverseError::execution(format!(
                "Query timed out after {QUERY_TIMEOUT_SECS} seconds"
            ))
        })?
        .map_err(|e| match e.as_database_error() {
            Some(db_error) => ConverseError::execution(db_error.message().to_string()),
            None => ConverseError::execution(e.to_string()),
        })?;

        let execution_time = start.elapsed();

        let columns: Vec<ColumnInfo> = match result.first() {
            Some(first_row) => first_row
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            None => self.describe_columns(sql).await,
        };

        let total_rows = result.len();
        let was_truncated = total_rows > self.max_rows;
        if was_truncated {
            warn!(total_rows, max_rows = self.max_rows, "Truncating query result");
        }

        let rows: Vec<Row> = result.iter().take(self.max_rows).map(convert_row).collect();

        Ok(QueryResult {
            columns,
            rows,
            execution_time,
            total_rows: Some(total_rows),
            was_truncated,
        })
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Sqlite
    }
}

fn convert_row(row: &SqliteRow) -> Row {
    (0..row.columns().len())
        .map(|i| convert_value(row, i))
        .collect()
}

/// Converts a value by its storage class. SQLite types are per value, not per
/// column, so the declared column type is not consulted.
fn convert_value(row: &SqliteRow, index: usize) -> Value {
    let storage = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_uppercase(),
        Err(_) => return Value::Null,
    };

    let converted = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(index).ok().map(Value::Int),
        "REAL" | "NUMERIC" => row.try_get::<f64, _>(index).ok().map(Value::Float),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).ok().map(Value::Bytes),
        _ => None,
    };

    converted
        .or_else(|| row.try_get::<String, _>(index).ok().map(Value::String))
        .unwrap_or(Value::Null)
}
