//! Shared fixtures: a seeded SQLite database and an assistant over it.

use std::sync::Arc;

use db_converse::config::{AssistantConfig, ConnectionConfig};
use db_converse::db::{DatabaseClient, SqliteClient, Value};
use db_converse::llm::MockLlmClient;
use db_converse::schema_provider::SchemaProvider;
use db_converse::Assistant;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

const SEED: &[&str] = &[
    "CREATE TABLE artist (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT, region TEXT)",
    "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER NOT NULL REFERENCES customers(id), total REAL NOT NULL, status TEXT NOT NULL DEFAULT 'pending')",
    "INSERT INTO artist (name) VALUES ('AC/DC'), ('Aerosmith'), ('Björk')",
    "INSERT INTO customers (name, email, region) VALUES ('Ada', 'ada@example.com', 'EU'), ('Linus', NULL, 'EU'), ('Grace', 'grace@example.com', 'US')",
    "INSERT INTO orders (customer_id, total, status) VALUES (1, 12.5, 'shipped'), (1, 3.0, 'shipped'), (2, 99.99, 'pending'), (3, 42.0, 'pending'), (3, 7.25, 'pending'), (2, 18.0, 'cancelled'), (1, 64.0, 'pending')",
];

/// A seeded database file. The directory is removed on drop.
pub struct TestDatabase {
    _dir: TempDir,
    pub config: ConnectionConfig,
}

impl TestDatabase {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.db");
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        for stmt in SEED {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        pool.close().await;

        Self {
            _dir: dir,
            config: ConnectionConfig::sqlite(path.to_string_lossy().to_string()),
        }
    }

    pub async fn client(&self) -> Arc<SqliteClient> {
        Arc::new(SqliteClient::connect(&self.config).await.unwrap())
    }
}

/// An assistant over `db` using the mock model.
pub fn assistant(db: Arc<SqliteClient>) -> Assistant {
    assistant_with(db, MockLlmClient::new())
}

pub fn assistant_with(db: Arc<SqliteClient>, llm: MockLlmClient) -> Assistant {
    let provider = Arc::new(SchemaProvider::new(db));
    Assistant::new(Arc::new(llm), provider, AssistantConfig::default())
}

/// Row count of every seeded table, in a fixed order.
pub async fn row_counts(db: &dyn DatabaseClient) -> Vec<i64> {
    let mut counts = Vec::new();
    for table in ["artist", "customers", "orders"] {
        let result = db
            .execute_query(&format!("SELECT COUNT(*) FROM {table}"))
            .await
            .unwrap();
        match &result.rows[0][0] {
            Value::Int(n) => counts.push(*n),
            other => panic!("Expected Int count, got {other:?}"),
        }
    }
    counts
}
