//! Postgres integration tests.
//!
//! These tests require a running PostgreSQL database with at least one
//! table. Set DATABASE_URL to run them.

use std::sync::Arc;

use db_converse::config::{AssistantConfig, ConnectionConfig};
use db_converse::db::{DatabaseClient, PostgresClient};
use db_converse::llm::MockLlmClient;
use db_converse::schema_provider::SchemaProvider;
use db_converse::{Assistant, ConversationState};

/// Helper to create a test client.
async fn get_test_client() -> Option<PostgresClient> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let config = ConnectionConfig::from_connection_string(&url).ok()?;
    PostgresClient::connect(&config).await.ok()
}

#[tokio::test]
async fn test_introspect_and_select() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let schema = client.introspect_schema().await.unwrap();
    assert!(!schema.tables.is_empty());

    let result = client
        .execute_query("SELECT 1 as num, 'hello' as greeting")
        .await
        .unwrap();
    assert_eq!(result.column_names(), vec!["num", "greeting"]);
    assert_eq!(result.row_count(), 1);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_writes_are_refused() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = client
        .execute_query("CREATE TABLE converse_should_not_exist (id int)")
        .await;
    assert!(result.is_err());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_summary_over_live_schema() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let provider = Arc::new(SchemaProvider::new(Arc::new(client)));
    let assistant = Assistant::new(
        Arc::new(MockLlmClient::new()),
        provider,
        AssistantConfig::default(),
    );
    let mut state = ConversationState::new();

    let schema = assistant.schema().await.unwrap();
    let reply = assistant.summarize(&mut state).await.unwrap();
    assert!(reply.reply.starts_with("**Database Overview:**"));
    if let Some(first) = schema.tables.first() {
        assert!(reply.reply.contains(&first.name));
    }
}
