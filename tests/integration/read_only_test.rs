//! Simulated execution never changes table contents.

use db_converse::db::DatabaseClient;
use db_converse::dml::DmlAction;
use db_converse::ConversationState;
use pretty_assertions::assert_eq;

use super::common::{assistant, row_counts, TestDatabase};

#[tokio::test]
async fn test_row_counts_unchanged_after_every_flow() {
    let test_db = TestDatabase::new().await;
    let db = test_db.client().await;
    let before = row_counts(db.as_ref()).await;
    let assistant = assistant(db.clone());

    let conversations: &[&[&str]] = &[
        &["add a new artist named Nova", "yes", "name=Nova", "yes"],
        &["delete all customers", "yes", "region=EU", "yes"],
        &["update the status of orders", "yes", "status=lost where status=pending", "yes"],
        &["delete all orders", "cancel"],
    ];

    for conversation in conversations {
        let mut state = ConversationState::new();
        for message in *conversation {
            assistant.submit(&mut state, message).await.unwrap();
        }
        assert!(state.flow.is_none(), "flow left open after {conversation:?}");
    }

    assert_eq!(row_counts(db.as_ref()).await, before);
}

#[tokio::test]
async fn test_edits_cannot_smuggle_other_statements() {
    let test_db = TestDatabase::new().await;
    let db = test_db.client().await;
    let before = row_counts(db.as_ref()).await;
    let assistant = assistant(db.clone());
    let mut state = ConversationState::new();

    assistant
        .start_guided(&mut state, DmlAction::Delete, "remove customers where id is 1")
        .await
        .unwrap();
    assistant.submit(&mut state, "yes").await.unwrap();
    assert!(state.pending_review().is_some());

    for edit in [
        "DELETE FROM customers",
        "DROP TABLE customers",
        "DELETE FROM customers WHERE id = 1; DROP TABLE orders",
        "UPDATE customers SET name = 'x' WHERE id = 1",
    ] {
        let result = assistant.approve_or_edit(&mut state, edit).await;
        assert!(!result.success, "{edit}");
    }

    assert!(state.pending_review().is_some());
    assert_eq!(row_counts(db.as_ref()).await, before);
}

#[tokio::test]
async fn test_database_client_refuses_writes() {
    let test_db = TestDatabase::new().await;
    let db = test_db.client().await;

    let result = db.execute_query("DELETE FROM customers WHERE id = 1").await;
    assert!(result.is_err());
    assert_eq!(row_counts(db.as_ref()).await, vec![3, 3, 7]);
}
