//! End-to-end conversations over a real SQLite database.

use db_converse::dml::DmlAction;
use db_converse::llm::MockLlmClient;
use db_converse::ConversationState;
use pretty_assertions::assert_eq;

use super::common::{assistant, assistant_with, row_counts, TestDatabase};

#[tokio::test]
async fn test_add_artist_walkthrough() {
    let test_db = TestDatabase::new().await;
    let db = test_db.client().await;
    let assistant = assistant(db.clone());
    let mut state = ConversationState::new();

    let reply = assistant
        .submit(&mut state, "add a new artist named Nova")
        .await
        .unwrap();
    assert!(reply.reply.contains("add data in the `artist` table"));

    let reply = assistant.submit(&mut state, "yes").await.unwrap();
    assert!(reply.reply.contains("Still needed: name."));

    let reply = assistant.submit(&mut state, "name=Nova").await.unwrap();
    assert_eq!(
        reply.pending_review.as_deref(),
        Some("INSERT INTO artist (name) VALUES ('Nova')")
    );

    let statement = reply.pending_review.unwrap();
    let result = assistant.approve_or_edit(&mut state, &statement).await;
    assert!(result.success);
    assert_eq!(result.would_affect_rows, Some(1));
    assert!(state.flow.is_none());
    assert_eq!(row_counts(db.as_ref()).await, vec![3, 3, 7]);
}

#[tokio::test]
async fn test_delete_requires_filter_before_review() {
    let test_db = TestDatabase::new().await;
    let db = test_db.client().await;
    let assistant = assistant(db.clone());
    let mut state = ConversationState::new();

    assistant
        .submit(&mut state, "delete all customers")
        .await
        .unwrap();
    let reply = assistant.submit(&mut state, "yes").await.unwrap();
    assert!(reply.reply.contains("A filter condition is required"));
    assert_eq!(reply.pending_review, None);

    let reply = assistant.submit(&mut state, "id=2").await.unwrap();
    assert_eq!(
        reply.pending_review.as_deref(),
        Some("DELETE FROM customers WHERE id = 2")
    );

    let reply = assistant.submit(&mut state, "yes").await.unwrap();
    assert!(reply.reply.contains("Successfully (simulated) deleted data."));
    assert!(reply.reply.contains("It would affect 1 row."));
    assert!(state.flow.is_none());
    assert_eq!(row_counts(db.as_ref()).await, vec![3, 3, 7]);
}

#[tokio::test]
async fn test_update_with_values_and_filter() {
    let test_db = TestDatabase::new().await;
    let assistant = assistant(test_db.client().await);
    let mut state = ConversationState::new();

    assistant
        .submit(&mut state, "update the status of orders")
        .await
        .unwrap();
    assert_eq!(state.active_action(), Some(DmlAction::Update));
    assistant.submit(&mut state, "yes").await.unwrap();

    let reply = assistant
        .submit(&mut state, "status=shipped where id=3")
        .await
        .unwrap();
    assert_eq!(
        reply.pending_review.as_deref(),
        Some("UPDATE orders SET status = 'shipped' WHERE id = 3")
    );

    let result = assistant
        .approve_or_edit(&mut state, "UPDATE orders SET status = 'shipped' WHERE id = 3")
        .await;
    assert!(result.success);
    assert_eq!(result.would_affect_rows, Some(1));
}

#[tokio::test]
async fn test_edited_statement_is_simulated() {
    let test_db = TestDatabase::new().await;
    let assistant = assistant(test_db.client().await);
    let mut state = ConversationState::new();

    assistant
        .submit(&mut state, "delete customers where id is 2")
        .await
        .unwrap();
    let reply = assistant.submit(&mut state, "yes").await.unwrap();
    assert_eq!(
        reply.pending_review.as_deref(),
        Some("DELETE FROM customers WHERE id = 2")
    );

    let refused = assistant
        .approve_or_edit(&mut state, "DELETE FROM orders WHERE id = 1")
        .await;
    assert!(!refused.success);
    assert!(state.pending_review().is_some());

    let result = assistant
        .approve_or_edit(&mut state, "DELETE FROM customers WHERE region = 'EU'")
        .await;
    assert!(result.success);
    assert_eq!(result.statement, "DELETE FROM customers WHERE region = 'EU'");
    assert_eq!(result.would_affect_rows, Some(2));
}

#[tokio::test]
async fn test_unclear_answers_cancel_the_flow() {
    let test_db = TestDatabase::new().await;
    let assistant = assistant(test_db.client().await);
    let mut state = ConversationState::new();

    assistant
        .submit(&mut state, "delete all customers")
        .await
        .unwrap();
    assistant.submit(&mut state, "blah blah").await.unwrap();
    assistant.submit(&mut state, "blah blah").await.unwrap();
    assert!(state.flow.is_some());

    let reply = assistant.submit(&mut state, "blah blah").await.unwrap();
    assert!(reply.reply.contains("after 3 unclear answers"));
    assert!(state.flow.is_none());
}

#[tokio::test]
async fn test_newest_orders_question() {
    let test_db = TestDatabase::new().await;
    let assistant = assistant(test_db.client().await);
    let mut state = ConversationState::new();

    let reply = assistant
        .submit(&mut state, "show me the 5 newest orders")
        .await
        .unwrap();

    assert!(reply.reply.starts_with("I found 5 matching rows."));
    assert!(reply
        .reply
        .contains("SELECT * FROM orders ORDER BY id DESC LIMIT 5"));
    assert!(reply.reply.contains("| 7 "));
    assert!((1..=4).contains(&reply.suggestions.len()));
    assert!(reply.suggestions.iter().any(|s| s.contains("orders")));
}

#[tokio::test]
async fn test_general_question_leaves_database_alone() {
    let test_db = TestDatabase::new().await;
    let llm = MockLlmClient::new();
    let assistant = assistant_with(test_db.client().await, llm);
    let mut state = ConversationState::new();

    let reply = assistant
        .submit(&mut state, "what is a foreign key?")
        .await
        .unwrap();

    assert!(reply.reply.starts_with("A foreign key is"));
    assert!(state.flow.is_none());
    assert_eq!(state.history.len(), 2);
}

#[tokio::test]
async fn test_unsafe_generation_is_reported_not_run() {
    let test_db = TestDatabase::new().await;
    let db = test_db.client().await;
    let llm = MockLlmClient::new().with_task_response("generate_select", "", "DROP TABLE orders");
    let assistant = assistant_with(db.clone(), llm);
    let mut state = ConversationState::new();

    let reply = assistant
        .submit(&mut state, "show me the orders")
        .await
        .unwrap();

    assert!(reply.reply.contains("Nothing was run"));
    assert_eq!(row_counts(db.as_ref()).await, vec![3, 3, 7]);
}

#[tokio::test]
async fn test_execution_error_keeps_session_usable() {
    let test_db = TestDatabase::new().await;
    let llm = MockLlmClient::new().with_task_response(
        "generate_select",
        "bogus",
        "SELECT no_such_column FROM orders",
    );
    let assistant = assistant_with(test_db.client().await, llm);
    let mut state = ConversationState::new();

    let reply = assistant
        .submit(&mut state, "show the bogus column of orders")
        .await
        .unwrap();
    assert!(reply.reply.contains("The database rejected the query"));

    let reply = assistant
        .submit(&mut state, "show me the 5 newest orders")
        .await
        .unwrap();
    assert!(reply.reply.starts_with("I found 5 matching rows."));
}

#[tokio::test]
async fn test_summary_lists_tables() {
    let test_db = TestDatabase::new().await;
    let assistant = assistant(test_db.client().await);
    let mut state = ConversationState::new();

    let reply = assistant
        .submit(&mut state, "give me an overview of the database")
        .await
        .unwrap();

    assert!(reply.reply.starts_with("**Database Overview:**"));
    assert!(reply.reply.contains("artist, customers, orders"));
}
