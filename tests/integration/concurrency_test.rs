//! Independent sessions sharing one assistant.

use futures::future::join_all;
use std::sync::Arc;

use db_converse::dml::DmlAction;
use db_converse::schema_provider::SchemaProvider;
use db_converse::ConversationState;

use super::common::{assistant, TestDatabase};

#[tokio::test]
async fn test_sessions_do_not_share_flows() {
    let test_db = TestDatabase::new().await;
    let assistant = assistant(test_db.client().await);

    let scripts: Vec<Vec<&str>> = vec![
        vec!["add a new artist named Nova", "yes", "name=Nova"],
        vec!["delete all customers", "yes"],
        vec!["show me the 5 newest orders"],
        vec!["what is a foreign key?"],
    ];

    let states = join_all(scripts.iter().map(|script| {
        let assistant = &assistant;
        async move {
            let mut state = ConversationState::new();
            for message in script {
                assistant.submit(&mut state, message).await.unwrap();
            }
            state
        }
    }))
    .await;

    assert_eq!(
        states[0].pending_review(),
        Some("INSERT INTO artist (name) VALUES ('Nova')")
    );
    assert_eq!(states[1].active_action(), Some(DmlAction::Delete));
    assert_eq!(states[1].pending_review(), None);
    assert!(states[2].flow.is_none());
    assert!(states[3].flow.is_none());

    for (state, script) in states.iter().zip(&scripts) {
        assert_eq!(state.history.len(), script.len() * 2);
    }
}

#[tokio::test]
async fn test_refresh_while_reading() {
    let test_db = TestDatabase::new().await;
    let provider = Arc::new(SchemaProvider::new(test_db.client().await));

    let readers = (0..8).map(|i| {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move {
            if i % 4 == 0 {
                provider.refresh().await.unwrap()
            } else {
                provider.snapshot().await.unwrap()
            }
        })
    });

    for schema in join_all(readers).await {
        let schema = schema.unwrap();
        assert_eq!(schema.table_names(), vec!["artist", "customers", "orders"]);
    }
}
