//! Intent classification and routing.
//!
//! The model picks a category; a few rules around it keep an open guided
//! flow from being derailed and settle SELECT-versus-modification ties.

use tracing::{debug, warn};

use crate::db::Schema;
use crate::dml::engine::{is_affirmative, is_negative};
use crate::dml::{is_assignment_list, DmlAction, DmlFlowState};
use crate::error::{ConverseError, Result};
use crate::llm::{parse_json_reply, ClassificationReply, LlmClient, LlmTask, PromptContext};

const CANCEL_PHRASES: &[&str] = &[
    "cancel",
    "abort",
    "stop",
    "never mind",
    "nevermind",
    "forget it",
    "quit",
];

const MUTATION_VERBS: &[(&str, DmlAction)] = &[
    ("add", DmlAction::Add),
    ("insert", DmlAction::Add),
    ("update", DmlAction::Update),
    ("change", DmlAction::Update),
    ("delete", DmlAction::Delete),
    ("remove", DmlAction::Delete),
];

const QUERY_VERBS: &[&str] = &["show", "list", "find", "get", "select", "count", "display", "which"];

/// Action category for a user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    SelectQuery,
    AddData,
    UpdateData,
    DeleteData,
    SummarizeDb,
    GeneralQa,
    Clarify,
}

impl Intent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SelectQuery => "SELECT_QUERY",
            Self::AddData => "ADD_DATA",
            Self::UpdateData => "UPDATE_DATA",
            Self::DeleteData => "DELETE_DATA",
            Self::SummarizeDb => "SUMMARIZE_DB",
            Self::GeneralQa => "GENERAL_QA",
            Self::Clarify => "CLARIFY",
        }
    }

    /// Parses a category label. `action` qualifies the older
    /// `DML_INTENT_DETECTED` label.
    pub fn from_label(label: &str, action: Option<&str>) -> Option<Self> {
        let intent = match label.trim().to_uppercase().as_str() {
            "SELECT_QUERY" => Self::SelectQuery,
            "ADD_DATA" => Self::AddData,
            "UPDATE_DATA" => Self::UpdateData,
            "DELETE_DATA" => Self::DeleteData,
            "SUMMARIZE_DB" | "DATABASE_OVERVIEW_REQUEST" => Self::SummarizeDb,
            "GENERAL_QA" | "GENERAL_RESPONSE" => Self::GeneralQa,
            "CLARIFY" | "CLARIFICATION_NEEDED_FOR_SELECT" => Self::Clarify,
            "DML_INTENT_DETECTED" => Self::from_action(DmlAction::parse(action?)?),
            _ => return None,
        };
        Some(intent)
    }

    pub fn from_action(action: DmlAction) -> Self {
        match action {
            DmlAction::Add => Self::AddData,
            DmlAction::Update => Self::UpdateData,
            DmlAction::Delete => Self::DeleteData,
        }
    }

    pub fn dml_action(&self) -> Option<DmlAction> {
        match self {
            Self::AddData => Some(DmlAction::Add),
            Self::UpdateData => Some(DmlAction::Update),
            Self::DeleteData => Some(DmlAction::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A classified message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub intent: Intent,
    /// Table the message mentions, if the model named one.
    pub table: Option<String>,
    /// True when classification failed and the intent is the fallback.
    pub degraded: bool,
}

impl Classification {
    pub fn new(intent: Intent) -> Self {
        Self {
            intent,
            table: None,
            degraded: false,
        }
    }
}

/// Where a message should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    /// Feed the message to the open guided flow.
    Continue,
    /// Abandon the open flow.
    Cancel,
    Dispatch(Classification),
}

/// True for explicit abandonment like "cancel" or "never mind".
pub fn is_cancellation(message: &str) -> bool {
    let text = message
        .trim()
        .trim_start_matches('/')
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase();
    CANCEL_PHRASES.iter().any(|phrase| {
        text == *phrase
            || text
                .strip_prefix(phrase)
                .is_some_and(|rest| rest.starts_with(|c: char| c == ' ' || c == ','))
    })
}

/// Answers that can only be meant for the open flow: yes/no, a JSON object,
/// a full statement, or `column=value` pairs over the flow's table.
fn is_flow_answer(schema: &Schema, flow: &DmlFlowState, message: &str) -> bool {
    let text = message.trim();
    let upper = text.to_uppercase();
    is_affirmative(text)
        || is_negative(text)
        || text.starts_with('{')
        || upper.starts_with("INSERT INTO ")
        || upper.starts_with("DELETE FROM ")
        || (upper.starts_with("UPDATE ") && upper.contains(" SET "))
        || flow
            .target_table
            .as_deref()
            .and_then(|name| schema.find_table(name))
            .is_some_and(|table| is_assignment_list(table, text))
}

fn words(message: &str) -> Vec<String> {
    message
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Applies the verb tie-break: with as many mutation cues as query cues, a
/// SELECT verdict yields to the first mutation verb.
fn tie_break(message: &str, intent: Intent) -> Intent {
    if intent != Intent::SelectQuery {
        return intent;
    }

    let words = words(message);
    let mutations: Vec<DmlAction> = words
        .iter()
        .filter_map(|w| {
            MUTATION_VERBS
                .iter()
                .find(|(verb, _)| w == verb)
                .map(|(_, action)| *action)
        })
        .collect();
    let queries = words
        .iter()
        .filter(|w| QUERY_VERBS.contains(&w.as_str()))
        .count();

    match mutations.first() {
        Some(action) if mutations.len() == queries => {
            debug!(action = action.verb(), "Mutation verb wins tie with query verb");
            Intent::from_action(*action)
        }
        _ => intent,
    }
}

/// Model-backed classifier.
pub struct IntentClassifier<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> IntentClassifier<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self { llm }
    }

    /// Asks the model for a category.
    ///
    /// Returns a `Classification` error when the reply is not a known category.
    pub async fn classify(
        &self,
        ctx: &PromptContext<'_>,
        message: &str,
        active_flow: Option<DmlAction>,
    ) -> Result<Classification> {
        let messages = LlmTask::ClassifyIntent {
            message,
            active_flow,
        }
        .build_messages(ctx);

        let reply = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| ConverseError::classification(e.message()))?;

        let parsed: ClassificationReply = parse_json_reply(&reply)
            .map_err(|e| ConverseError::classification(format!("Unreadable reply: {e}")))?;

        let intent = Intent::from_label(&parsed.intent, parsed.action.as_deref()).ok_or_else(|| {
            ConverseError::classification(format!("Unknown category '{}'", parsed.intent))
        })?;

        let table = parsed
            .table
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("null"));

        Ok(Classification {
            intent: tie_break(message, intent),
            table,
            degraded: false,
        })
    }

    /// Decides where a message goes.
    ///
    /// With a flow open, unmistakable answers go straight to it; anything else
    /// is classified, and only a cancellation or a clear change of topic
    /// leaves the flow. A failed classification falls back to continuing the
    /// flow, or to a general answer when there is none.
    pub async fn route(
        &self,
        ctx: &PromptContext<'_>,
        message: &str,
        flow: Option<&DmlFlowState>,
    ) -> Routing {
        if is_cancellation(message) {
            return Routing::Cancel;
        }

        if flow.is_some_and(|flow| is_flow_answer(ctx.schema, flow, message)) {
            return Routing::Continue;
        }
        let active_flow = flow.map(|flow| flow.action);

        let classification = match self.classify(ctx, message, active_flow).await {
            Ok(classification) => classification,
            Err(e) => {
                warn!(error = %e, "Classification failed");
                if active_flow.is_some() {
                    return Routing::Continue;
                }
                return Routing::Dispatch(Classification {
                    intent: Intent::GeneralQa,
                    table: None,
                    degraded: true,
                });
            }
        };
        debug!(intent = %classification.intent, table = ?classification.table, "Classified message");

        match active_flow {
            Some(action)
                if classification.intent == Intent::Clarify
                    || classification.intent.dml_action() == Some(action) =>
            {
                Routing::Continue
            }
            _ => Routing::Dispatch(classification),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseBackend, DatabaseClient, MockDatabaseClient, Schema};
    use crate::llm::MockLlmClient;
    use pretty_assertions::assert_eq;

    async fn schema() -> Schema {
        MockDatabaseClient::new().introspect_schema().await.unwrap()
    }

    /// An open flow past table selection: artist for adds, customers otherwise.
    fn open_flow(action: DmlAction) -> DmlFlowState {
        let mut flow = DmlFlowState::new(action);
        flow.target_table = Some(match action {
            DmlAction::Add => "artist".to_string(),
            DmlAction::Update | DmlAction::Delete => "customers".to_string(),
        });
        flow
    }

    async fn route_with(llm: &MockLlmClient, message: &str, action: Option<DmlAction>) -> Routing {
        let schema = schema().await;
        let ctx = PromptContext {
            schema: &schema,
            backend: DatabaseBackend::Sqlite,
            history: &[],
        };
        let flow = action.map(open_flow);
        IntentClassifier::new(llm)
            .route(&ctx, message, flow.as_ref())
            .await
    }

    fn dispatched(routing: Routing) -> Classification {
        match routing {
            Routing::Dispatch(classification) => classification,
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn test_label_aliases() {
        assert_eq!(Intent::from_label("select_query", None), Some(Intent::SelectQuery));
        assert_eq!(
            Intent::from_label("DATABASE_OVERVIEW_REQUEST", None),
            Some(Intent::SummarizeDb)
        );
        assert_eq!(
            Intent::from_label("DML_INTENT_DETECTED", Some("delete")),
            Some(Intent::DeleteData)
        );
        assert_eq!(Intent::from_label("DML_INTENT_DETECTED", None), None);
        assert_eq!(Intent::from_label("WHATEVER", None), None);
    }

    #[test]
    fn test_cancellation_phrases() {
        assert!(is_cancellation("cancel"));
        assert!(is_cancellation("Never mind."));
        assert!(is_cancellation("stop, I changed my mind"));
        assert!(!is_cancellation("stopwatch sales"));
        assert!(!is_cancellation("show cancelled orders"));
    }

    #[test]
    fn test_tie_break_prefers_mutation_on_equal_cues() {
        assert_eq!(
            tie_break("show and delete duplicates", Intent::SelectQuery),
            Intent::DeleteData
        );
        // More query cues than mutation cues: the model's verdict stands
        assert_eq!(
            tie_break("show which rows I could update, list them", Intent::SelectQuery),
            Intent::SelectQuery
        );
        // Only a SELECT verdict is ever overridden
        assert_eq!(
            tie_break("show and delete duplicates", Intent::GeneralQa),
            Intent::GeneralQa
        );
    }

    #[tokio::test]
    async fn test_routes_fresh_messages() {
        let llm = MockLlmClient::new();

        let c = dispatched(route_with(&llm, "add a new artist named Nova", None).await);
        assert_eq!(c.intent, Intent::AddData);
        assert_eq!(c.table.as_deref(), Some("artist"));

        let c = dispatched(route_with(&llm, "show me the 5 newest orders", None).await);
        assert_eq!(c.intent, Intent::SelectQuery);

        let c = dispatched(route_with(&llm, "what is a foreign key?", None).await);
        assert_eq!(c.intent, Intent::GeneralQa);
    }

    #[tokio::test]
    async fn test_open_flow_keeps_answers() {
        let llm = MockLlmClient::new();
        for answer in [
            "yes",
            "name=Nova",
            r#"{"name": "Nova"}"#,
            "INSERT INTO artist (name) VALUES ('Nova')",
        ] {
            assert_eq!(
                route_with(&llm, answer, Some(DmlAction::Add)).await,
                Routing::Continue,
                "{answer}"
            );
        }
        // None of those needed the model
        assert!(llm.calls().is_empty());

        // A bare table name is classified, and the flow still gets it
        assert_eq!(
            route_with(&llm, "artist", Some(DmlAction::Add)).await,
            Routing::Continue
        );
        assert_eq!(llm.calls(), vec!["classify_intent"]);
    }

    #[tokio::test]
    async fn test_open_flow_classifies_questions_with_conditions() {
        let llm = MockLlmClient::new();

        let routing = route_with(
            &llm,
            "show me customers where id = 2",
            Some(DmlAction::Delete),
        )
        .await;
        assert_eq!(dispatched(routing).intent, Intent::SelectQuery);

        let routing = route_with(&llm, "summarize", Some(DmlAction::Delete)).await;
        assert_eq!(dispatched(routing).intent, Intent::SummarizeDb);

        // Pairs naming unknown columns are not taken as answers without asking
        assert_eq!(
            route_with(&llm, "nickname=Nova", Some(DmlAction::Add)).await,
            Routing::Continue
        );
        assert_eq!(llm.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_open_flow_topic_switch() {
        let llm = MockLlmClient::new();
        let routing = route_with(&llm, "actually, show me all customers", Some(DmlAction::Add)).await;
        let c = dispatched(routing);
        assert_eq!(c.intent, Intent::SelectQuery);

        // Same action as the open flow continues it
        let routing = route_with(&llm, "add it to the artist table please", Some(DmlAction::Add)).await;
        assert_eq!(routing, Routing::Continue);
    }

    #[tokio::test]
    async fn test_cancel_routes_before_model() {
        let llm = MockLlmClient::new();
        assert_eq!(route_with(&llm, "cancel", Some(DmlAction::Delete)).await, Routing::Cancel);
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_classification_failure_degrades() {
        let llm = MockLlmClient::new().with_task_response("classify_intent", "", "not json at all");
        let c = dispatched(route_with(&llm, "show me orders", None).await);
        assert_eq!(c.intent, Intent::GeneralQa);
        assert!(c.degraded);

        assert_eq!(
            route_with(&llm, "what now then", Some(DmlAction::Add)).await,
            Routing::Continue
        );

        let failing = MockLlmClient::failing();
        let c = dispatched(route_with(&failing, "show me orders", None).await);
        assert_eq!(c.intent, Intent::GeneralQa);
    }

    #[tokio::test]
    async fn test_unknown_category_is_classification_error() {
        let llm = MockLlmClient::new()
            .with_task_response("classify_intent", "", r#"{"intent": "BANANA"}"#);
        let schema = schema().await;
        let ctx = PromptContext {
            schema: &schema,
            backend: DatabaseBackend::Sqlite,
            history: &[],
        };
        let err = IntentClassifier::new(&llm)
            .classify(&ctx, "hello", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConverseError::Classification(_)));
    }
}
