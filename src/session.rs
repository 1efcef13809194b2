//! Conversation state and the turn processor.
//!
//! A [`ConversationState`] belongs to one session and is passed into every
//! call; the [`Assistant`] holds only what sessions share (the model client,
//! the schema cache and configuration), so one assistant can serve many
//! sessions at once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::compose::{Outcome, ResponseComposer, TurnReply};
use crate::config::AssistantConfig;
use crate::db::{DatabaseClient, Schema};
use crate::dml::engine;
use crate::dml::{DmlAction, DmlFlowState, FlowContext, SimulatedExecutionResult};
use crate::error::{ConverseError, Result};
use crate::intent::{Classification, Intent, IntentClassifier, Routing};
use crate::llm::{LlmClient, Message, PromptContext, Role};
use crate::query::QueryExecutor;
use crate::schema_provider::SchemaProvider;

/// One message in the conversation. Never changed once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Everything one session remembers between turns.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    /// Append-only message history.
    pub history: Vec<ConversationTurn>,
    /// The guided modification in progress, if any.
    pub flow: Option<DmlFlowState>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a user message and the reply to it.
    pub fn record(&mut self, user_message: &str, reply: &str) {
        self.history.push(ConversationTurn::new(Role::User, user_message));
        self.history.push(ConversationTurn::new(Role::Assistant, reply));
    }

    /// The statement waiting for approval, if any.
    pub fn pending_review(&self) -> Option<&str> {
        self.flow.as_ref().and_then(DmlFlowState::pending_review)
    }

    /// Action of the open flow.
    pub fn active_action(&self) -> Option<DmlAction> {
        self.flow.as_ref().map(|flow| flow.action)
    }

    /// The last `exchanges` user/assistant pairs as model messages.
    pub fn context_messages(&self, exchanges: usize) -> Vec<Message> {
        let skip = self.history.len().saturating_sub(exchanges * 2);
        self.history[skip..]
            .iter()
            .map(|turn| Message::new(turn.role, turn.content.clone()))
            .collect()
    }

    /// Forgets the history and any open flow.
    pub fn clear(&mut self) {
        self.history.clear();
        self.flow = None;
    }

    /// Drops a finished flow.
    fn settle_flow(&mut self) {
        if self.flow.as_ref().is_some_and(|flow| flow.stage.is_terminal()) {
            self.flow = None;
        }
    }
}

/// Processes turns for any number of sessions.
pub struct Assistant {
    llm: Arc<dyn LlmClient>,
    schema: Arc<SchemaProvider>,
    config: AssistantConfig,
}

impl Assistant {
    pub fn new(llm: Arc<dyn LlmClient>, schema: Arc<SchemaProvider>, config: AssistantConfig) -> Self {
        Self {
            llm,
            schema,
            config,
        }
    }

    /// The database behind the schema provider.
    pub fn database(&self) -> &Arc<dyn DatabaseClient> {
        self.schema.database()
    }

    /// Loads the schema. Call once at session start so connection problems
    /// surface before the first question.
    pub async fn schema(&self) -> Result<Arc<Schema>> {
        self.schema.snapshot().await
    }

    /// Re-introspects the database.
    pub async fn refresh_schema(&self) -> Result<Arc<Schema>> {
        self.schema.refresh().await
    }

    /// Handles one user message.
    ///
    /// Only a schema load failure is returned as an error; everything else is
    /// reported in the reply and leaves the session usable.
    pub async fn submit(&self, state: &mut ConversationState, message: &str) -> Result<TurnReply> {
        let start = Instant::now();
        let schema = self.schema.snapshot().await?;
        let history = state.context_messages(self.config.history_limit);
        let ctx = PromptContext {
            schema: &schema,
            backend: self.database().backend(),
            history: &history,
        };

        let routing = IntentClassifier::new(self.llm.as_ref())
            .route(&ctx, message, state.flow.as_ref())
            .await;

        let (outcome, note) = match routing {
            Routing::Cancel => (self.cancel_flow(state), None),
            Routing::Continue => match state.flow.as_mut() {
                Some(flow) => {
                    let step = engine::advance(&self.flow_context(&ctx), flow, message).await;
                    (Outcome::Flow(step), None)
                }
                None => (
                    Outcome::General {
                        question: message.to_string(),
                    },
                    None,
                ),
            },
            Routing::Dispatch(classification) => {
                let note = self.abandon_flow(state);
                let outcome = self.dispatch(&ctx, state, message, classification).await;
                (outcome, note)
            }
        };
        state.settle_flow();

        let reply = self
            .composer()
            .respond(&ctx, state, message, outcome, note.as_deref())
            .await;

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            pending_review = reply.pending_review.is_some(),
            "Turn complete"
        );
        Ok(reply)
    }

    /// Approves the pending statement, or an edited version of it, and
    /// simulates it. Nothing is written to the database.
    pub async fn approve_or_edit(
        &self,
        state: &mut ConversationState,
        statement: &str,
    ) -> SimulatedExecutionResult {
        let schema = match self.schema.snapshot().await {
            Ok(schema) => schema,
            Err(e) => return SimulatedExecutionResult::failed(statement, &e),
        };
        let Some(flow) = state.flow.as_mut() else {
            return SimulatedExecutionResult::failed(
                statement,
                &ConverseError::validation("There is no statement waiting for review"),
            );
        };

        let ctx = PromptContext {
            schema: &schema,
            backend: self.database().backend(),
            history: &[],
        };
        let edited = Some(statement.trim()).filter(|s| !s.is_empty());

        let result = match engine::approve_or_edit(&self.flow_context(&ctx), flow, edited).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Statement not accepted");
                SimulatedExecutionResult::failed(edited.unwrap_or_default(), &e)
            }
        };

        state.settle_flow();
        let approved = format!("Approve:\n{}", result.statement);
        state.record(&approved, &result.message);
        result
    }

    /// Describes the database.
    pub async fn summarize(&self, state: &mut ConversationState) -> Result<TurnReply> {
        let schema = self.schema.snapshot().await?;
        let ctx = PromptContext {
            schema: &schema,
            backend: self.database().backend(),
            history: &[],
        };
        Ok(self
            .composer()
            .respond(&ctx, state, "Summarize the database", Outcome::Summary, None)
            .await)
    }

    /// Starts a guided modification directly, without classifying.
    ///
    /// An open flow is cancelled first.
    pub async fn start_guided(
        &self,
        state: &mut ConversationState,
        action: DmlAction,
        description: &str,
    ) -> Result<TurnReply> {
        let schema = self.schema.snapshot().await?;
        let history = state.context_messages(self.config.history_limit);
        let ctx = PromptContext {
            schema: &schema,
            backend: self.database().backend(),
            history: &history,
        };

        let note = self.abandon_flow(state);
        let (flow, step) =
            engine::start(&self.flow_context(&ctx), action, description, None).await;
        state.flow = Some(flow);
        state.settle_flow();

        let message = if description.trim().is_empty() {
            format!("I want to {} data", action.verb())
        } else {
            description.to_string()
        };
        Ok(self
            .composer()
            .respond(&ctx, state, &message, Outcome::Flow(step), note.as_deref())
            .await)
    }

    async fn dispatch(
        &self,
        ctx: &PromptContext<'_>,
        state: &mut ConversationState,
        message: &str,
        classification: Classification,
    ) -> Outcome {
        info!(
            intent = %classification.intent,
            degraded = classification.degraded,
            "Dispatching message"
        );

        match classification.intent {
            Intent::SelectQuery => {
                let executor = QueryExecutor::new(self.llm.as_ref(), self.database().as_ref());
                match executor.answer(ctx, message).await {
                    Ok(outcome) => Outcome::Query {
                        question: message.to_string(),
                        outcome,
                    },
                    Err(e) => {
                        warn!(error = %e, "Query failed");
                        Outcome::Failure(e)
                    }
                }
            }
            Intent::AddData | Intent::UpdateData | Intent::DeleteData => {
                let Some(action) = classification.intent.dml_action() else {
                    return Outcome::Failure(ConverseError::internal(
                        "Modification intent without an action",
                    ));
                };
                let (flow, step) = engine::start(
                    &self.flow_context(ctx),
                    action,
                    message,
                    classification.table.as_deref(),
                )
                .await;
                state.flow = Some(flow);
                Outcome::Flow(step)
            }
            Intent::SummarizeDb => Outcome::Summary,
            Intent::GeneralQa => Outcome::General {
                question: message.to_string(),
            },
            Intent::Clarify => Outcome::Clarify {
                message: message.to_string(),
            },
        }
    }

    fn cancel_flow(&self, state: &mut ConversationState) -> Outcome {
        match state.flow.as_mut() {
            Some(flow) => Outcome::Flow(engine::cancel(flow, "Nothing was changed.")),
            None => Outcome::Notice("There is no request in progress to cancel.".to_string()),
        }
    }

    /// Cancels an open flow when the user moves on, returning a note saying so.
    fn abandon_flow(&self, state: &mut ConversationState) -> Option<String> {
        let mut flow = state.flow.take()?;
        info!(
            action = flow.action.verb(),
            stage = flow.stage.as_str(),
            "Abandoning guided modification"
        );
        engine::cancel(&mut flow, "topic changed");
        Some(format!(
            "(I've cancelled the unfinished request to {} data.)",
            flow.action.verb()
        ))
    }

    fn flow_context<'c>(&'c self, ctx: &PromptContext<'c>) -> FlowContext<'c> {
        FlowContext {
            schema: ctx.schema,
            llm: self.llm.as_ref(),
            db: self.database().as_ref(),
            history: ctx.history,
            max_retries: self.config.max_guidance_retries,
        }
    }

    fn composer(&self) -> ResponseComposer<'_> {
        ResponseComposer::new(self.llm.as_ref(), self.config.preview_rows)
    }
}
