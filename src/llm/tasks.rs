//! Typed model tasks.
//!
//! Each [`LlmTask`] variant carries its inputs and knows how to build its
//! prompt. The reply types below describe what each task must return; a
//! reply that does not fit is rejected by the caller instead of being used.

use serde::Deserialize;

use crate::db::{DatabaseBackend, Schema};
use crate::dml::DmlAction;
use crate::llm::types::{Message, Role};

/// Marker that opens every task's system prompt.
const TASK_PREFIX: &str = "TASK: ";

/// Shared grounding for a prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub schema: &'a Schema,
    pub backend: DatabaseBackend,
    /// Recent conversation, oldest first.
    pub history: &'a [Message],
}

/// A single model invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmTask<'a> {
    /// Categorize the latest message. Reply: [`ClassificationReply`] JSON.
    ClassifyIntent {
        message: &'a str,
        active_flow: Option<DmlAction>,
    },
    /// Write one SELECT answering the question. Reply: SQL text.
    GenerateSelect { question: &'a str },
    /// Pick a target table and fields for a modification. Reply: [`GuidanceReply`] JSON.
    DmlGuidance {
        action: DmlAction,
        description: &'a str,
    },
    /// Describe a query result in prose.
    AnswerFromResult {
        question: &'a str,
        sql: &'a str,
        /// Rendered rows; may be only the first part of the result.
        result: &'a str,
        row_count: usize,
    },
    /// Describe the database as a whole.
    SummarizeDatabase,
    /// Answer a question that does not touch the database.
    GeneralAnswer { question: &'a str },
    /// Ask the user for the missing detail.
    Clarify { message: &'a str },
    /// Offer next steps. Reply: [`SuggestionsReply`] JSON.
    SuggestFollowUps { context: &'a str },
}

impl LlmTask<'_> {
    /// Stable tag written into the system prompt.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ClassifyIntent { .. } => "classify_intent",
            Self::GenerateSelect { .. } => "generate_select",
            Self::DmlGuidance { .. } => "dml_guidance",
            Self::AnswerFromResult { .. } => "answer_from_result",
            Self::SummarizeDatabase => "summarize_database",
            Self::GeneralAnswer { .. } => "general_answer",
            Self::Clarify { .. } => "clarify",
            Self::SuggestFollowUps { .. } => "suggest_follow_ups",
        }
    }

    /// Builds the full message list: system prompt, optional history, task input.
    pub fn build_messages(&self, ctx: &PromptContext<'_>) -> Vec<Message> {
        let system = format!("{TASK_PREFIX}{}\n\n{}", self.tag(), self.instructions(ctx));

        let mut messages = vec![Message::system(system)];
        if self.uses_history() {
            messages.extend(ctx.history.iter().cloned());
        }
        messages.push(Message::user(self.input()));
        messages
    }

    fn uses_history(&self) -> bool {
        matches!(
            self,
            Self::ClassifyIntent { .. }
                | Self::GenerateSelect { .. }
                | Self::GeneralAnswer { .. }
                | Self::Clarify { .. }
        )
    }

    fn input(&self) -> String {
        match self {
            Self::ClassifyIntent { message, .. }
            | Self::GeneralAnswer { question: message }
            | Self::Clarify { message }
            | Self::GenerateSelect { question: message } => message.to_string(),
            Self::DmlGuidance { description, .. } => description.to_string(),
            Self::AnswerFromResult {
                question,
                sql,
                result,
                row_count,
            } => format!(
                "User question: {question}\nGenerated SQL query: {sql}\n\
                 SQL query result ({row_count} rows in total):\n{result}"
            ),
            Self::SummarizeDatabase => "Summarize this database.".to_string(),
            Self::SuggestFollowUps { context } => context.to_string(),
        }
    }

    fn instructions(&self, ctx: &PromptContext<'_>) -> String {
        let dialect = ctx.backend.dialect_name();
        let schema = ctx.schema.format_for_llm();

        match self {
            Self::ClassifyIntent { active_flow, .. } => {
                let flow_note = match active_flow {
                    Some(action) => format!(
                        "A guided request to {} data is in progress. Answers to the \
                         assistant's last question, such as a table name or a condition, keep \
                         the matching category. Only a clear change of topic gets another \
                         category.\n\n",
                        action.verb()
                    ),
                    None => String::new(),
                };
                format!(
                    "You route messages for a database assistant. Classify the user's latest \
                     message into exactly one category:\n\
                     - SELECT_QUERY: a request for information answerable with a SELECT\n\
                     - ADD_DATA: wants to insert new records\n\
                     - UPDATE_DATA: wants to change existing records\n\
                     - DELETE_DATA: wants to remove records\n\
                     - SUMMARIZE_DB: asks what the database is about or what it contains\n\
                     - GENERAL_QA: a general question or greeting not needing this database\n\
                     - CLARIFY: too vague to act on\n\n\
                     {flow_note}\
                     Respond with a JSON object only: \
                     {{\"intent\": \"<CATEGORY>\", \"table\": \"<table name or null>\"}}\n\n\
                     {schema}"
                )
            }
            Self::GenerateSelect { .. } => format!(
                "You write {dialect} SQL for the schema below.\n\n\
                 {schema}\n\
                 Rules:\n\
                 - Return exactly one SELECT statement and nothing else\n\
                 - Never write INSERT, UPDATE, DELETE or DDL\n\
                 - Use JOINs along the foreign keys where needed\n\
                 - Limit results to 100 rows unless the user asks for a number\n\
                 - If the schema cannot answer the question, reply exactly: \
                 Cannot answer based on the schema."
            ),
            Self::DmlGuidance { action, .. } => format!(
                "You help a user {verb} data. Based on their description and the schema, \
                 identify the most likely target table and the columns that matter for this \
                 {verb} operation.\n\n\
                 {schema}\n\
                 Respond with a JSON object only:\n\
                 {{\"target_table\": \"<table, or Unknown if too vague>\", \
                 \"suggested_fields\": [\"column\", ...], \
                 \"guidance_text\": \"<one sentence telling the user what to provide>\", \
                 \"fields_template_text\": \"{template}\", \
                 \"example_text\": \"<a short concrete example>\"}}\n\
                 If the description is too vague, set target_table to Unknown, \
                 suggested_fields to [] and ask which table they mean.",
                verb = action.verb(),
                template = action.template_hint(),
            ),
            Self::AnswerFromResult { .. } => "Give a concise natural-language answer to the \
                 user's question using the SQL result. If the result is empty, say that no \
                 data was found. Only the first rows may be listed; use the stated total \
                 for counts. Do not repeat the SQL."
                .to_string(),
            Self::SummarizeDatabase => format!(
                "{schema}\n\
                 1. Provide a 3-line summary of this database's purpose and content.\n\
                 2. List up to 5-7 main tables with a one-line description each."
            ),
            Self::GeneralAnswer { .. } => "You are a helpful assistant. Answer the question \
                 briefly and plainly. It does not require querying the user's database."
                .to_string(),
            Self::Clarify { .. } => format!(
                "The user's request to a database assistant is ambiguous. Ask one short \
                 question that would let you act on it. Mention a relevant table if one fits.\n\n\
                 Tables: {}",
                ctx.schema.table_names().join(", ")
            ),
            Self::SuggestFollowUps { .. } => format!(
                "Suggest 2 to 4 short follow-up requests the user could make next, phrased \
                 as the user would type them. Respond with a JSON array of strings only.\n\n\
                 Tables: {}",
                ctx.schema.table_names().join(", ")
            ),
        }
    }
}

/// Returns the task tag of a prompt built by [`LlmTask::build_messages`].
pub fn task_tag(messages: &[Message]) -> Option<&str> {
    let system = messages.iter().find(|m| m.role == Role::System)?;
    let first_line = system.content.lines().next()?;
    first_line.strip_prefix(TASK_PREFIX).map(str::trim)
}

/// Reply shape for [`LlmTask::ClassifyIntent`].
///
/// Older label sets (`response_type`, `dml_action`) are accepted too.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClassificationReply {
    #[serde(alias = "response_type", alias = "category")]
    pub intent: String,
    #[serde(default, alias = "dml_action")]
    pub action: Option<String>,
    #[serde(default, alias = "target_table")]
    pub table: Option<String>,
}

/// Reply shape for [`LlmTask::DmlGuidance`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GuidanceReply {
    #[serde(default = "unknown_table")]
    pub target_table: String,
    #[serde(default)]
    pub suggested_fields: Vec<String>,
    #[serde(default)]
    pub guidance_text: String,
    #[serde(default)]
    pub fields_template_text: Option<String>,
    #[serde(default)]
    pub example_text: Option<String>,
}

fn unknown_table() -> String {
    "Unknown".to_string()
}

impl GuidanceReply {
    /// The model's table guess, unless it gave up.
    pub fn table(&self) -> Option<&str> {
        let table = self.target_table.trim().trim_matches('`');
        (!table.is_empty() && !table.eq_ignore_ascii_case("unknown")).then_some(table)
    }
}

/// Reply shape for [`LlmTask::SuggestFollowUps`]: a bare list or `{"suggestions": [...]}`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SuggestionsReply {
    List(Vec<String>),
    Wrapped { suggestions: Vec<String> },
}

impl SuggestionsReply {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::List(items) | Self::Wrapped { suggestions: items } => items,
        }
    }
}
