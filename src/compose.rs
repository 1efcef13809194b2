//! Response composer.
//!
//! Every turn ends here: the outcome of whichever path ran is rendered as a
//! reply, follow-up suggestions are attached, and the exchange is appended to
//! the conversation history.

use tracing::{debug, warn};

use crate::db::{QueryResult, Schema};
use crate::dml::{FlowStep, SimulatedExecutionResult};
use crate::error::ConverseError;
use crate::llm::{parse_json_reply, LlmClient, LlmTask, PromptContext, SuggestionsReply};
use crate::query::QueryOutcome;
use crate::session::ConversationState;

/// Most suggestions attached to a reply.
pub const MAX_SUGGESTIONS: usize = 4;

/// Rows of a result shown to the model when it describes the answer.
const ANSWER_PROMPT_ROWS: usize = 50;

/// What a turn produced, before rendering.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A SELECT ran.
    Query {
        question: String,
        outcome: QueryOutcome,
    },
    /// A guided modification moved a step.
    Flow(FlowStep),
    Summary,
    General {
        question: String,
    },
    /// The request was too vague to act on.
    Clarify {
        message: String,
    },
    /// A fixed message, such as "nothing to cancel".
    Notice(String),
    /// Something failed inside the turn. The conversation stays usable.
    Failure(ConverseError),
}

/// The reply handed to the front-end.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub reply: String,
    pub suggestions: Vec<String>,
    /// The statement waiting for approval, if a flow is in review.
    pub pending_review: Option<String>,
}

pub struct ResponseComposer<'a> {
    llm: &'a dyn LlmClient,
    preview_rows: usize,
}

impl<'a> ResponseComposer<'a> {
    pub fn new(llm: &'a dyn LlmClient, preview_rows: usize) -> Self {
        Self { llm, preview_rows }
    }

    /// Renders `outcome`, records the exchange and returns the reply.
    ///
    /// `note` is placed above the reply, for things the user should know that
    /// are not part of the outcome (an abandoned request, for one).
    pub async fn respond(
        &self,
        ctx: &PromptContext<'_>,
        state: &mut ConversationState,
        user_message: &str,
        outcome: Outcome,
        note: Option<&str>,
    ) -> TurnReply {
        let mut reply = self.render(ctx, &outcome).await;
        if let Some(note) = note {
            reply = format!("{note}\n\n{reply}");
        }
        let suggestions = self.suggest(ctx, &outcome, &reply).await;

        state.record(user_message, &reply);
        debug!(
            reply_len = reply.len(),
            suggestions = suggestions.len(),
            "Composed reply"
        );

        TurnReply {
            reply,
            suggestions,
            pending_review: state.pending_review().map(str::to_string),
        }
    }

    async fn render(&self, ctx: &PromptContext<'_>, outcome: &Outcome) -> String {
        match outcome {
            Outcome::Query { question, outcome } => self.render_query(ctx, question, outcome).await,
            Outcome::Flow(step) => render_flow_step(step),
            Outcome::Summary => {
                let body = self
                    .ask(ctx, LlmTask::SummarizeDatabase)
                    .await
                    .unwrap_or_else(|| {
                        format!("Tables in this database:\n{}", ctx.schema.format_overview())
                    });
                format!("**Database Overview:**\n\n{body}")
            }
            Outcome::General { question } => self
                .ask(ctx, LlmTask::GeneralAnswer { question })
                .await
                .unwrap_or_else(|| {
                    "I couldn't reach the language model to answer that. Please try again."
                        .to_string()
                }),
            Outcome::Clarify { message } => self
                .ask(ctx, LlmTask::Clarify { message })
                .await
                .unwrap_or_else(|| fallback_clarification(ctx.schema)),
            Outcome::Notice(text) => text.clone(),
            Outcome::Failure(error) => render_failure(error),
        }
    }

    async fn render_query(
        &self,
        ctx: &PromptContext<'_>,
        question: &str,
        outcome: &QueryOutcome,
    ) -> String {
        let result = &outcome.result;
        let table = format_result_table(result, self.preview_rows);

        let answer = self
            .ask(
                ctx,
                LlmTask::AnswerFromResult {
                    question,
                    sql: &outcome.sql,
                    result: &format_result_table(result, ANSWER_PROMPT_ROWS),
                    row_count: result.row_count(),
                },
            )
            .await
            .unwrap_or_else(|| match result.row_count() {
                0 => "The query returned no rows.".to_string(),
                1 => "The query returned 1 row.".to_string(),
                n => format!("The query returned {n} rows."),
            });

        let mut reply = format!("{answer}\n\n```sql\n{}\n```\n\n{table}", outcome.sql);
        if result.row_count() > self.preview_rows {
            reply.push_str(&format!(
                "\n\n(showing the first {} of {} rows)",
                self.preview_rows,
                result.row_count()
            ));
        }
        if let Some(warning) = result.truncation_warning() {
            reply.push_str(&format!("\n\n{warning}"));
        }
        reply
    }

    /// Runs a prose task. `None` when the model is unavailable or answers with nothing.
    async fn ask(&self, ctx: &PromptContext<'_>, task: LlmTask<'_>) -> Option<String> {
        let tag = task.tag();
        match self.llm.complete(&task.build_messages(ctx)).await {
            Ok(reply) => Some(reply.trim().to_string()).filter(|r| !r.is_empty()),
            Err(e) => {
                warn!(task = tag, error = %e, "Model call failed while composing reply");
                None
            }
        }
    }

    async fn suggest(&self, ctx: &PromptContext<'_>, outcome: &Outcome, reply: &str) -> Vec<String> {
        let fallback = fallback_suggestions(outcome, ctx.schema);

        let Some(context) = suggestion_context(outcome, reply) else {
            return fallback;
        };

        let messages = LlmTask::SuggestFollowUps { context: &context }.build_messages(ctx);
        let parsed = match self.llm.complete(&messages).await {
            Ok(text) => parse_json_reply::<SuggestionsReply>(&text),
            Err(e) => Err(e.to_string()),
        };

        match parsed {
            Ok(suggestions) => {
                let cleaned = clean_suggestions(suggestions.into_vec());
                if cleaned.is_empty() {
                    fallback
                } else {
                    cleaned
                }
            }
            Err(e) => {
                debug!(error = %e, "Using fallback suggestions");
                fallback
            }
        }
    }
}

/// Input for the follow-up task. Flow steps and failures use fixed suggestions.
fn suggestion_context(outcome: &Outcome, reply: &str) -> Option<String> {
    match outcome {
        Outcome::Query { question, outcome } => Some(format!(
            "The user asked: {question}\nThe query that ran: {}\nRows returned: {}\n\
             Suggest a related filter, sort or aggregation.",
            outcome.sql,
            outcome.result.row_count()
        )),
        Outcome::Flow(FlowStep::Completed(result)) => Some(format!(
            "A simulated change just finished: {}\nSuggest reviewing the affected table \
             or starting another operation.",
            result.statement
        )),
        Outcome::Summary => Some(format!(
            "The user just read this overview of the database:\n{reply}"
        )),
        Outcome::General { question } => Some(format!(
            "The user asked a general question: {question}\nSuggest ways to explore their database."
        )),
        Outcome::Flow(_) | Outcome::Clarify { .. } | Outcome::Notice(_) | Outcome::Failure(_) => {
            None
        }
    }
}

fn clean_suggestions(raw: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for suggestion in raw {
        let suggestion = suggestion.trim().to_string();
        if suggestion.is_empty()
            || cleaned
                .iter()
                .any(|s| s.eq_ignore_ascii_case(&suggestion))
        {
            continue;
        }
        cleaned.push(suggestion);
        if cleaned.len() == MAX_SUGGESTIONS {
            break;
        }
    }
    cleaned
}

fn fallback_suggestions(outcome: &Outcome, schema: &Schema) -> Vec<String> {
    let first_table = schema.table_names().first().map(|name| name.to_string());
    let explore = match &first_table {
        Some(table) => format!("Show a few rows from {table}"),
        None => "Summarize the database".to_string(),
    };

    let suggestions: Vec<String> = match outcome {
        Outcome::Query { .. } => vec![
            "Add a filter to narrow these results".to_string(),
            "Show a count or average instead".to_string(),
        ],
        Outcome::Flow(FlowStep::Review { .. }) => vec![
            "yes".to_string(),
            "cancel".to_string(),
        ],
        Outcome::Flow(FlowStep::Prompt { .. }) => vec!["cancel".to_string()],
        Outcome::Flow(FlowStep::Completed(result)) => vec![
            simulated_table(result)
                .map(|t| format!("Show the rows in {t}"))
                .unwrap_or(explore),
            "Start another change".to_string(),
        ],
        Outcome::Flow(FlowStep::Cancelled { .. }) => {
            vec![explore, "Summarize the database".to_string()]
        }
        Outcome::Summary => vec![explore, "Count the rows in each table".to_string()],
        Outcome::General { .. } | Outcome::Clarify { .. } | Outcome::Notice(_) => {
            vec!["Summarize the database".to_string(), explore]
        }
        Outcome::Failure(_) => vec![
            "Try rephrasing the question".to_string(),
            "Summarize the database".to_string(),
        ],
    };
    clean_suggestions(suggestions)
}

/// Table named by a simulated statement, read from its text.
fn simulated_table(result: &SimulatedExecutionResult) -> Option<String> {
    let mut words = result.statement.split_whitespace();
    let keyword = words.next()?.to_uppercase();
    let table = match keyword.as_str() {
        "INSERT" | "DELETE" => words.nth(1),
        "UPDATE" => words.next(),
        _ => None,
    }?;
    Some(table.trim_matches(|c| c == '"' || c == '(').to_string())
}

fn render_flow_step(step: &FlowStep) -> String {
    match step {
        FlowStep::Prompt { text, .. } | FlowStep::Review { text, .. } => text.clone(),
        FlowStep::Completed(result) => format!(
            "{}\n\n```sql\n{}\n```",
            result.message, result.statement
        ),
        FlowStep::Cancelled { reason } => format!("Request cancelled. {reason}"),
    }
}

fn render_failure(error: &ConverseError) -> String {
    match error {
        ConverseError::Generation(msg) => {
            format!("I couldn't produce a safe query for that. {msg}. Nothing was run.")
        }
        ConverseError::Execution(msg) => format!(
            "The database rejected the query: {msg}. You can rephrase the question and try again."
        ),
        ConverseError::Validation(msg) => format!("{msg}."),
        ConverseError::Llm(msg) | ConverseError::Classification(msg) => format!(
            "The language model could not handle that request ({msg}). Please try again."
        ),
        other => format!("{}: {}", other.category(), other.message()),
    }
}

fn fallback_clarification(schema: &Schema) -> String {
    let tables = schema.table_names();
    if tables.is_empty() {
        "Could you say a bit more about what you need?".to_string()
    } else {
        format!(
            "Could you say a bit more about what you need? This database has: {}.",
            tables.join(", ")
        )
    }
}

/// Renders rows as a Markdown table, at most `limit` of them.
pub fn format_result_table(result: &QueryResult, limit: usize) -> String {
    let headers = result.column_names();
    if headers.is_empty() {
        return "(no rows)".to_string();
    }

    let rows: Vec<Vec<String>> = result
        .rows
        .iter()
        .take(limit)
        .map(|row| {
            row.iter()
                .map(|value| value.to_display_string().replace('|', "\\|"))
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len().max(3)).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let width = widths.get(i).copied().unwrap_or(0);
                format!("{cell:width$}")
            })
            .collect();
        format!("| {} |", padded.join(" | "))
    };

    let mut output = vec![
        line(headers.clone()),
        line(widths.iter().map(|_| "---").collect()),
    ];
    output.extend(rows.iter().map(|row| line(row.iter().map(String::as_str).collect())));

    if rows.is_empty() {
        output.push("(no rows)".to_string());
    }
    output.join("\n")
}
