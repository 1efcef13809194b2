//! Stage transitions for a guided modification.
//!
//! | stage            | input                           | next                                   |
//! |------------------|---------------------------------|----------------------------------------|
//! | AwaitingTarget   | yes (table proposed)            | AwaitingDetails                        |
//! | AwaitingTarget   | a table name                    | AwaitingDetails                        |
//! | AwaitingTarget   | anything else                   | AwaitingTarget (retry) or Cancelled    |
//! | AwaitingDetails  | fields, still incomplete        | AwaitingDetails                        |
//! | AwaitingDetails  | fields, complete                | AwaitingReview                         |
//! | AwaitingDetails  | nothing usable                  | AwaitingDetails (retry) or Cancelled   |
//! | AwaitingReview   | approve / edited statement      | Completed (simulated)                  |
//! | AwaitingReview   | more fields                     | AwaitingReview (statement rebuilt)     |
//! | any              | cancel                          | Cancelled                              |
//!
//! UPDATE and DELETE never reach review without a filter.

use tracing::{debug, info, warn};

use crate::db::{DatabaseClient, Schema, Table};
use crate::error::{ConverseError, Result};
use crate::llm::{parse_json_reply, GuidanceReply, LlmClient, LlmTask, Message, PromptContext};

use super::parse::{infer_table, parse_answer};
use super::simulate::{check_statement, simulate, SimulatedExecutionResult};
use super::statement::build_statement;
use super::{DmlAction, DmlFlowState, DmlStage};

const AFFIRMATIVE: &[&str] = &[
    "yes", "y", "yeah", "yep", "ok", "okay", "sure", "correct", "right", "confirm", "approve",
    "approved", "looks good", "go ahead", "do it", "run it", "that's right",
];

const NEGATIVE: &[&str] = &["no", "n", "nope", "wrong", "not that one", "no thanks"];

/// Everything a transition may consult.
pub struct FlowContext<'a> {
    pub schema: &'a Schema,
    pub llm: &'a dyn LlmClient,
    pub db: &'a dyn DatabaseClient,
    pub history: &'a [Message],
    /// Unproductive answers tolerated before the flow is cancelled.
    pub max_retries: u32,
}

/// What a transition produced.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowStep {
    /// The flow stays open and asks the user for something.
    Prompt {
        text: String,
        problem: Option<String>,
    },
    /// A statement is ready for approval.
    Review { statement: String, text: String },
    /// The approved statement was simulated.
    Completed(SimulatedExecutionResult),
    Cancelled { reason: String },
}

fn normalized(text: &str) -> String {
    text.trim()
        .trim_end_matches(|c| c == '.' || c == '!')
        .trim()
        .to_lowercase()
}

/// True for answers like "yes", "ok" or "looks good".
pub fn is_affirmative(text: &str) -> bool {
    let text = normalized(text);
    AFFIRMATIVE.contains(&text.as_str()) || text.starts_with("yes,") || text.starts_with("yes ")
}

/// True for answers like "no" or "nope".
pub fn is_negative(text: &str) -> bool {
    let text = normalized(text);
    NEGATIVE.contains(&text.as_str()) || text.starts_with("no,") || text.starts_with("no ")
}

/// Opens a flow for `action` from the user's first description.
pub async fn start(
    ctx: &FlowContext<'_>,
    action: DmlAction,
    description: &str,
    table_hint: Option<&str>,
) -> (DmlFlowState, FlowStep) {
    let mut flow = DmlFlowState::new(action);
    info!(action = action.verb(), "Starting guided modification");

    let mut table = table_hint
        .and_then(|name| ctx.schema.find_table(name))
        .or_else(|| infer_table(ctx.schema, description));

    if table.is_none() {
        flow.guidance = request_guidance(ctx, action, description).await;
        table = flow
            .guidance
            .as_ref()
            .and_then(|g| g.table())
            .and_then(|name| ctx.schema.find_table(name));
    }

    let Some(table) = table else {
        let step = FlowStep::Prompt {
            text: ask_for_table(ctx.schema, &flow),
            problem: None,
        };
        return (flow, step);
    };

    flow.target_table = Some(table.name.clone());
    let parsed = parse_answer(table, action, description, &flow.collected_fields);
    flow.collected_fields.merge(parsed);

    let text = format!(
        "I'll help you {} data in the `{}` table. Is that the right table? \
         Reply yes, or name a different table.",
        action.verb(),
        table.name
    );
    (flow, FlowStep::Prompt { text, problem: None })
}

/// Feeds one user answer to an open flow.
pub async fn advance(ctx: &FlowContext<'_>, flow: &mut DmlFlowState, message: &str) -> FlowStep {
    debug!(stage = flow.stage.as_str(), "Advancing guided modification");
    match flow.stage {
        DmlStage::AwaitingTarget => target_step(ctx, flow, message),
        DmlStage::AwaitingDetails => details_step(ctx, flow, message),
        DmlStage::AwaitingReview => review_step(ctx, flow, message).await,
        DmlStage::Completed | DmlStage::Cancelled => FlowStep::Prompt {
            text: "This request is already finished.".to_string(),
            problem: None,
        },
    }
}

/// Approves the pending statement, or an edited replacement, and simulates it.
///
/// On success the flow is `Completed`. A rejected edit or a failed simulation
/// leaves it in review so the user can try again.
pub async fn approve_or_edit(
    ctx: &FlowContext<'_>,
    flow: &mut DmlFlowState,
    edited: Option<&str>,
) -> Result<SimulatedExecutionResult> {
    if flow.stage != DmlStage::AwaitingReview {
        return Err(ConverseError::validation(
            "There is no statement waiting for review",
        ));
    }
    let generated = flow
        .generated_statement
        .clone()
        .ok_or_else(|| ConverseError::internal("Review stage without a statement"))?;

    let statement = match edited {
        Some(sql) if squash(sql) != squash(&generated) => {
            let sql = sql.trim().trim_end_matches(';').trim_end().to_string();
            let inspection = check_statement(ctx.db, flow.action, &sql)?;
            if let Some(target) = &flow.target_table {
                if !same_table(&inspection.table, target) {
                    return Err(ConverseError::validation(format!(
                        "The edited statement targets {} but this request is for `{target}`",
                        inspection.table
                    )));
                }
            }
            info!(action = flow.action.verb(), "Statement edited by user");
            flow.user_edited = true;
            flow.generated_statement = Some(sql.clone());
            sql
        }
        _ => generated,
    };

    let result = simulate(ctx.db, flow.action, &statement).await;
    if result.success {
        transition(flow, DmlStage::Completed);
    }
    Ok(result)
}

/// Ends the flow without producing a statement.
pub fn cancel(flow: &mut DmlFlowState, reason: impl Into<String>) -> FlowStep {
    transition(flow, DmlStage::Cancelled);
    FlowStep::Cancelled {
        reason: reason.into(),
    }
}

fn transition(flow: &mut DmlFlowState, to: DmlStage) {
    debug!(from = flow.stage.as_str(), to = to.as_str(), "Flow transition");
    flow.stage = to;
}

fn target_step(ctx: &FlowContext<'_>, flow: &mut DmlFlowState, message: &str) -> FlowStep {
    if let Some(table) = infer_table(ctx.schema, message) {
        flow.target_table = Some(table.name.clone());
        flow.target_confirmed = true;
        let parsed = parse_answer(table, flow.action, message, &flow.collected_fields);
        let assumed = parsed.assumed_filter.clone();
        flow.collected_fields.merge(parsed);
        return note_assumed_filter(enter_details(ctx, flow, table), &assumed);
    }

    if flow.target_table.is_some() && is_affirmative(message) {
        flow.target_confirmed = true;
        if let Some(table) = flow.target_table.as_deref().and_then(|t| ctx.schema.find_table(t)) {
            return enter_details(ctx, flow, table);
        }
    }

    if is_negative(message) {
        flow.target_table = None;
        return FlowStep::Prompt {
            text: ask_for_table(ctx.schema, flow),
            problem: None,
        };
    }

    let problem = format!(
        "I couldn't match \"{}\" to a table in this database.",
        message.trim()
    );
    unproductive(ctx, flow, problem, ask_for_table(ctx.schema, flow))
}

fn enter_details(ctx: &FlowContext<'_>, flow: &mut DmlFlowState, table: &Table) -> FlowStep {
    transition(flow, DmlStage::AwaitingDetails);
    flow.retries = 0;
    try_complete(ctx, flow, table)
}

fn details_step(ctx: &FlowContext<'_>, flow: &mut DmlFlowState, message: &str) -> FlowStep {
    let Some(table) = target(ctx.schema, flow) else {
        return cancel(flow, "The target table is no longer in the schema.");
    };

    let parsed = parse_answer(table, flow.action, message, &flow.collected_fields);

    if parsed.is_empty() {
        let problem = if parsed.unknown.is_empty() {
            "I couldn't find any `column=value` pairs in that answer.".to_string()
        } else {
            format!(
                "`{}` has no column named {}.",
                table.name,
                parsed.unknown.join(", ")
            )
        };
        return unproductive(ctx, flow, problem, details_prompt(flow, table));
    }

    flow.retries = 0;
    let assumed = parsed.assumed_filter.clone();
    flow.collected_fields.merge(parsed);
    note_assumed_filter(try_complete(ctx, flow, table), &assumed)
}

/// Moves to review when every required field is present; otherwise asks for the rest.
fn try_complete(ctx: &FlowContext<'_>, flow: &mut DmlFlowState, table: &Table) -> FlowStep {
    if let Some(problem) = missing_fields(flow, table) {
        return FlowStep::Prompt {
            text: format!("{problem}\n\n{}", details_prompt(flow, table)),
            problem: Some(problem),
        };
    }

    match build_statement(flow.action, table, &flow.collected_fields) {
        Ok(statement) => {
            flow.generated_statement = Some(statement.clone());
            flow.user_edited = false;
            transition(flow, DmlStage::AwaitingReview);
            info!(action = flow.action.verb(), table = %table.name, "Statement ready for review");
            FlowStep::Review {
                text: review_prompt(&statement),
                statement,
            }
        }
        Err(e) => unproductive(ctx, flow, e.message().to_string(), details_prompt(flow, table)),
    }
}

/// Names what is still missing, if anything.
fn missing_fields(flow: &DmlFlowState, table: &Table) -> Option<String> {
    let fields = &flow.collected_fields;
    match flow.action {
        DmlAction::Add => {
            let missing: Vec<_> = table
                .required_insert_columns()
                .into_iter()
                .filter(|c| !fields.values.contains_key(&c.name))
                .map(|c| c.name.as_str())
                .collect();
            if !missing.is_empty() {
                Some(format!("Still needed: {}.", missing.join(", ")))
            } else if fields.values.is_empty() {
                Some("No values yet.".to_string())
            } else {
                None
            }
        }
        DmlAction::Update if fields.values.is_empty() => {
            Some("Tell me which columns to change.".to_string())
        }
        DmlAction::Update | DmlAction::Delete if !fields.has_filter() => Some(format!(
            "A filter condition is required before I can {} rows; unconditional changes are not generated.",
            flow.action.verb()
        )),
        _ => None,
    }
}

async fn review_step(ctx: &FlowContext<'_>, flow: &mut DmlFlowState, message: &str) -> FlowStep {
    let trimmed = message.trim();
    let edited = looks_like_statement(trimmed).then_some(trimmed);

    if edited.is_some() || is_affirmative(trimmed) {
        return match approve_or_edit(ctx, flow, edited).await {
            Ok(result) if result.success => FlowStep::Completed(result),
            Ok(result) => FlowStep::Prompt {
                text: format!(
                    "{}\n\nEdit the statement, or say cancel.",
                    result.message
                ),
                problem: Some(result.message),
            },
            Err(e) => {
                let statement = flow.generated_statement.as_deref().unwrap_or_default();
                FlowStep::Prompt {
                    text: format!("{}\n\n{}", e.message(), review_prompt(statement)),
                    problem: Some(e.message().to_string()),
                }
            }
        };
    }

    let Some(table) = target(ctx.schema, flow) else {
        return cancel(flow, "The target table is no longer in the schema.");
    };

    let parsed = parse_answer(table, flow.action, trimmed, &flow.collected_fields);
    if !parsed.is_empty() {
        flow.retries = 0;
        let assumed = parsed.assumed_filter.clone();
        flow.collected_fields.merge(parsed);
        return note_assumed_filter(try_complete(ctx, flow, table), &assumed);
    }

    if is_negative(trimmed) {
        return FlowStep::Prompt {
            text: "Tell me what to change (for example `column=value`), send an edited \
                   statement, or say cancel."
                .to_string(),
            problem: None,
        };
    }

    let statement = flow.generated_statement.clone().unwrap_or_default();
    unproductive(
        ctx,
        flow,
        "I didn't understand that answer.".to_string(),
        review_prompt(&statement),
    )
}

/// Tells the user which pairs were read as the row filter.
fn note_assumed_filter(step: FlowStep, assumed: &[String]) -> FlowStep {
    if assumed.is_empty() {
        return step;
    }
    let pairs: Vec<_> = assumed.iter().map(|pair| format!("`{pair}`")).collect();
    let note = format!(
        "Treating {} as the row filter. Start an answer with `set` to change a value instead.",
        pairs.join(", ")
    );
    match step {
        FlowStep::Prompt { text, problem } => FlowStep::Prompt {
            text: format!("{note}\n\n{text}"),
            problem,
        },
        FlowStep::Review { text, statement } => FlowStep::Review {
            text: format!("{note}\n\n{text}"),
            statement,
        },
        other => other,
    }
}

/// Counts an answer that did not help; cancels once the bound is reached.
fn unproductive(
    ctx: &FlowContext<'_>,
    flow: &mut DmlFlowState,
    problem: String,
    prompt: String,
) -> FlowStep {
    flow.retries += 1;
    warn!(
        stage = flow.stage.as_str(),
        retries = flow.retries,
        max = ctx.max_retries,
        "Unusable answer in guided modification"
    );

    if flow.retries >= ctx.max_retries {
        return cancel(
            flow,
            format!(
                "{problem} I've cancelled this {} request after {} unclear answers; \
                 start again whenever you're ready.",
                flow.action.verb(),
                flow.retries
            ),
        );
    }

    FlowStep::Prompt {
        text: format!("{problem}\n\n{prompt}"),
        problem: Some(problem),
    }
}

fn target<'s>(schema: &'s Schema, flow: &DmlFlowState) -> Option<&'s Table> {
    flow.target_table
        .as_deref()
        .and_then(|name| schema.find_table(name))
}

async fn request_guidance(
    ctx: &FlowContext<'_>,
    action: DmlAction,
    description: &str,
) -> Option<GuidanceReply> {
    let prompt_ctx = PromptContext {
        schema: ctx.schema,
        backend: ctx.db.backend(),
        history: ctx.history,
    };
    let messages = LlmTask::DmlGuidance {
        action,
        description,
    }
    .build_messages(&prompt_ctx);

    match ctx.llm.complete(&messages).await {
        Ok(reply) => match parse_json_reply::<GuidanceReply>(&reply) {
            Ok(guidance) => Some(guidance),
            Err(e) => {
                warn!(error = %e, "Guidance reply was not valid JSON");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "Guidance request failed");
            None
        }
    }
}

fn ask_for_table(schema: &Schema, flow: &DmlFlowState) -> String {
    let lead = flow
        .guidance
        .as_ref()
        .map(|g| g.guidance_text.trim())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Which table do you want to {} data in?", flow.action.verb()));

    format!(
        "{lead}\nAvailable tables: {}.",
        schema.table_names().join(", ")
    )
}

fn details_prompt(flow: &DmlFlowState, table: &Table) -> String {
    let fields = &flow.collected_fields;
    let mut text = match flow.action {
        DmlAction::Add => {
            let required: Vec<_> = table
                .required_insert_columns()
                .into_iter()
                .map(|c| c.name.as_str())
                .collect();
            let optional: Vec<_> = table
                .writable_columns()
                .into_iter()
                .map(|c| c.name.as_str())
                .filter(|name| !required.contains(name))
                .collect();

            let mut text = format!("Please provide values for the new `{}` row.", table.name);
            if !required.is_empty() {
                text.push_str(&format!("\nRequired: {}.", required.join(", ")));
            }
            if !optional.is_empty() {
                text.push_str(&format!("\nOptional: {}.", optional.join(", ")));
            }
            text
        }
        DmlAction::Update if fields.values.is_empty() => format!(
            "Which columns of `{}` should change, and for which rows?",
            table.name
        ),
        DmlAction::Update => format!("Which rows of `{}` should be updated?", table.name),
        DmlAction::Delete => format!("Which rows of `{}` should be deleted?", table.name),
    };

    let template = flow
        .guidance
        .as_ref()
        .and_then(|g| g.fields_template_text.clone())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| flow.action.template_hint().to_string());
    text.push_str(&format!("\nFormat: `{template}`"));

    if let Some(example) = flow.guidance.as_ref().and_then(|g| g.example_text.as_deref()) {
        text.push_str(&format!("\nExample: `{example}`"));
    }

    if !fields.is_empty() {
        let collected: Vec<_> = fields
            .values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .chain(fields.filter.iter().map(|(k, v)| format!("where {k}={v}")))
            .collect();
        text.push_str(&format!("\nSo far: {}", collected.join(", ")));
    }
    text
}

fn review_prompt(statement: &str) -> String {
    format!(
        "Here is the statement I generated:\n\n```sql\n{statement}\n```\n\n\
         Reply yes to run a simulated execution (nothing is written), \
         send an edited statement, or say cancel."
    )
}

fn looks_like_statement(text: &str) -> bool {
    let upper = text.trim_start().to_uppercase();
    ["INSERT ", "UPDATE ", "DELETE "]
        .iter()
        .any(|kw| upper.starts_with(kw))
}

fn squash(sql: &str) -> String {
    sql.trim()
        .trim_end_matches(';')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn same_table(written: &str, target: &str) -> bool {
    let strip = |name: &str| name.trim_matches(|c| c == '"' || c == '`').to_lowercase();
    strip(written) == strip(target)
}
