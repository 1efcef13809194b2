//! Mock LLM client for testing and offline demos.
//!
//! Recognizes the task from the prompt's `TASK:` line and answers with a
//! deterministic reply in the shape that task expects.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::{ConverseError, Result};
use crate::llm::tasks::task_tag;
use crate::llm::types::{last_content, Message, Role};
use crate::llm::LlmClient;

/// Words that mark a request for data.
const QUERY_WORDS: &[&str] = &[
    "show", "list", "count", "top", "find", "get", "display", "which", "newest", "latest",
    "oldest", "total", "average", "many",
];

/// Mock LLM client that returns canned responses per task.
#[derive(Debug, Default)]
pub struct MockLlmClient {
    /// Custom response mappings (task tag, pattern, response).
    custom_responses: Vec<(Option<String>, String, String)>,
    /// Every call fails with an LLM error.
    failing: bool,
    /// Task tags seen, in call order.
    calls: Mutex<Vec<String>>,
}

impl MockLlmClient {
    /// Creates a new mock client with default responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// A client whose every call fails, as an unreachable provider would.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Adds a response used for any task when the user input contains `pattern`.
    pub fn with_response(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.custom_responses
            .push((None, pattern.into(), response.into()));
        self
    }

    /// Adds a response used for one task when the user input contains `pattern`.
    ///
    /// An empty pattern matches every input for that task.
    pub fn with_task_response(
        mut self,
        task: impl Into<String>,
        pattern: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        self.custom_responses
            .push((Some(task.into()), pattern.into(), response.into()));
        self
    }

    /// Task tags of the calls made so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn custom_response(&self, task: &str, input: &str) -> Option<String> {
        let input_lower = input.to_lowercase();
        self.custom_responses
            .iter()
            .find(|(tag, pattern, _)| {
                tag.as_deref().map_or(true, |t| t == task)
                    && input_lower.contains(&pattern.to_lowercase())
            })
            .map(|(_, _, response)| response.clone())
    }

    fn default_response(task: &str, system: &str, input: &str) -> String {
        let tables = prompt_tables(system);
        let words = words(input);
        let table = mentioned_table(&tables, &words);

        match task {
            "classify_intent" => classify(&words, table.map(|t| t.name.as_str())),
            "generate_select" => match table {
                Some(table) => select_for(table, &words),
                None => "Cannot answer based on the schema.".to_string(),
            },
            "dml_guidance" => guidance_for(table),
            "answer_from_result" => {
                let listed = input
                    .lines()
                    .filter(|line| line.starts_with('|'))
                    .count()
                    .saturating_sub(2);
                let rows = input
                    .split_once("SQL query result (")
                    .and_then(|(_, rest)| rest.split_once(" rows in total"))
                    .and_then(|(total, _)| total.parse::<usize>().ok())
                    .unwrap_or(listed);
                if input.contains("(no rows)") || rows == 0 {
                    "No data was found for that question.".to_string()
                } else {
                    format!("I found {rows} matching rows.")
                }
            }
            "summarize_database" => {
                let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
                format!(
                    "This database has {} tables: {}.\nIt stores related records across those tables.",
                    names.len(),
                    names.join(", ")
                )
            }
            "general_answer" => {
                if input.to_lowercase().contains("foreign key") {
                    "A foreign key is a column that references the primary key of another table, \
                     linking rows between the two."
                        .to_string()
                } else {
                    "That is a general question; here is a short answer.".to_string()
                }
            }
            "clarify" => {
                let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
                format!(
                    "Could you say which table you mean? Available tables: {}.",
                    names.join(", ")
                )
            }
            "suggest_follow_ups" => {
                let name = table
                    .or_else(|| tables.first())
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| "the data".to_string());
                serde_json::json!([
                    format!("Count the rows in {name}"),
                    format!("Show the 5 newest {name}"),
                ])
                .to_string()
            }
            _ => "I don't understand that request. Could you please rephrase it?".to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let task = task_tag(messages).unwrap_or("").to_string();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(task.clone());
        }

        if self.failing {
            return Err(ConverseError::llm("Mock LLM is configured to fail"));
        }

        let input = last_content(messages, Role::User);
        if let Some(response) = self.custom_response(&task, input) {
            return Ok(response);
        }

        let system = last_content(messages, Role::System);
        Ok(Self::default_response(&task, system, input))
    }
}

struct PromptTable {
    name: String,
    columns: Vec<String>,
}

/// Reads `Table: x` blocks (and a `Tables: a, b` line) back out of a prompt.
fn prompt_tables(system: &str) -> Vec<PromptTable> {
    let mut tables: Vec<PromptTable> = Vec::new();

    for line in system.lines() {
        if let Some(name) = line.strip_prefix("Table: ") {
            tables.push(PromptTable {
                name: name.trim().to_string(),
                columns: Vec::new(),
            });
        } else if let Some(names) = line.strip_prefix("Tables: ") {
            tables.extend(
                names
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(|n| PromptTable {
                        name: n.to_string(),
                        columns: Vec::new(),
                    }),
            );
        } else if let Some(column) = line.strip_prefix("  - ") {
            if let (Some(table), Some((name, _))) = (tables.last_mut(), column.split_once(':')) {
                table.columns.push(name.trim().to_string());
            }
        }
    }
    tables
}

fn words(input: &str) -> Vec<String> {
    input
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn mentioned_table<'a>(tables: &'a [PromptTable], words: &[String]) -> Option<&'a PromptTable> {
    tables.iter().find(|table| {
        let name = table.name.to_lowercase();
        let singular = name.strip_suffix('s').unwrap_or(&name);
        words
            .iter()
            .any(|w| *w == name || w == singular || w.strip_suffix('s') == Some(singular))
    })
}

fn classify(words: &[String], table: Option<&str>) -> String {
    let has = |candidates: &[&str]| words.iter().any(|w| candidates.contains(&w.as_str()));

    let intent = if has(&["delete", "remove"]) {
        "DELETE_DATA"
    } else if has(&["update", "change", "modify", "rename"]) {
        "UPDATE_DATA"
    } else if has(&["add", "insert", "create", "new"]) {
        "ADD_DATA"
    } else if words
        .iter()
        .any(|w| w.starts_with("summar") || w == "overview")
    {
        "SUMMARIZE_DB"
    } else if (table.is_some() && has(QUERY_WORDS)) || has(&["show", "list", "count"]) {
        "SELECT_QUERY"
    } else if has(&["what", "explain", "define", "hello", "hi", "why"]) {
        "GENERAL_QA"
    } else {
        "CLARIFY"
    };

    serde_json::json!({ "intent": intent, "table": table }).to_string()
}

fn select_for(table: &PromptTable, words: &[String]) -> String {
    if words.iter().any(|w| w == "many" || w == "count") {
        return format!("```sql\nSELECT COUNT(*) AS count FROM {};\n```", table.name);
    }

    let limit = words
        .iter()
        .find_map(|w| w.parse::<u32>().ok())
        .unwrap_or(10);
    let order = match table.columns.first() {
        Some(key) if words.iter().any(|w| w == "newest" || w == "latest") => {
            format!(" ORDER BY {key} DESC")
        }
        _ => String::new(),
    };

    format!(
        "```sql\nSELECT * FROM {}{order} LIMIT {limit};\n```",
        table.name
    )
}

fn guidance_for(table: Option<&PromptTable>) -> String {
    let reply = match table {
        Some(table) => {
            let fields: Vec<_> = table.columns.iter().skip(1).cloned().collect();
            let template = fields
                .iter()
                .map(|f| format!("{f}=value"))
                .collect::<Vec<_>>()
                .join(", ");
            serde_json::json!({
                "target_table": table.name,
                "suggested_fields": fields,
                "guidance_text": format!("Provide values for the {} table.", table.name),
                "fields_template_text": template,
                "example_text": format!("{}=example", fields.first().map(String::as_str).unwrap_or("column")),
            })
        }
        None => serde_json::json!({
            "target_table": "Unknown",
            "suggested_fields": [],
            "guidance_text": "Which table should this change apply to?",
        }),
    };
    format!("```json\n{reply}\n```")
}
