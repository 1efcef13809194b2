//! SELECT generation and execution.
//!
//! The model writes the SQL; nothing it writes reaches the database unless
//! it is a single plain SELECT.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{debug, info};

use crate::db::{DatabaseBackend, DatabaseClient, QueryResult};
use crate::error::{ConverseError, Result};
use crate::llm::{extract_sql, LlmClient, LlmTask, PromptContext};
use crate::safety::SqlClassifier;

static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(?:[^']|'')*'").expect("valid regex"));

static MUTATION_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|drop|alter|create|truncate|grant|revoke|merge|attach|detach|vacuum|pragma)\b",
    )
    .expect("valid regex")
});

/// A question answered with a query.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub sql: String,
    pub result: QueryResult,
}

/// Checks generated SQL and returns it cleaned of fences and a trailing `;`.
///
/// Anything but a single read-only SELECT is a `Generation` error.
pub fn validate_select(backend: DatabaseBackend, reply: &str) -> Result<String> {
    let sql = extract_sql(reply);

    if sql.is_empty() {
        return Err(ConverseError::generation("The model returned no SQL"));
    }
    if sql.to_lowercase().starts_with("cannot answer") {
        return Err(ConverseError::generation(
            "The question cannot be answered from this database's schema",
        ));
    }
    if !sql.to_uppercase().starts_with("SELECT") {
        return Err(ConverseError::generation(format!(
            "Only SELECT statements are run; the model produced: {}",
            first_line(&sql)
        )));
    }

    let without_literals = STRING_LITERAL.replace_all(&sql, "''");
    if let Some(keyword) = MUTATION_KEYWORD.find(&without_literals) {
        return Err(ConverseError::generation(format!(
            "Generated SQL contains the keyword {}; it was not run",
            keyword.as_str().to_uppercase()
        )));
    }

    let classification = SqlClassifier::new(backend).classify(&sql);
    if !classification.is_plain_select() {
        let reason = classification
            .warning
            .unwrap_or_else(|| format!("classified as {}", classification.statement_type));
        return Err(ConverseError::generation(format!(
            "Generated SQL is not a plain SELECT ({reason})"
        )));
    }

    Ok(sql)
}

fn first_line(sql: &str) -> &str {
    sql.lines().next().unwrap_or("")
}

/// Generates and runs SELECTs for natural-language questions.
pub struct QueryExecutor<'a> {
    llm: &'a dyn LlmClient,
    db: &'a dyn DatabaseClient,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(llm: &'a dyn LlmClient, db: &'a dyn DatabaseClient) -> Self {
        Self { llm, db }
    }

    /// Asks the model for a SELECT and validates it.
    pub async fn generate(&self, ctx: &PromptContext<'_>, question: &str) -> Result<String> {
        let messages = LlmTask::GenerateSelect { question }.build_messages(ctx);
        let reply = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| ConverseError::generation(e.message()))?;

        let sql = validate_select(ctx.backend, &reply)?;
        debug!(%sql, "Generated SELECT");
        Ok(sql)
    }

    /// Runs a validated SELECT. Database failures come back as `Execution` errors.
    pub async fn execute(&self, sql: &str) -> Result<QueryOutcome> {
        let start = Instant::now();
        let result = self.db.execute_query(sql).await.map_err(|e| match e {
            ConverseError::Execution(_) => e,
            other => ConverseError::execution(other.message()),
        })?;
        let execution_time = start.elapsed();
        let result = result.with_execution_time(execution_time);

        info!(
            rows = result.row_count(),
            truncated = result.was_truncated,
            duration_ms = execution_time.as_millis() as u64,
            "Executed generated query"
        );

        Ok(QueryOutcome {
            sql: sql.to_string(),
            result,
        })
    }

    /// Generates, validates and runs a query for `question`.
    pub async fn answer(&self, ctx: &PromptContext<'_>, question: &str) -> Result<QueryOutcome> {
        let sql = self.generate(ctx, question).await?;
        self.execute(&sql).await
    }
}
