//! Simulated execution of approved statements.
//!
//! Nothing here writes. The statement is parsed and checked, and the number
//! of rows it would touch is estimated with a read-only count.

use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

use crate::db::DatabaseClient;
use crate::error::{ConverseError, Result};
use crate::safety::{inspect_dml, DmlInspection, StatementType};

use super::DmlAction;

/// Outcome of a simulated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulatedExecutionResult {
    pub statement: String,
    /// Estimated affected rows, when it could be determined.
    pub would_affect_rows: Option<i64>,
    pub success: bool,
    pub message: String,
}

impl SimulatedExecutionResult {
    pub fn failed(statement: impl Into<String>, error: &ConverseError) -> Self {
        Self {
            statement: statement.into(),
            would_affect_rows: None,
            success: false,
            message: format!("Simulated execution failed: {}", error.message()),
        }
    }
}

/// Checks `sql` against the expected action without running it.
///
/// The statement must be a single INSERT, UPDATE or DELETE matching `action`,
/// and UPDATE or DELETE must carry a WHERE clause.
pub fn check_statement(
    db: &dyn DatabaseClient,
    action: DmlAction,
    sql: &str,
) -> Result<DmlInspection> {
    let inspection = inspect_dml(db.backend(), sql)?;

    if inspection.statement_type != action.statement_type() {
        return Err(ConverseError::validation(format!(
            "Expected a {} statement for this request, got {}",
            action.statement_type(),
            inspection.statement_type
        )));
    }
    if action.needs_filter() && !inspection.has_filter() {
        return Err(ConverseError::validation(format!(
            "A {} without a WHERE clause would affect every row; add a filter condition",
            inspection.statement_type
        )));
    }
    Ok(inspection)
}

/// Simulates `sql` for the given action.
pub async fn simulate(db: &dyn DatabaseClient, action: DmlAction, sql: &str) -> SimulatedExecutionResult {
    let start = Instant::now();

    let inspection = match check_statement(db, action, sql) {
        Ok(inspection) => inspection,
        Err(e) => return SimulatedExecutionResult::failed(sql, &e),
    };

    let estimate = match inspection.statement_type {
        StatementType::Insert => Ok(inspection.values_rows.and_then(|n| i64::try_from(n).ok())),
        _ => count_matching(db, &inspection).await.map(Some),
    };

    let would_affect_rows = match estimate {
        Ok(rows) => rows,
        Err(e) => return SimulatedExecutionResult::failed(sql, &e),
    };

    info!(
        action = action.verb(),
        table = %inspection.table,
        would_affect_rows,
        duration_ms = start.elapsed().as_millis() as u64,
        "Simulated statement"
    );

    let rows_note = match would_affect_rows {
        Some(1) => " It would affect 1 row.".to_string(),
        Some(n) => format!(" It would affect {n} rows."),
        None => String::new(),
    };

    SimulatedExecutionResult {
        statement: sql.to_string(),
        would_affect_rows,
        success: true,
        message: format!(
            "Successfully (simulated) {} data. No actual changes were made to the database.{rows_note}",
            action.past_tense()
        ),
    }
}

async fn count_matching(db: &dyn DatabaseClient, inspection: &DmlInspection) -> Result<i64> {
    let filter = inspection
        .filter
        .as_deref()
        .ok_or_else(|| ConverseError::validation("A filter condition is required"))?;
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {filter}", inspection.table);
    debug!(%sql, "Estimating affected rows");

    let result = db.execute_query(&sql).await?;
    result
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(|value| value.as_i64())
        .ok_or_else(|| ConverseError::execution("Row count query returned no value"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockDatabaseClient;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_insert_counts_values_rows() {
        let db = MockDatabaseClient::new();
        let result = simulate(
            &db,
            DmlAction::Add,
            "INSERT INTO artist (name) VALUES ('Nova'), ('Vega')",
        )
        .await;

        assert!(result.success);
        assert_eq!(result.would_affect_rows, Some(2));
        assert!(result.message.contains("No actual changes were made"));
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn test_delete_estimates_with_read_only_count() {
        let db = MockDatabaseClient::new();
        let result = simulate(&db, DmlAction::Delete, "DELETE FROM customers WHERE id = 2").await;

        assert!(result.success);
        assert_eq!(result.would_affect_rows, Some(2));
        assert_eq!(
            db.executed(),
            vec!["SELECT COUNT(*) FROM customers WHERE id = 2"]
        );
    }

    #[tokio::test]
    async fn test_unconditional_delete_refused() {
        let db = MockDatabaseClient::new();
        let result = simulate(&db, DmlAction::Delete, "DELETE FROM customers").await;

        assert!(!result.success);
        assert!(result.message.contains("WHERE"));
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_statement_kind_refused() {
        let db = MockDatabaseClient::new();
        for sql in ["DROP TABLE customers", "SELECT * FROM customers", "UPDATE customers SET name = 'x' WHERE id = 1"] {
            let result = simulate(&db, DmlAction::Delete, sql).await;
            assert!(!result.success, "{sql}");
            assert_eq!(result.would_affect_rows, None);
        }
    }

    #[tokio::test]
    async fn test_count_failure_is_reported() {
        let db = MockDatabaseClient::new();
        let result = simulate(&db, DmlAction::Update, "UPDATE invoices SET paid = 1 WHERE id = 1").await;

        assert!(!result.success);
        assert!(result.message.contains("no such table"));
    }
}
