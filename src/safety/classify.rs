//! SQL classification.
//!
//! Parses with the dialect of the connected backend and walks the AST,
//! including CTEs and derived tables, for anything that writes.

use sqlparser::ast::{Query, Select, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::{PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::{Parser, ParserError};

use crate::db::DatabaseBackend;

use super::{ClassificationResult, SafetyLevel, StatementType};

/// Parses SQL with the given backend's dialect.
pub(crate) fn parse_statements(
    backend: DatabaseBackend,
    sql: &str,
) -> std::result::Result<Vec<Statement>, ParserError> {
    match backend {
        DatabaseBackend::Postgres => Parser::parse_sql(&PostgreSqlDialect {}, sql),
        DatabaseBackend::Sqlite => Parser::parse_sql(&SQLiteDialect {}, sql),
    }
}

/// Classifies SQL strings for one backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlClassifier {
    backend: DatabaseBackend,
}

impl SqlClassifier {
    pub fn new(backend: DatabaseBackend) -> Self {
        Self { backend }
    }

    /// Classifies a SQL string.
    ///
    /// Unparseable or empty input is reported as destructive with a warning.
    pub fn classify(&self, sql: &str) -> ClassificationResult {
        let statements = match parse_statements(self.backend, sql) {
            Ok(statements) => statements,
            Err(e) => {
                return ClassificationResult::with_warning(
                    SafetyLevel::Destructive,
                    StatementType::Unknown,
                    format!("Could not parse SQL: {e}"),
                )
            }
        };

        match statements.as_slice() {
            [] => ClassificationResult::with_warning(
                SafetyLevel::Destructive,
                StatementType::Unknown,
                "Empty SQL statement",
            ),
            [single] => {
                let (level, stmt_type) = classify_statement(single);
                ClassificationResult::new(level, stmt_type)
            }
            many => {
                let (level, stmt_type) = many
                    .iter()
                    .map(classify_statement)
                    .fold((SafetyLevel::Safe, StatementType::Unknown), pick_worse);
                ClassificationResult::with_warning(
                    level,
                    StatementType::Multiple(Box::new(stmt_type)),
                    "Multiple statements in one request",
                )
            }
        }
    }
}

/// Classifies SQL with the PostgreSQL dialect.
pub fn classify_sql(sql: &str) -> ClassificationResult {
    SqlClassifier::default().classify(sql)
}

fn pick_worse(
    current: (SafetyLevel, StatementType),
    next: (SafetyLevel, StatementType),
) -> (SafetyLevel, StatementType) {
    if next.0 > current.0 || current.1 == StatementType::Unknown {
        next
    } else {
        current
    }
}

fn classify_statement(statement: &Statement) -> (SafetyLevel, StatementType) {
    match statement {
        Statement::Query(query) => classify_query(query),
        Statement::Explain {
            analyze, statement, ..
        } => {
            // EXPLAIN ANALYZE runs the inner statement
            if *analyze {
                (classify_statement(statement).0, StatementType::Explain)
            } else {
                (SafetyLevel::Safe, StatementType::Explain)
            }
        }
        Statement::ShowVariable { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowCreate { .. } => (SafetyLevel::Safe, StatementType::Show),

        Statement::Insert(_) => (SafetyLevel::Mutating, StatementType::Insert),
        Statement::Update { .. } => (SafetyLevel::Mutating, StatementType::Update),
        Statement::Merge { .. } => (SafetyLevel::Mutating, StatementType::Merge),

        Statement::Delete(_) => (SafetyLevel::Destructive, StatementType::Delete),
        Statement::Drop { .. } => (SafetyLevel::Destructive, StatementType::Drop),
        Statement::Truncate { .. } => (SafetyLevel::Destructive, StatementType::Truncate),
        Statement::AlterTable { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterView { .. }
        | Statement::AlterRole { .. } => (SafetyLevel::Destructive, StatementType::Alter),
        Statement::CreateTable { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateView { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateFunction { .. }
        | Statement::CreateRole { .. }
        | Statement::CreateSequence { .. } => (SafetyLevel::Destructive, StatementType::Create),
        Statement::Grant { .. } => (SafetyLevel::Destructive, StatementType::Grant),
        Statement::Revoke { .. } => (SafetyLevel::Destructive, StatementType::Revoke),

        _ => (SafetyLevel::Destructive, StatementType::Unknown),
    }
}

/// Most dangerous operation anywhere in a query, CTEs included.
fn classify_query(query: &Query) -> (SafetyLevel, StatementType) {
    let ctes = query
        .with
        .iter()
        .flat_map(|with| with.cte_tables.iter())
        .map(|cte| classify_query(&cte.query));

    ctes.chain(std::iter::once(classify_set_expr(&query.body)))
        .fold((SafetyLevel::Safe, StatementType::Select), |acc, next| {
            if next.0 > acc.0 {
                next
            } else {
                acc
            }
        })
}

fn classify_set_expr(set_expr: &SetExpr) -> (SafetyLevel, StatementType) {
    match set_expr {
        SetExpr::Insert(stmt) | SetExpr::Update(stmt) => classify_statement(stmt),
        SetExpr::Query(query) => classify_query(query),
        SetExpr::Select(select) => classify_select(select),
        SetExpr::SetOperation { left, right, .. } => {
            let left = classify_set_expr(left);
            let right = classify_set_expr(right);
            if right.0 > left.0 {
                right
            } else {
                left
            }
        }
        SetExpr::Values(_) | SetExpr::Table(_) => (SafetyLevel::Safe, StatementType::Select),
        #[allow(unreachable_patterns)]
        _ => (SafetyLevel::Destructive, StatementType::Unknown),
    }
}

fn classify_select(select: &Select) -> (SafetyLevel, StatementType) {
    select
        .from
        .iter()
        .map(classify_table_with_joins)
        .fold((SafetyLevel::Safe, StatementType::Select), |acc, next| {
            if next.0 > acc.0 {
                next
            } else {
                acc
            }
        })
}

fn classify_table_with_joins(twj: &TableWithJoins) -> (SafetyLevel, StatementType) {
    std::iter::once(&twj.relation)
        .chain(twj.joins.iter().map(|join| &join.relation))
        .map(classify_table_factor)
        .fold((SafetyLevel::Safe, StatementType::Select), |acc, next| {
            if next.0 > acc.0 {
                next
            } else {
                acc
            }
        })
}

fn classify_table_factor(factor: &TableFactor) -> (SafetyLevel, StatementType) {
    match factor {
        TableFactor::Derived { subquery, .. } => classify_query(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => classify_table_with_joins(table_with_joins),
        _ => (SafetyLevel::Safe, StatementType::Select),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_classification(sql: &str, expected_level: SafetyLevel, expected_type: StatementType) {
        let result = classify_sql(sql);
        assert_eq!(
            (result.level, result.statement_type),
            (expected_level, expected_type),
            "SQL: '{sql}'"
        );
    }

    #[test]
    fn test_plain_selects_are_safe() {
        for sql in [
            "SELECT * FROM orders",
            "select id, total from orders where total > 10 order by id desc limit 5",
            "SELECT c.name, COUNT(o.id) FROM customers c JOIN orders o ON c.id = o.customer_id GROUP BY c.name",
            "SELECT * FROM customers WHERE id IN (SELECT customer_id FROM orders)",
            "WITH big AS (SELECT * FROM orders WHERE total > 50) SELECT * FROM big",
        ] {
            assert_classification(sql, SafetyLevel::Safe, StatementType::Select);
        }
    }

    #[test]
    fn test_explain_without_analyze_is_safe() {
        assert_classification(
            "EXPLAIN DELETE FROM orders",
            SafetyLevel::Safe,
            StatementType::Explain,
        );
        assert_classification(
            "EXPLAIN ANALYZE DELETE FROM orders",
            SafetyLevel::Destructive,
            StatementType::Explain,
        );
    }

    #[test]
    fn test_data_modification_levels() {
        assert_classification(
            "INSERT INTO artist (name) VALUES ('Nova')",
            SafetyLevel::Mutating,
            StatementType::Insert,
        );
        assert_classification(
            "UPDATE customers SET email = 'x@y.z' WHERE id = 1",
            SafetyLevel::Mutating,
            StatementType::Update,
        );
        assert_classification(
            "DELETE FROM customers WHERE id = 2",
            SafetyLevel::Destructive,
            StatementType::Delete,
        );
    }

    #[test]
    fn test_schema_changes_are_destructive() {
        assert_classification("DROP TABLE orders", SafetyLevel::Destructive, StatementType::Drop);
        assert_classification(
            "ALTER TABLE orders ADD COLUMN note TEXT",
            SafetyLevel::Destructive,
            StatementType::Alter,
        );
        assert_classification(
            "CREATE TABLE t (id INT)",
            SafetyLevel::Destructive,
            StatementType::Create,
        );
    }

    #[test]
    fn test_data_modifying_cte_is_detected() {
        assert_classification(
            "WITH gone AS (DELETE FROM orders RETURNING *) SELECT * FROM gone",
            SafetyLevel::Destructive,
            StatementType::Delete,
        );
        assert_classification(
            "WITH changed AS (UPDATE orders SET status = 'x' RETURNING *) SELECT * FROM changed",
            SafetyLevel::Mutating,
            StatementType::Update,
        );
    }

    #[test]
    fn test_mutation_in_derived_table_is_detected() {
        assert_classification(
            "SELECT * FROM (WITH d AS (DELETE FROM orders RETURNING *) SELECT * FROM d) sub",
            SafetyLevel::Destructive,
            StatementType::Delete,
        );
    }

    #[test]
    fn test_multiple_statements_take_the_worst() {
        let result = classify_sql("SELECT * FROM orders; DELETE FROM orders");
        assert_eq!(result.level, SafetyLevel::Destructive);
        assert_eq!(
            result.statement_type,
            StatementType::Multiple(Box::new(StatementType::Delete))
        );
        assert!(!result.is_plain_select());

        let result = classify_sql("SELECT 1; SELECT 2");
        assert_eq!(result.level, SafetyLevel::Safe);
        assert!(!result.is_plain_select());
    }

    #[test]
    fn test_unparseable_and_empty_are_destructive() {
        let result = classify_sql("THIS IS NOT SQL");
        assert_eq!(result.level, SafetyLevel::Destructive);
        assert!(result.warning.unwrap().contains("Could not parse SQL"));

        assert_eq!(classify_sql("   \n\t ").level, SafetyLevel::Destructive);
    }

    #[test]
    fn test_sqlite_dialect() {
        let classifier = SqlClassifier::new(DatabaseBackend::Sqlite);
        let result = classifier.classify("SELECT name FROM sqlite_master WHERE type = 'table'");
        assert!(result.is_plain_select());
        assert_eq!(
            classifier.classify("DELETE FROM artist WHERE id = 1").level,
            SafetyLevel::Destructive
        );
    }
}
