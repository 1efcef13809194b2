//! Inspection of single data-modification statements.

use sqlparser::ast::{FromTable, SetExpr, Statement, TableFactor, TableWithJoins};

use crate::db::DatabaseBackend;
use crate::error::{ConverseError, Result};

use super::classify::parse_statements;
use super::StatementType;

/// Shape of an INSERT, UPDATE or DELETE statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmlInspection {
    pub statement_type: StatementType,
    /// Target table as written in the statement.
    pub table: String,
    /// WHERE clause rendered back to SQL, if present.
    pub filter: Option<String>,
    /// Number of rows in an `INSERT ... VALUES` list.
    pub values_rows: Option<usize>,
}

impl DmlInspection {
    pub fn has_filter(&self) -> bool {
        self.filter.as_deref().is_some_and(|f| !f.trim().is_empty())
    }
}

/// Parses `sql` and describes it, rejecting anything that is not exactly one
/// INSERT, UPDATE or DELETE.
pub fn inspect_dml(backend: DatabaseBackend, sql: &str) -> Result<DmlInspection> {
    let statements = parse_statements(backend, sql)
        .map_err(|e| ConverseError::validation(format!("Could not parse statement: {e}")))?;

    let [statement] = statements.as_slice() else {
        return Err(ConverseError::validation(format!(
            "Expected exactly one statement, found {}",
            statements.len()
        )));
    };

    match statement {
        Statement::Insert(insert) => {
            let values_rows = insert.source.as_ref().and_then(|query| match query.body.as_ref() {
                SetExpr::Values(values) => Some(values.rows.len()),
                _ => None,
            });
            Ok(DmlInspection {
                statement_type: StatementType::Insert,
                table: insert.table_name.to_string(),
                filter: None,
                values_rows,
            })
        }
        Statement::Update {
            table, selection, ..
        } => Ok(DmlInspection {
            statement_type: StatementType::Update,
            table: relation_name(table)?,
            filter: selection.as_ref().map(|expr| expr.to_string()),
            values_rows: None,
        }),
        Statement::Delete(delete) => {
            let from = match &delete.from {
                FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
            };
            let table = match from.first() {
                Some(twj) => relation_name(twj)?,
                None => delete
                    .tables
                    .first()
                    .map(|name| name.to_string())
                    .ok_or_else(|| ConverseError::validation("DELETE has no target table"))?,
            };
            Ok(DmlInspection {
                statement_type: StatementType::Delete,
                table,
                filter: delete.selection.as_ref().map(|expr| expr.to_string()),
                values_rows: None,
            })
        }
        _ => Err(ConverseError::validation(
            "Only INSERT, UPDATE or DELETE statements can be reviewed here",
        )),
    }
}

fn relation_name(twj: &TableWithJoins) -> Result<String> {
    match &twj.relation {
        TableFactor::Table { name, .. } => Ok(name.to_string()),
        other => Err(ConverseError::validation(format!(
            "Unsupported target relation: {other}"
        ))),
    }
}
