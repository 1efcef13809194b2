//! Building INSERT, UPDATE and DELETE text from collected fields.

use crate::db::Table;
use crate::error::{ConverseError, Result};

use super::{CollectedFields, DmlAction, FieldValue};

/// Builds the statement for a flow.
///
/// Columns follow the table's column order. UPDATE and DELETE without a
/// filter are refused.
pub fn build_statement(action: DmlAction, table: &Table, fields: &CollectedFields) -> Result<String> {
    let name = quote_ident(&table.name);

    match action {
        DmlAction::Add => {
            let pairs = ordered(table, &fields.values);
            if pairs.is_empty() {
                return Err(ConverseError::validation("No column values to insert"));
            }
            let columns: Vec<_> = pairs.iter().map(|(c, _)| quote_ident(c)).collect();
            let values: Vec<_> = pairs.iter().map(|(c, v)| literal(table, c, v)).collect();
            Ok(format!(
                "INSERT INTO {name} ({}) VALUES ({})",
                columns.join(", "),
                values.join(", ")
            ))
        }
        DmlAction::Update => {
            let assignments: Vec<_> = ordered(table, &fields.values)
                .into_iter()
                .map(|(c, v)| format!("{} = {}", quote_ident(c), literal(table, c, v)))
                .collect();
            if assignments.is_empty() {
                return Err(ConverseError::validation("No new values to set"));
            }
            Ok(format!(
                "UPDATE {name} SET {} WHERE {}",
                assignments.join(", "),
                where_clause(table, fields)?
            ))
        }
        DmlAction::Delete => Ok(format!(
            "DELETE FROM {name} WHERE {}",
            where_clause(table, fields)?
        )),
    }
}

fn where_clause(table: &Table, fields: &CollectedFields) -> Result<String> {
    let conditions: Vec<_> = ordered(table, &fields.filter)
        .into_iter()
        .map(|(c, v)| match v {
            FieldValue::Null => format!("{} IS NULL", quote_ident(c)),
            value => format!("{} = {}", quote_ident(c), literal(table, c, value)),
        })
        .collect();

    if conditions.is_empty() {
        return Err(ConverseError::validation(
            "A filter condition is required; refusing to change every row",
        ));
    }
    Ok(conditions.join(" AND "))
}

fn ordered<'a>(
    table: &Table,
    fields: &'a std::collections::BTreeMap<String, FieldValue>,
) -> Vec<(&'a str, &'a FieldValue)> {
    let mut pairs: Vec<_> = fields.iter().map(|(k, v)| (k.as_str(), v)).collect();
    pairs.sort_by_key(|(column, _)| {
        table
            .columns
            .iter()
            .position(|c| c.name == *column)
            .unwrap_or(usize::MAX)
    });
    pairs
}

/// Renders a value as a SQL literal for the given column.
fn literal(table: &Table, column: &str, value: &FieldValue) -> String {
    let FieldValue::Text(text) = value else {
        return "NULL".to_string();
    };

    let numeric = table.column(column).is_some_and(|c| c.is_numeric());
    if numeric && text.trim().parse::<f64>().is_ok_and(f64::is_finite) {
        return text.trim().to_string();
    }

    format!("'{}'", text.replace('\'', "''"))
}

/// Double-quotes an identifier unless it is a plain lowercase name.
fn quote_ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Column;
    use pretty_assertions::assert_eq;

    fn orders() -> Table {
        Table::new("orders")
            .with_column(Column::new("id", "integer").nullable(false))
            .with_column(Column::new("customer_id", "integer").nullable(false))
            .with_column(Column::new("total", "real").nullable(false))
            .with_column(Column::new("status", "text"))
            .with_primary_key(&["id"])
    }

    fn fields(values: &[(&str, FieldValue)], filter: &[(&str, FieldValue)]) -> CollectedFields {
        CollectedFields {
            values: values.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            filter: filter.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    #[test]
    fn test_insert_single_column() {
        let artist = Table::new("artist")
            .with_column(Column::new("id", "integer"))
            .with_column(Column::new("name", "text"));
        let sql = build_statement(DmlAction::Add, &artist, &fields(&[("name", text("Nova"))], &[]))
            .unwrap();
        assert_eq!(sql, "INSERT INTO artist (name) VALUES ('Nova')");
    }

    #[test]
    fn test_insert_follows_column_order_and_types() {
        let sql = build_statement(
            DmlAction::Add,
            &orders(),
            &fields(
                &[
                    ("status", text("it's new")),
                    ("total", text("12.50")),
                    ("customer_id", text("3")),
                ],
                &[],
            ),
        )
        .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO orders (customer_id, total, status) VALUES (3, 12.50, 'it''s new')"
        );
    }

    #[test]
    fn test_non_numeric_text_in_numeric_column_is_quoted() {
        let sql = build_statement(
            DmlAction::Update,
            &orders(),
            &fields(&[("total", text("1; DROP TABLE orders"))], &[("id", text("1"))]),
        )
        .unwrap();
        assert_eq!(
            sql,
            "UPDATE orders SET total = '1; DROP TABLE orders' WHERE id = 1"
        );
    }

    #[test]
    fn test_update_and_delete_need_filter() {
        let no_filter = fields(&[("status", text("shipped"))], &[]);
        for action in [DmlAction::Update, DmlAction::Delete] {
            let err = build_statement(action, &orders(), &no_filter).unwrap_err();
            assert!(matches!(err, ConverseError::Validation(_)), "{action}");
        }
    }

    #[test]
    fn test_delete_with_null_filter() {
        let sql = build_statement(
            DmlAction::Delete,
            &orders(),
            &fields(&[], &[("status", FieldValue::Null), ("customer_id", text("2"))]),
        )
        .unwrap();
        assert_eq!(
            sql,
            "DELETE FROM orders WHERE customer_id = 2 AND status IS NULL"
        );
    }

    #[test]
    fn test_quoted_identifiers() {
        assert_eq!(quote_ident("artist"), "artist");
        assert_eq!(quote_ident("Artist"), "\"Artist\"");
        assert_eq!(quote_ident("order items"), "\"order items\"");
    }
}
