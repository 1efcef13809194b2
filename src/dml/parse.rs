//! Reading field values out of user answers.
//!
//! Answers are matched against the target table's columns. Accepted forms:
//! `name=Nova`, `name: Nova`, `name is Nova`, several pairs joined by commas
//! or "and", an optional `where` part for the filter, or a JSON object.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::db::{Schema, Table};

use super::{CollectedFields, DmlAction};

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^(?:set\s+)?["`]?([A-Za-z_][A-Za-z0-9_]*)["`]?\s*(?:=|:|\s+is\s+|\s+to\s+)\s*(.+)$"#)
        .expect("valid regex")
});

/// A single field value from an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Null,
}

impl FieldValue {
    fn from_raw(raw: &str) -> Self {
        let raw = raw.trim();
        for quote in ['\'', '"'] {
            if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
                return Self::Text(raw[1..raw.len() - 1].to_string());
            }
        }
        if raw.eq_ignore_ascii_case("null") {
            Self::Null
        } else {
            Self::Text(raw.to_string())
        }
    }

    fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text}"),
            Self::Null => write!(f, "NULL"),
        }
    }
}

/// Fields found in one answer, with column names as the schema spells them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAnswer {
    pub values: Vec<(String, FieldValue)>,
    pub filter: Vec<(String, FieldValue)>,
    /// Names given that are not columns of the table.
    pub unknown: Vec<String>,
    /// `col=value` pairs read as the row filter without an explicit `where`.
    pub assumed_filter: Vec<String>,
}

impl ParsedAnswer {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.filter.is_empty()
    }
}

/// Parses an answer given while a flow collects details.
///
/// For a delete every pair is a filter. For an update, pairs after `where`
/// are the filter; without `where`, new pairs count as the filter once some
/// values are already collected, unless the answer starts with `set`. Those
/// inferred pairs are listed in [`ParsedAnswer::assumed_filter`].
pub fn parse_answer(
    table: &Table,
    action: DmlAction,
    text: &str,
    collected: &CollectedFields,
) -> ParsedAnswer {
    let text = text.trim();
    let mut parsed = ParsedAnswer::default();

    if text.starts_with('{') {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(text) {
            for (key, value) in &map {
                if key.eq_ignore_ascii_case("where") || key.eq_ignore_ascii_case("filter") {
                    if let serde_json::Value::Object(conditions) = value {
                        for (column, value) in conditions {
                            let value = FieldValue::from_json(value);
                            push(table, &mut parsed.filter, &mut parsed.unknown, column, value);
                        }
                    }
                    continue;
                }
                let value = FieldValue::from_json(value);
                push(table, &mut parsed.values, &mut parsed.unknown, key, value);
            }
            return route_by_action(parsed, action, collected, true);
        }
    }

    let (set_part, where_part) = split_where(text);
    let explicit = where_part.is_some() || starts_with_set(text);

    for pair in split_pairs(set_part) {
        if let Some((column, value)) = parse_pair(&pair) {
            push(table, &mut parsed.values, &mut parsed.unknown, &column, value);
        }
    }
    if let Some(where_part) = where_part {
        for pair in split_pairs(where_part) {
            if let Some((column, value)) = parse_pair(&pair) {
                push(table, &mut parsed.filter, &mut parsed.unknown, &column, value);
            }
        }
    }

    route_by_action(parsed, action, collected, explicit)
}

/// True when `text` is nothing but `column=value` pairs naming columns of
/// `table`, optionally led by `set` and with a `where` part.
pub fn is_assignment_list(table: &Table, text: &str) -> bool {
    let text = text.trim();
    let body = if starts_with_set(text) { &text[4..] } else { text };
    let (set_part, where_part) = split_where(body);

    let mut pairs = split_pairs(set_part);
    if let Some(where_part) = where_part {
        let conditions = split_pairs(where_part);
        if conditions.is_empty() {
            return false;
        }
        pairs.extend(conditions);
    }

    !pairs.is_empty()
        && pairs.iter().all(|pair| {
            pair.split_once('=').is_some_and(|(column, value)| {
                let column = column.trim().trim_matches(|c| c == '"' || c == '`');
                !value.trim().is_empty() && table.column(column).is_some()
            })
        })
}

fn route_by_action(
    mut parsed: ParsedAnswer,
    action: DmlAction,
    collected: &CollectedFields,
    explicit: bool,
) -> ParsedAnswer {
    match action {
        DmlAction::Add => {
            // A filter means nothing for an insert; keep the values only
            parsed.filter.clear();
        }
        DmlAction::Delete => {
            let values = std::mem::take(&mut parsed.values);
            parsed.filter.extend(values);
        }
        DmlAction::Update if !explicit && !collected.values.is_empty() => {
            // Pairs repeating a collected value stay values; the rest pick rows
            let (repeated, fresh): (Vec<_>, Vec<_>) = std::mem::take(&mut parsed.values)
                .into_iter()
                .partition(|(column, value)| collected.values.get(column) == Some(value));
            parsed.values = repeated;
            parsed.assumed_filter = fresh.iter().map(|(k, v)| format!("{k}={v}")).collect();
            parsed.filter.extend(fresh);
        }
        DmlAction::Update => {}
    }
    parsed
}

fn push(
    table: &Table,
    target: &mut Vec<(String, FieldValue)>,
    unknown: &mut Vec<String>,
    name: &str,
    value: FieldValue,
) {
    match table.column(name) {
        Some(column) => {
            target.retain(|(existing, _)| existing != &column.name);
            target.push((column.name.clone(), value));
        }
        None => unknown.push(name.to_string()),
    }
}

fn starts_with_set(text: &str) -> bool {
    text.get(..4).is_some_and(|head| head.eq_ignore_ascii_case("set "))
}

fn parse_pair(pair: &str) -> Option<(String, FieldValue)> {
    let caps = ASSIGNMENT.captures(pair.trim())?;
    let column = caps.get(1)?.as_str().to_string();
    let value = caps.get(2)?.as_str();
    Some((column, FieldValue::from_raw(value)))
}

/// Splits off a `where ...` suffix that is outside quotes.
fn split_where(text: &str) -> (&str, Option<&str>) {
    if text.len() > 6 && text.as_bytes()[..6].eq_ignore_ascii_case(b"where ") {
        return ("", Some(&text[6..]));
    }

    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if word_at(text, i, "where") => return (&text[..i], Some(&text[i + 7..])),
            None => {}
        }
    }
    (text, None)
}

/// Splits on commas, semicolons and the word "and", outside quotes.
fn split_pairs(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = text.char_indices();

    while let Some((i, c)) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                current.push(c);
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                current.push(c);
            }
            None if c == ',' || c == ';' => parts.push(std::mem::take(&mut current)),
            None if word_at(text, i, "and") => {
                parts.push(std::mem::take(&mut current));
                // Skip "and" and the trailing whitespace
                for _ in 0..4 {
                    chars.next();
                }
            }
            None => current.push(c),
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// True when `text[i..]` starts with whitespace, `word`, whitespace (ASCII, any case).
fn word_at(text: &str, i: usize, word: &str) -> bool {
    let bytes = text.as_bytes();
    let end = i + 1 + word.len();
    bytes.get(i).is_some_and(u8::is_ascii_whitespace)
        && bytes
            .get(i + 1..end)
            .is_some_and(|w| w.eq_ignore_ascii_case(word.as_bytes()))
        && bytes.get(end).is_some_and(u8::is_ascii_whitespace)
}

/// Finds the first table named in free text.
pub fn infer_table<'a>(schema: &'a Schema, text: &str) -> Option<&'a Table> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|word| word.len() > 1)
        .find_map(|word| schema.find_table(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Column;
    use pretty_assertions::assert_eq;

    fn customers() -> Table {
        Table::new("customers")
            .with_column(Column::new("id", "integer").nullable(false))
            .with_column(Column::new("name", "text").nullable(false))
            .with_column(Column::new("email", "text"))
            .with_primary_key(&["id"])
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    fn none() -> CollectedFields {
        CollectedFields::default()
    }

    #[test]
    fn test_single_assignment_forms() {
        let table = customers();
        for answer in ["name=Nova", "name: Nova", "Name is Nova", "set name = 'Nova'"] {
            let parsed = parse_answer(&table, DmlAction::Add, answer, &none());
            assert_eq!(parsed.values, vec![("name".to_string(), text("Nova"))], "{answer}");
        }
    }

    #[test]
    fn test_multiple_pairs_and_quotes() {
        let parsed = parse_answer(
            &customers(),
            DmlAction::Add,
            "name='Smith, Jane' and email=jane@example.com",
            &none(),
        );
        assert_eq!(
            parsed.values,
            vec![
                ("name".to_string(), text("Smith, Jane")),
                ("email".to_string(), text("jane@example.com")),
            ]
        );
    }

    #[test]
    fn test_update_with_where() {
        let parsed = parse_answer(
            &customers(),
            DmlAction::Update,
            "email=new@example.com where id=2",
            &none(),
        );
        assert_eq!(parsed.values, vec![("email".to_string(), text("new@example.com"))]);
        assert_eq!(parsed.filter, vec![("id".to_string(), text("2"))]);
    }

    #[test]
    fn test_update_filter_after_values() {
        let mut collected = none();
        collected.values.insert("email".to_string(), text("a@example.com"));

        let parsed = parse_answer(&customers(), DmlAction::Update, "id = 2", &collected);
        assert!(parsed.values.is_empty());
        assert_eq!(parsed.filter, vec![("id".to_string(), text("2"))]);

        assert_eq!(parsed.assumed_filter, vec!["id=2"]);

        // Repeating a collected value does not turn it into a filter
        let parsed =
            parse_answer(&customers(), DmlAction::Update, "email=a@example.com", &collected);
        assert_eq!(parsed.values, vec![("email".to_string(), text("a@example.com"))]);
        assert!(parsed.filter.is_empty());
        assert!(parsed.assumed_filter.is_empty());
    }

    #[test]
    fn test_update_set_prefix_adds_value() {
        let mut collected = none();
        collected.values.insert("email".to_string(), text("a@example.com"));

        let parsed = parse_answer(&customers(), DmlAction::Update, "set name=Bob", &collected);
        assert_eq!(parsed.values, vec![("name".to_string(), text("Bob"))]);
        assert!(parsed.filter.is_empty());
        assert!(parsed.assumed_filter.is_empty());

        let parsed =
            parse_answer(&customers(), DmlAction::Update, "name=Bob where id=2", &collected);
        assert_eq!(parsed.values, vec![("name".to_string(), text("Bob"))]);
        assert!(parsed.assumed_filter.is_empty());
    }

    #[test]
    fn test_delete_treats_pairs_as_filter() {
        let parsed = parse_answer(&customers(), DmlAction::Delete, "name = 'Ada'", &none());
        assert_eq!(parsed.filter, vec![("name".to_string(), text("Ada"))]);

        let parsed = parse_answer(&customers(), DmlAction::Delete, "where id=1", &none());
        assert_eq!(parsed.filter, vec![("id".to_string(), text("1"))]);
    }

    #[test]
    fn test_json_answer() {
        let parsed = parse_answer(
            &customers(),
            DmlAction::Update,
            r#"{"email": null, "where": {"id": 2}}"#,
            &none(),
        );
        assert_eq!(parsed.values, vec![("email".to_string(), FieldValue::Null)]);
        assert_eq!(parsed.filter, vec![("id".to_string(), text("2"))]);
    }

    #[test]
    fn test_unknown_columns_reported() {
        let parsed = parse_answer(&customers(), DmlAction::Add, "nickname=Nova", &none());
        assert!(parsed.is_empty());
        assert_eq!(parsed.unknown, vec!["nickname"]);
    }

    #[test]
    fn test_free_text_without_pairs() {
        let parsed = parse_answer(&customers(), DmlAction::Delete, "all of them", &none());
        assert!(parsed.is_empty());
        assert!(parsed.unknown.is_empty());
    }

    #[test]
    fn test_assignment_list_detection() {
        let table = customers();
        for answer in [
            "id=2",
            "name = 'Smith, Jane', email=jane@example.com",
            "set email=a@example.com where id=2",
            "where id = 2",
        ] {
            assert!(is_assignment_list(&table, answer), "{answer}");
        }
        for answer in [
            "show me customers where id = 2",
            "nickname=Nova",
            "name is Nova",
            "name=",
            "summarize",
        ] {
            assert!(!is_assignment_list(&table, answer), "{answer}");
        }
    }

    #[test]
    fn test_null_literal() {
        assert_eq!(FieldValue::from_raw("NULL"), FieldValue::Null);
        assert_eq!(FieldValue::from_raw("'null'"), text("null"));
    }

    #[test]
    fn test_infer_table() {
        let schema = Schema {
            tables: vec![customers(), Table::new("artist")],
            foreign_keys: vec![],
        };
        assert_eq!(
            infer_table(&schema, "add a new artist named Nova").map(|t| t.name.as_str()),
            Some("artist")
        );
        assert_eq!(
            infer_table(&schema, "delete all customer records").map(|t| t.name.as_str()),
            Some("customers")
        );
        assert!(infer_table(&schema, "what is a foreign key").is_none());
    }
}
