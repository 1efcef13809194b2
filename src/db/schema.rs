//! Database schema types.
//!
//! A [`Schema`] is the snapshot the classifier, query generator and guided
//! modification flow all work against: tables, columns and foreign keys.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Represents the complete schema of a database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    /// All tables in the schema.
    pub tables: Vec<Table>,

    /// Foreign key relationships between tables.
    pub foreign_keys: Vec<ForeignKey>,
}

impl Schema {
    /// Creates a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all tables, in introspection order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Looks up a table by name.
    ///
    /// Matching is case-insensitive and tolerates a trailing plural `s`
    /// on either side, so "customer" finds `customers` and vice versa.
    pub fn find_table(&self, name: &str) -> Option<&Table> {
        let wanted = name.trim().trim_matches('"').trim_matches('`').to_lowercase();
        if wanted.is_empty() {
            return None;
        }

        if let Some(table) = self.tables.iter().find(|t| t.name.to_lowercase() == wanted) {
            return Some(table);
        }

        let wanted_singular = singularize(&wanted);
        self.tables
            .iter()
            .find(|t| singularize(&t.name.to_lowercase()) == wanted_singular)
    }

    /// Formats the schema for inclusion in an LLM system prompt.
    pub fn format_for_llm(&self) -> String {
        let tables_text = self
            .tables
            .iter()
            .map(|table| self.format_table_for_llm(table))
            .collect::<Vec<_>>()
            .join("");

        let foreign_keys_text = if self.foreign_keys.is_empty() {
            String::new()
        } else {
            let fk_lines = self
                .foreign_keys
                .iter()
                .map(|fk| {
                    format!(
                        "  - {}.{} -> {}.{}\n",
                        fk.from_table,
                        fk.from_columns.join(", "),
                        fk.to_table,
                        fk.to_columns.join(", ")
                    )
                })
                .collect::<Vec<_>>()
                .join("");
            format!("Foreign Keys:\n{}", fk_lines)
        };

        format!("Database Schema:\n\n{}{}", tables_text, foreign_keys_text)
    }

    fn format_table_for_llm(&self, table: &Table) -> String {
        let column_lines = table
            .columns
            .iter()
            .map(|column| self.format_column_for_llm(table, column))
            .collect::<Vec<_>>()
            .join("");

        format!("Table: {}\n{}\n", table.name, column_lines)
    }

    fn format_column_for_llm(&self, table: &Table, column: &Column) -> String {
        let mut annotations = Vec::new();
        if table.primary_key.contains(&column.name) {
            annotations.push("PK".to_string());
        }
        if !column.is_nullable {
            annotations.push("NOT NULL".to_string());
        }
        for fk in self
            .foreign_keys
            .iter()
            .filter(|fk| fk.from_table == table.name && fk.from_columns.contains(&column.name))
        {
            let target = fk.to_columns.first().map(String::as_str).unwrap_or("");
            annotations.push(format!("FK -> {}.{}", fk.to_table, target));
        }
        if let Some(default) = &column.default {
            annotations.push(format!("DEFAULT {default}"));
        }

        if annotations.is_empty() {
            format!("  - {}: {}\n", column.name, column.data_type)
        } else {
            format!(
                "  - {}: {} ({})\n",
                column.name,
                column.data_type,
                annotations.join(", ")
            )
        }
    }

    /// Short one-line-per-table listing for display.
    pub fn format_overview(&self) -> String {
        if self.tables.is_empty() {
            return "No tables found.".to_string();
        }
        self.tables
            .iter()
            .map(|t| {
                let cols = t
                    .columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("- {} ({})", t.name, cols)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Computes a hash of the schema content, used to tell snapshots apart.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.tables.len().hash(&mut hasher);
        for table in &self.tables {
            table.name.hash(&mut hasher);
            table.columns.len().hash(&mut hasher);
            for col in &table.columns {
                col.name.hash(&mut hasher);
                col.data_type.hash(&mut hasher);
                col.is_nullable.hash(&mut hasher);
                col.default.hash(&mut hasher);
            }
            table.primary_key.hash(&mut hasher);
        }
        self.foreign_keys.len().hash(&mut hasher);
        for fk in &self.foreign_keys {
            fk.from_table.hash(&mut hasher);
            fk.from_columns.hash(&mut hasher);
            fk.to_table.hash(&mut hasher);
            fk.to_columns.hash(&mut hasher);
        }
        hasher.finish()
    }
}

fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        return format!("{stem}y");
    }
    if name.ends_with("ss") {
        return name.to_string();
    }
    name.strip_suffix('s').unwrap_or(name).to_string()
}

/// Represents a database table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,

    /// Columns in the table.
    pub columns: Vec<Column>,

    /// Column names that form the primary key.
    pub primary_key: Vec<String>,
}

impl Table {
    /// Creates a new table with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Adds a column.
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key columns.
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Case-insensitive column lookup.
    pub fn column(&self, name: &str) -> Option<&Column> {
        let wanted = name.trim().to_lowercase();
        self.columns.iter().find(|c| c.name.to_lowercase() == wanted)
    }

    /// Returns true if the column is a single integer primary key the
    /// database fills in on insert.
    pub fn is_generated_key(&self, column: &Column) -> bool {
        self.primary_key.len() == 1
            && self.primary_key[0] == column.name
            && column.data_type.to_lowercase().contains("int")
    }

    /// Columns a new row must provide: NOT NULL, no default, not a generated key.
    pub fn required_insert_columns(&self) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| !c.is_nullable && c.default.is_none() && !self.is_generated_key(c))
            .collect()
    }

    /// Columns a user may sensibly set on insert (everything but a generated key).
    pub fn writable_columns(&self) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| !self.is_generated_key(c))
            .collect()
    }
}

/// Represents a column in a table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Data type (e.g., "integer", "varchar(255)").
    pub data_type: String,

    /// Whether the column allows NULL values.
    pub is_nullable: bool,

    /// Default value expression, if any.
    pub default: Option<String>,
}

impl Column {
    /// Creates a new column with the given name and data type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            default: None,
        }
    }

    /// Sets whether the column is nullable.
    pub fn nullable(self, nullable: bool) -> Self {
        Self {
            is_nullable: nullable,
            ..self
        }
    }

    /// Sets the default value.
    pub fn with_default(self, default: impl Into<String>) -> Self {
        Self {
            default: Some(default.into()),
            ..self
        }
    }

    /// Returns true if values of this column are written as unquoted numbers.
    pub fn is_numeric(&self) -> bool {
        let ty = self.data_type.to_lowercase();
        ["int", "serial", "real", "float", "double", "numeric", "decimal"]
            .iter()
            .any(|needle| ty.contains(needle))
    }
}

/// Represents a foreign key relationship between tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Source table name.
    pub from_table: String,

    /// Source column names.
    pub from_columns: Vec<String>,

    /// Target table name.
    pub to_table: String,

    /// Target column names.
    pub to_columns: Vec<String>,
}

impl ForeignKey {
    /// Creates a new foreign key relationship.
    pub fn new(
        from_table: impl Into<String>,
        from_columns: Vec<String>,
        to_table: impl Into<String>,
        to_columns: Vec<String>,
    ) -> Self {
        Self {
            from_table: from_table.into(),
            from_columns,
            to_table: to_table.into(),
            to_columns,
        }
    }
}
