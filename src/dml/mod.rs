//! Guided data modification.
//!
//! An add, update or delete request becomes a [`DmlFlowState`] that moves
//! through [`DmlStage`]s one user answer at a time. The statement it ends up
//! with is only ever simulated.

pub mod engine;
pub mod parse;
pub mod simulate;
pub mod statement;

pub use engine::{FlowContext, FlowStep};
pub use parse::{infer_table, is_assignment_list, parse_answer, FieldValue, ParsedAnswer};
pub use simulate::{simulate, SimulatedExecutionResult};
pub use statement::build_statement;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::llm::GuidanceReply;
use crate::safety::StatementType;

/// Kind of modification the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmlAction {
    Add,
    Update,
    Delete,
}

impl DmlAction {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Add => "added",
            Self::Update => "updated",
            Self::Delete => "deleted",
        }
    }

    /// Statement kind this action produces.
    pub fn statement_type(&self) -> StatementType {
        match self {
            Self::Add => StatementType::Insert,
            Self::Update => StatementType::Update,
            Self::Delete => StatementType::Delete,
        }
    }

    /// Shape of a details answer, shown to the user and the model.
    pub fn template_hint(&self) -> &'static str {
        match self {
            Self::Add => "column=value, column2=value",
            Self::Update => "column=new value where key_column=value",
            Self::Delete => "where key_column=value",
        }
    }

    /// Whether the statement needs a WHERE clause.
    pub fn needs_filter(&self) -> bool {
        !matches!(self, Self::Add)
    }

    /// Parses an action name as a model or a user would write it.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "add" | "insert" | "add_data" => Some(Self::Add),
            "update" | "modify" | "update_data" => Some(Self::Update),
            "delete" | "remove" | "delete_data" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for DmlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.verb())
    }
}

/// Position of a flow in the guided dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmlStage {
    AwaitingTarget,
    AwaitingDetails,
    AwaitingReview,
    Completed,
    Cancelled,
}

impl DmlStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingTarget => "awaiting_target",
            Self::AwaitingDetails => "awaiting_details",
            Self::AwaitingReview => "awaiting_review",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Field values gathered so far, keyed by column name.
///
/// Keys are unique: supplying a column again replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedFields {
    /// Column values to write (INSERT values, UPDATE assignments).
    pub values: BTreeMap<String, FieldValue>,
    /// Equality conditions identifying the affected rows.
    pub filter: BTreeMap<String, FieldValue>,
}

impl CollectedFields {
    /// Merges a parsed answer, returning how many entries were new or changed.
    pub fn merge(&mut self, answer: ParsedAnswer) -> usize {
        let mut changed = 0;
        for (target, pairs) in [(&mut self.values, answer.values), (&mut self.filter, answer.filter)] {
            for (column, value) in pairs {
                if target.get(&column) != Some(&value) {
                    target.insert(column, value);
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn has_filter(&self) -> bool {
        !self.filter.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.filter.is_empty()
    }
}

/// State of the one guided modification a session may have open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmlFlowState {
    pub action: DmlAction,
    pub stage: DmlStage,
    pub target_table: Option<String>,
    /// Whether the user has confirmed or named the target table.
    pub target_confirmed: bool,
    pub collected_fields: CollectedFields,
    pub generated_statement: Option<String>,
    pub user_edited: bool,
    /// Consecutive answers that did not move the flow forward.
    pub retries: u32,
    #[serde(skip)]
    pub guidance: Option<GuidanceReply>,
}

impl DmlFlowState {
    pub fn new(action: DmlAction) -> Self {
        Self {
            action,
            stage: DmlStage::AwaitingTarget,
            target_table: None,
            target_confirmed: false,
            collected_fields: CollectedFields::default(),
            generated_statement: None,
            user_edited: false,
            retries: 0,
            guidance: None,
        }
    }

    /// Statement shown to the user for approval, if the flow is in review.
    pub fn pending_review(&self) -> Option<&str> {
        match self.stage {
            DmlStage::AwaitingReview => self.generated_statement.as_deref(),
            _ => None,
        }
    }
}
