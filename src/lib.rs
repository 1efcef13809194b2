//! db-converse - a conversational assistant for SQL databases.
//!
//! Questions become validated SELECTs; requests to add, change or remove
//! data walk through a guided dialogue that ends in a simulated run.
//! Nothing is ever written to the database.

pub mod cli;
pub mod compose;
pub mod config;
pub mod db;
pub mod dml;
pub mod error;
pub mod intent;
pub mod llm;
pub mod logging;
pub mod query;
pub mod repl;
pub mod safety;
pub mod schema_provider;
pub mod session;

pub use compose::TurnReply;
pub use error::{ConverseError, Result};
pub use session::{Assistant, ConversationState};
