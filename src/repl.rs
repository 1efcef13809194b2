//! Line-oriented terminal front-end.
//!
//! Plain lines go to the assistant; lines starting with `/` are commands.

use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error};

use crate::compose::TurnReply;
use crate::dml::{DmlAction, SimulatedExecutionResult};
use crate::error::{ConverseError, Result};
use crate::session::{Assistant, ConversationState};

/// Help text displayed for the /help command.
pub const HELP_TEXT: &str = r#"Type a question or request in plain language, or one of:
  /approve          - Simulate the statement waiting for review
  /edit <sql>       - Replace the pending statement and simulate it
  /cancel           - Drop the request in progress
  /summarize        - Describe the database
  /add <text>       - Start adding data
  /update <text>    - Start updating data
  /delete <text>    - Start deleting data
  /schema           - List tables and columns
  /refresh          - Re-read the database schema
  /clear            - Forget the conversation so far
  /help             - Show this help message
  /quit, /exit      - Leave

Nothing is ever written to the database: approved statements are simulated."#;

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Approve,
    Edit(String),
    Cancel,
    Summarize,
    Guided(DmlAction, String),
    Schema,
    RefreshSchema,
    Clear,
    Help,
    Quit,
    /// Anything that is not a command.
    Message(String),
    Unknown(String),
}

impl Command {
    /// Parses a line of input.
    pub fn parse(input: &str) -> Command {
        let input = input.trim();

        if !input.starts_with('/') {
            return Command::Message(input.to_string());
        }

        let (command, args) = match input.split_once(char::is_whitespace) {
            Some((command, args)) => (command.to_lowercase(), args.trim()),
            None => (input.to_lowercase(), ""),
        };

        match command.as_str() {
            "/approve" | "/yes" => Command::Approve,
            "/edit" => Command::Edit(args.to_string()),
            "/cancel" => Command::Cancel,
            "/summarize" | "/summary" => Command::Summarize,
            "/add" => Command::Guided(DmlAction::Add, args.to_string()),
            "/update" => Command::Guided(DmlAction::Update, args.to_string()),
            "/delete" => Command::Guided(DmlAction::Delete, args.to_string()),
            "/schema" => Command::Schema,
            "/refresh" => Command::RefreshSchema,
            "/clear" => Command::Clear,
            "/help" => Command::Help,
            "/quit" | "/exit" => Command::Quit,
            _ => Command::Unknown(command),
        }
    }
}

/// Runs an interactive session until input ends or the user quits.
///
/// Returns an error only when the session cannot continue (the database is
/// unreachable).
pub async fn run<R, W>(assistant: &Assistant, input: R, output: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut state = ConversationState::new();
    let mut lines = input.lines();

    write_out(output, "Ask me about your data. Type /help for commands.\n")?;

    loop {
        write_out(output, "> ")?;
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return Err(ConverseError::internal(format!("Failed to read input: {e}"))),
        };

        let command = Command::parse(&line);
        debug!(?command, "Input");
        if command == Command::Quit {
            break;
        }

        let text = match handle(assistant, &mut state, command).await {
            Ok(text) => text,
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Session ended");
                return Err(e);
            }
            Err(e) => format!("{}: {}", e.category(), e.message()),
        };
        if !text.is_empty() {
            write_out(output, &format!("{text}\n\n"))?;
        }
    }

    write_out(output, "Goodbye.\n")
}

/// Executes one command and returns the text to show.
pub async fn handle(
    assistant: &Assistant,
    state: &mut ConversationState,
    command: Command,
) -> Result<String> {
    match command {
        Command::Message(text) if text.is_empty() => Ok(String::new()),
        Command::Message(text) => Ok(format_reply(&assistant.submit(state, &text).await?)),
        Command::Approve => match state.pending_review().map(str::to_string) {
            Some(statement) => Ok(format_simulation(
                &assistant.approve_or_edit(state, &statement).await,
            )),
            None => Ok("Nothing is waiting for approval.".to_string()),
        },
        Command::Edit(sql) if sql.is_empty() => Ok("Usage: /edit <statement>".to_string()),
        Command::Edit(sql) => Ok(format_simulation(&assistant.approve_or_edit(state, &sql).await)),
        Command::Cancel => Ok(format_reply(&assistant.submit(state, "cancel").await?)),
        Command::Summarize => Ok(format_reply(&assistant.summarize(state).await?)),
        Command::Guided(action, description) => Ok(format_reply(
            &assistant.start_guided(state, action, &description).await?,
        )),
        Command::Schema => Ok(assistant.schema().await?.format_overview()),
        Command::RefreshSchema => {
            let schema = assistant.refresh_schema().await?;
            Ok(format!(
                "Schema refreshed. Found {} tables.",
                schema.tables.len()
            ))
        }
        Command::Clear => {
            state.clear();
            Ok("Conversation cleared.".to_string())
        }
        Command::Help => Ok(HELP_TEXT.to_string()),
        Command::Quit => Ok(String::new()),
        Command::Unknown(name) => Ok(format!(
            "Unknown command: {name}. Type /help for available commands."
        )),
    }
}

/// Renders a reply with its suggestions.
pub fn format_reply(reply: &TurnReply) -> String {
    let mut text = reply.reply.clone();
    if reply.pending_review.is_some() {
        text.push_str("\n\n(/approve to simulate it, /edit <sql> to change it, /cancel to drop it)");
    }
    if !reply.suggestions.is_empty() {
        text.push_str("\n\nYou could try:");
        for suggestion in &reply.suggestions {
            text.push_str(&format!("\n  - {suggestion}"));
        }
    }
    text
}

fn format_simulation(result: &SimulatedExecutionResult) -> String {
    let rows = match result.would_affect_rows {
        Some(n) => format!("\nEstimated rows affected: {n}"),
        None => String::new(),
    };
    format!("{}\n\n{}{rows}", result.message, result.statement)
}

fn write_out<W: Write>(output: &mut W, text: &str) -> Result<()> {
    output
        .write_all(text.as_bytes())
        .and_then(|()| output.flush())
        .map_err(|e| ConverseError::internal(format!("Failed to write output: {e}")))
}
