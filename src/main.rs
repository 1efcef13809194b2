//! converse - ask a SQL database questions in plain language.

use anyhow::{bail, Context};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info};

use db_converse::cli::Cli;
use db_converse::config::Config;
use db_converse::db::{self, DatabaseClient, MockDatabaseClient};
use db_converse::llm::create_client;
use db_converse::logging;
use db_converse::repl;
use db_converse::schema_provider::SchemaProvider;
use db_converse::session::{Assistant, ConversationState};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse_args();

    if cli.is_one_shot() {
        logging::init_stderr_logging();
    } else {
        logging::init_file_logging();
    }

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;
    if let Some(provider) = &cli.llm {
        config.llm.provider = provider.clone();
    }

    let database: Arc<dyn DatabaseClient> = if cli.mock_db {
        info!("Using the built-in demo database");
        Arc::new(MockDatabaseClient::new())
    } else {
        let Some(connection) = cli.resolve_connection(&config)? else {
            bail!("No database connection configured. Use --help for usage information.");
        };
        info!("Connection: {}", connection.display_string());
        Arc::from(
            db::connect(&connection, config.assistant.max_rows)
                .await
                .with_context(|| format!("Could not connect to {}", connection.display_string()))?,
        )
    };

    let llm = Arc::from(create_client(&config.llm)?);
    let provider = Arc::new(SchemaProvider::new(Arc::clone(&database)));
    let assistant = Assistant::new(llm, provider, config.assistant.clone());

    // Fail before the first question if the schema cannot be read
    let schema = assistant.schema().await.context("Could not read the database schema")?;
    info!(tables = schema.tables.len(), "Schema loaded");

    let outcome = match &cli.message {
        Some(message) => {
            let mut state = ConversationState::new();
            let reply = assistant.submit(&mut state, message).await?;
            println!("{}", repl::format_reply(&reply));
            Ok(())
        }
        None => {
            let stdin = BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            repl::run(&assistant, stdin, &mut stdout).await
        }
    };

    if let Err(e) = database.close().await {
        error!(error = %e, "Failed to close database connection");
    }
    outcome.map_err(Into::into)
}
