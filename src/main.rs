use anyhow::Result;
use clap::Parser;
use recipe_assistant::audit::{MemoryQueryLog, QueryLog, SqliteQueryLog};
use recipe_assistant::backend::{MemoryBackend, PgBackend, StorageBackend};
use recipe_assistant::config::AppConfig;
use recipe_assistant::llm::LlmClient;
use recipe_assistant::pipeline::Pipeline;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "recipe-assistant")]
#[command(about = "LLM-powered natural-language assistant for a recipe/nutrition/food-price database")]
struct Args {
    /// Session id; defaults to a fresh one per run
    #[arg(long)]
    session: Option<String>,

    /// Postgres connection string (overrides DATABASE_URL); omit to use the
    /// in-memory demo backend
    #[arg(long)]
    database_url: Option<String>,

    /// Skip the sqlite audit log and keep log entries in memory
    #[arg(long)]
    no_log_file: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = AppConfig::load()?;

    // Primary generator and syntax validator are separate client instances.
    let primary = LlmClient::new(
        config.api_key.clone(),
        config.base_url.clone(),
        config.model.clone(),
        config.llm_timeout,
    )?;
    let syntax = LlmClient::new(
        config.api_key.clone(),
        config.base_url.clone(),
        config.model.clone(),
        config.llm_timeout,
    )?;

    let backend: Arc<dyn StorageBackend> =
        match args.database_url.or_else(|| config.database_url.clone()) {
            Some(url) => {
                info!("Connecting to Postgres backend");
                Arc::new(PgBackend::connect(&url, config.db_timeout).await?)
            }
            None => {
                info!("No DATABASE_URL set, using the in-memory demo backend");
                Arc::new(MemoryBackend::demo())
            }
        };

    let log: Arc<dyn QueryLog> = if args.no_log_file {
        Arc::new(MemoryQueryLog::new())
    } else {
        Arc::new(SqliteQueryLog::open(&config.log_path)?)
    };

    let pipeline = Pipeline::new(backend, Arc::new(primary), Arc::new(syntax), log);
    let session = args
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    println!("Recipe database assistant. Ask a question, or type 'exit' to leave.");

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line.to_lowercase().as_str(), "exit" | "quit") {
            println!("Goodbye!");
            break;
        }

        let outcome = pipeline.process_turn(&session, line).await;
        println!("\n{}\n", outcome.message);
    }

    Ok(())
}
