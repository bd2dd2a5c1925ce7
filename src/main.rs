//! # Exo Memory CLI (`exo`)
//!
//! ## Usage
//!
//! ```bash
//! exo --config ./config/exo.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `exo init` | Create the SQLite database and run schema migrations |
//! | `exo ingest` | Ingest a piece of content (text, file, or stdin) |
//! | `exo query "<question>"` | Answer a question from stored memories |
//! | `exo commitments` | List extracted commitments with derived status |
//! | `exo get <id>` | Print a stored memory by id |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! exo init
//!
//! # Ingest a meeting transcript
//! exo ingest --source-type transcript --file standup.txt
//!
//! # Ingest a Slack thread from stdin, with caller-side dedup
//! cat thread.txt | exo ingest --source-type slack --idempotency-key thread-8841
//!
//! # Ask a question
//! exo query "what did John commit to?"
//!
//! # Overdue commitments only
//! exo commitments --status overdue
//! ```

use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use exo_memory::config::{self, Config};
use exo_memory::error::PipelineError;
use exo_memory::llm::GeminiClient;
use exo_memory::models::{CommitmentStatus, Memory, QueryResponse};
use exo_memory::orchestrator::Orchestrator;
use exo_memory::store::{CommitmentFilter, RecordStore, SqliteStore};

/// Exo Memory CLI — a personal knowledge base with LLM enrichment and
/// semantic retrieval.
#[derive(Parser)]
#[command(
    name = "exo",
    about = "Exo Memory — ingest notes and conversations, then ask questions about them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/exo.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent.
    Init,

    /// Ingest one piece of content.
    ///
    /// The text comes from the positional argument, `--file`, or stdin,
    /// in that order of preference. Requires `GEMINI_API_KEY`.
    Ingest {
        /// Content to ingest. Falls back to --file, then stdin.
        text: Option<String>,

        /// Read content from a file instead of the command line.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Origin of the content: markdown, url, slack, or transcript.
        #[arg(long, short = 't')]
        source_type: String,

        /// Extra metadata as `key=value` pairs.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,

        /// Dedup key: a second ingest with the same key is rejected.
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Answer a question from stored memories.
    ///
    /// Requires `GEMINI_API_KEY`.
    Query {
        /// The question to answer.
        question: String,

        /// Maximum number of memories to retrieve (defaults from config).
        #[arg(long)]
        top_k: Option<i64>,

        /// Minimum cosine similarity for a memory to count as relevant.
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// List commitments with their status as of today.
    Commitments {
        /// Filter by derived status: open, fulfilled, or overdue.
        #[arg(long)]
        status: Option<String>,

        /// Filter by who made the commitment.
        #[arg(long)]
        owner: Option<String>,

        /// Keep only commitments due strictly before this date (YYYY-MM-DD).
        #[arg(long)]
        due_before: Option<String>,
    },

    /// Print a stored memory by id.
    Get {
        /// Memory UUID.
        id: String,
    },
}

/// Parse a `key=value` pair for `--meta` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            // Input mistakes get a distinct exit code from infrastructure
            // failures so scripts can tell them apart.
            match e.downcast_ref::<PipelineError>() {
                Some(PipelineError::Validation(_)) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = SqliteStore::connect(&cfg.db.path).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            text,
            file,
            source_type,
            meta,
            idempotency_key,
        } => {
            let raw_text = read_content(text, file)?;
            let mut metadata = serde_json::Map::new();
            for (k, v) in meta {
                metadata.insert(k, serde_json::Value::String(v));
            }
            if let Some(key) = idempotency_key {
                metadata.insert(
                    "idempotency_key".to_string(),
                    serde_json::Value::String(key),
                );
            }

            let orch = build_orchestrator(&cfg).await?;
            let memory = orch
                .ingest(&raw_text, &source_type, serde_json::Value::Object(metadata))
                .await?;
            print_ingested(&memory);
        }
        Commands::Query {
            question,
            top_k,
            threshold,
        } => {
            let orch = build_orchestrator(&cfg).await?;
            let response = orch.query(&question, top_k, threshold).await?;
            print_answer(&response);
        }
        Commands::Commitments {
            status,
            owner,
            due_before,
        } => {
            let status = status
                .map(|s| {
                    CommitmentStatus::parse(&s).ok_or_else(|| {
                        anyhow::anyhow!("unknown status '{}': expected open, fulfilled, or overdue", s)
                    })
                })
                .transpose()?;
            let due_before = due_before
                .map(|s| {
                    chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                        .map_err(|_| anyhow::anyhow!("invalid --due-before '{}': expected YYYY-MM-DD", s))
                })
                .transpose()?;
            let filter = CommitmentFilter {
                status,
                owner,
                due_before,
            };

            let store = SqliteStore::connect(&cfg.db.path).await?;
            let today = chrono::Utc::now().date_naive();
            let rows = store.commitments(&filter, today).await?;
            if rows.is_empty() {
                println!("No commitments.");
            } else {
                for c in &rows {
                    let to = c
                        .committed_to
                        .as_deref()
                        .map(|t| format!(" -> {}", t))
                        .unwrap_or_default();
                    let due = c
                        .due_date
                        .map(|d| format!(" (due {})", d))
                        .unwrap_or_default();
                    println!(
                        "[{}] {}{}: {}{}",
                        c.status(today),
                        c.committed_by,
                        to,
                        c.description,
                        due
                    );
                }
            }
            store.close().await;
        }
        Commands::Get { id } => {
            let store = SqliteStore::connect(&cfg.db.path).await?;
            match store.get_by_id(&id).await? {
                Some(memory) => print_memory(&memory),
                None => println!("Memory not found: {}", id),
            }
            store.close().await;
        }
    }

    Ok(())
}

async fn build_orchestrator(cfg: &Config) -> anyhow::Result<Orchestrator> {
    let llm = Arc::new(GeminiClient::new(&cfg.llm)?);
    let store = Arc::new(SqliteStore::connect(&cfg.db.path).await?);
    Ok(Orchestrator::new(cfg.clone(), llm, store))
}

fn read_content(text: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(t) = text {
        return Ok(t);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e));
    }
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn print_ingested(memory: &Memory) {
    println!("Ingested memory {}", memory.id);
    println!("  Source:      {}", memory.source_type);
    println!("  Summary:     {}", memory.enriched.summary);
    println!("  Entities:    {}", memory.enriched.entities.len());
    println!("  Commitments: {}", memory.enriched.commitments.len());
}

fn print_answer(response: &QueryResponse) {
    println!("Answer:");
    println!("{}", response.answer);
    if !response.source_memories.is_empty() {
        println!();
        println!("Sources:");
        for (i, s) in response.source_memories.iter().enumerate() {
            println!("  {}. {}  score={:.3}", i + 1, s.memory_id, s.score);
            println!("     {}", s.preview);
        }
    }
}

fn print_memory(memory: &Memory) {
    println!("Memory {}", memory.id);
    println!("  Source:     {}", memory.source_type);
    println!("  Created:    {}", memory.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Hash:       {}", memory.content_hash);
    if let Some(key) = &memory.idempotency_key {
        println!("  Dedup key:  {}", key);
    }
    println!("  Summary:    {}", memory.enriched.summary);
    if !memory.enriched.entities.is_empty() {
        println!("  Entities:");
        for e in &memory.enriched.entities {
            println!("    - {} ({})", e.name, e.kind);
        }
    }
    if !memory.enriched.commitments.is_empty() {
        println!("  Commitment mentions:");
        for c in &memory.enriched.commitments {
            println!("    - {}", c);
        }
    }
    println!();
    println!("{}", memory.raw_text);
}
