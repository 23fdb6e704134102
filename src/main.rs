//! # formfill CLI
//!
//! The `formfill` binary is a minimal host loop around the answer engine. It
//! provides commands for database initialization, profile ingestion,
//! retrieval inspection, classification, and answering single form questions.
//!
//! ## Usage
//!
//! ```bash
//! formfill --config ./formfill.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `formfill init` | Create the SQLite database and run schema migrations |
//! | `formfill ingest` | Render the profile and embed it into the index |
//! | `formfill search "<query>"` | Inspect semantic retrieval over the profile |
//! | `formfill classify "<question>"` | Show the advisory classification for a question |
//! | `formfill answer "<question>"` | Answer a form question (optionally with choices) |
//! | `formfill providers` | List configured providers and their health |
//! | `formfill stats` | Show index and journal statistics |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! formfill init --config ./formfill.toml
//!
//! # Embed the profile
//! formfill ingest --config ./formfill.toml
//!
//! # Answer a free-text question
//! formfill answer "What is your email address?"
//!
//! # Answer a selection question; options separated by semicolons
//! formfill answer "Landesvorwahl" --options "Option auswählen;Deutschland (+49);Frankreich (+33)"
//! ```

mod answer;
mod classify;
mod config;
mod index;
mod journal;
mod models;
mod options;
mod profile;
mod progress;
mod prompts;
mod provider;
mod render;
mod stop;
mod store;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::answer::AnswerEngine;
use crate::config::Config;
use crate::models::JobContext;
use crate::progress::ProgressMode;
use crate::provider::{create_chat_provider, create_embedding_provider, LlmProvider, LocalProvider};
use crate::stop::StopToken;
use crate::store::{SqliteSink, Store};

/// formfill CLI — an AI-backed question answering engine for automated job
/// application forms.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/formfill.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "formfill",
    about = "formfill — an AI-backed question answering engine for job application forms",
    version,
    long_about = "formfill answers job application form questions from a structured applicant \
    profile: direct profile lookups where possible, LLM answers constrained by retrieved \
    profile context otherwise, and strict coercion onto the allowed choices of selection \
    fields. Answered questions are journaled as conversation records."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./formfill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (index_chunks, conversations). This command is idempotent — running
    /// it multiple times is safe.
    Init,

    /// Render the profile and embed it into the index.
    ///
    /// Flattens the profile document into field entries, requests an
    /// embedding for each through the configured provider, and persists the
    /// index. Entries that fail to embed are kept but excluded from
    /// retrieval.
    Ingest {
        /// Progress output: `off`, `human`, or `json` (stderr).
        /// Defaults to `human` when stderr is a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Inspect semantic retrieval over the ingested profile.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the advisory classification for a question.
    Classify {
        /// The form question text.
        question: String,
    },

    /// Answer a form question.
    ///
    /// With `--options`, the answer is guaranteed to be exactly one of the
    /// given choices. The conversation record is flushed to the store before
    /// the command exits.
    Answer {
        /// The form question text.
        question: String,

        /// Allowed choices, separated by semicolons.
        #[arg(long)]
        options: Option<String>,

        /// Company name used for labelling the conversation record.
        #[arg(long, default_value = "")]
        company: String,

        /// Job title used for labelling the conversation record.
        #[arg(long, default_value = "")]
        title: String,
    },

    /// List configured providers and their health status.
    ///
    /// Probes the chat and embedding back-ends and, for a local provider,
    /// lists the models it reports. Useful for verifying configuration
    /// before answering.
    Providers,

    /// Show index and journal statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(concat!(env!("CARGO_PKG_NAME"), "=info"))),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = Store::connect(&cfg.store).await?;
            store.migrate().await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { progress } => {
            run_ingest(&cfg, progress.as_deref()).await?;
        }
        Commands::Search { query, limit } => {
            run_search(&cfg, &query, limit).await?;
        }
        Commands::Classify { question } => {
            run_classify(&cfg, &question).await?;
        }
        Commands::Answer {
            question,
            options,
            company,
            title,
        } => {
            run_answer(&cfg, &question, options.as_deref(), company, title).await?;
        }
        Commands::Providers => {
            run_providers(&cfg).await;
        }
        Commands::Stats => {
            run_stats(&cfg).await?;
        }
    }

    Ok(())
}

fn progress_mode(flag: Option<&str>) -> Result<ProgressMode> {
    match flag {
        None => Ok(ProgressMode::default_for_tty()),
        Some("off") => Ok(ProgressMode::Off),
        Some("human") => Ok(ProgressMode::Human),
        Some("json") => Ok(ProgressMode::Json),
        Some(other) => anyhow::bail!("Unknown progress mode: {}. Use off, human, or json.", other),
    }
}

async fn build_engine(cfg: &Config, job: JobContext) -> Result<(AnswerEngine, Arc<Store>)> {
    let profile = profile::Profile::load(&cfg.profile.path)?;

    let store = Arc::new(Store::connect(&cfg.store).await?);
    store.migrate().await?;

    let chat = create_chat_provider(&cfg.chat)?;
    let embedder = if cfg.embedding.is_enabled() {
        Some(create_embedding_provider(&cfg.embedding)?)
    } else {
        None
    };

    let sink = Arc::new(SqliteSink::new(Arc::clone(&store)));
    let engine = AnswerEngine::new(
        cfg,
        profile,
        chat,
        embedder,
        Arc::clone(&store),
        sink,
        job,
        StopToken::new(),
    );

    Ok((engine, store))
}

async fn run_ingest(cfg: &Config, progress_flag: Option<&str>) -> Result<()> {
    let reporter = progress_mode(progress_flag)?.reporter();
    let (mut engine, store) = build_engine(cfg, JobContext::default()).await?;

    let report = engine.ingest(reporter.as_ref()).await?;

    println!("ingest");
    println!("  fields rendered: {}", report.total);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);
    println!("  chunks spilled: {}", report.chunks_spilled);
    println!("ok");

    store.close().await;
    Ok(())
}

async fn run_search(cfg: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let (engine, store) = build_engine(cfg, JobContext::default()).await?;
    let k = limit.unwrap_or(cfg.retrieval.top_k);

    let hits = engine.search(query, k).await?;
    if hits.is_empty() {
        println!("No results.");
    } else {
        for (i, (key, score)) in hits.iter().enumerate() {
            println!("{}. [{:.3}] {}", i + 1, score, key);
        }
    }

    store.close().await;
    Ok(())
}

async fn run_classify(cfg: &Config, question: &str) -> Result<()> {
    let (mut engine, store) = build_engine(cfg, JobContext::default()).await?;
    let classification = engine.classify(question).await;
    println!("{}", serde_json::to_string_pretty(&classification)?);
    store.close().await;
    Ok(())
}

async fn run_answer(
    cfg: &Config,
    question: &str,
    options: Option<&str>,
    company: String,
    title: String,
) -> Result<()> {
    let job = JobContext {
        company,
        title,
        ..Default::default()
    };
    let (mut engine, store) = build_engine(cfg, job).await?;

    let options: Option<Vec<String>> = options.map(|o| {
        o.split(';')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    });

    let answer = engine.answer(question, options.as_deref()).await;

    // Host loop contract: flush the journal before leaving the page.
    engine.flush().await;

    println!("{answer}");
    store.close().await;
    Ok(())
}

async fn run_providers(cfg: &Config) {
    println!("providers");

    match create_chat_provider(&cfg.chat) {
        Ok(chat) => {
            let status = if chat.is_available().await {
                "available"
            } else {
                "unreachable"
            };
            println!("  chat: {} ({})  {}", chat.name(), cfg.chat.model, status);
            if cfg.chat.provider == "local" {
                print_local_models(cfg.chat.base_url.as_deref(), cfg.chat.timeout_secs).await;
            }
        }
        Err(e) => println!("  chat: error — {e}"),
    }

    if !cfg.embedding.is_enabled() {
        println!("  embedding: disabled");
        return;
    }
    match create_embedding_provider(&cfg.embedding) {
        Ok(embedder) => {
            let status = if embedder.is_available().await {
                "available"
            } else {
                "unreachable"
            };
            println!(
                "  embedding: {} ({})  {}",
                embedder.name(),
                cfg.embedding.model.as_deref().unwrap_or("-"),
                status
            );
        }
        Err(e) => println!("  embedding: error — {e}"),
    }
}

async fn print_local_models(base_url: Option<&str>, timeout_secs: u64) {
    let Ok(local) = LocalProvider::new(base_url, timeout_secs) else {
        return;
    };
    match local.list_models().await {
        Ok(models) if !models.is_empty() => {
            println!("    models: {}", models.join(", "));
        }
        Ok(_) => println!("    models: none installed"),
        Err(e) => println!("    models: unavailable ({e})"),
    }
}

async fn run_stats(cfg: &Config) -> Result<()> {
    let store = Store::connect(&cfg.store).await?;
    store.migrate().await?;

    let chunks = store.index_chunk_count().await?;
    let mut entries = 0usize;
    let mut embedded = 0usize;
    for idx in 0..chunks {
        let chunk = store.get_index_chunk(idx).await?;
        embedded += chunk.iter().filter(|e| e.vector.is_some()).count();
        entries += chunk.len();
    }

    println!("stats");
    println!("  index chunks: {chunks}");
    println!("  entries: {entries}");
    println!("  embedded: {embedded}");
    println!("  conversations: {}", store.conversation_count().await?);

    let recent = store.recent_conversations(5).await?;
    if !recent.is_empty() {
        println!("  recent:");
        for (question_id, answer, created_at) in recent {
            let date = chrono::DateTime::from_timestamp(created_at, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!("    [{date}] {question_id} -> {answer}");
        }
    }

    store.close().await;
    Ok(())
}
