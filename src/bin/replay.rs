//! dieah-recall
//!
//! Replays JSONL transcripts through the memory engine and inspects the
//! resulting snapshot.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dieah_recall::{
    config::Config,
    embedding::{FastEmbedProvider, TokenCounter},
    engine::MemoryEngine,
    memory::MemoryType,
    storage::{read_transcript, SqliteStorage},
};

#[derive(Parser)]
#[command(name = "dieah-recall", version, about = "Replay conversations through the memory engine")]
struct Cli {
    /// Data directory for the snapshot database (default: platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file; unnamed values keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a transcript's user turns, summarize it and answer a query
    Replay {
        /// JSONL transcript, one message per line
        transcript: PathBuf,

        #[arg(long)]
        user: String,

        /// Query to build a context for after ingestion
        #[arg(long)]
        query: Option<String>,

        #[arg(long, default_value = "10")]
        limit: usize,

        /// Skip the local embedding model and run lexical-only
        #[arg(long)]
        no_embed: bool,

        /// Start from the stored snapshot and write the result back
        #[arg(long)]
        persist: bool,
    },

    /// Show what the stored snapshot holds
    Stats,

    /// List near-duplicate groups among a user's stored memories
    Optimize {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    config.ensure_dirs()?;
    tracing::info!("Data directory: {:?}", config.data_dir);

    match cli.command {
        Commands::Replay {
            transcript,
            user,
            query,
            limit,
            no_embed,
            persist,
        } => replay(config, transcript, &user, query, limit, no_embed, persist).await,
        Commands::Stats => {
            let engine = MemoryEngine::builder(config.clone()).build()?;
            engine.load_snapshot(&SqliteStorage::new(&config)?)?;
            println!("{}", serde_json::to_string_pretty(&engine.stats())?);
            for cluster in engine.clusterer().clusters() {
                println!(
                    "  {} ({} memories): {}",
                    cluster.name,
                    cluster.member_count,
                    cluster.keywords.join(", ")
                );
            }
            Ok(())
        }
        Commands::Optimize { user } => {
            let engine = MemoryEngine::builder(config.clone()).build()?;
            engine.load_snapshot(&SqliteStorage::new(&config)?)?;
            let report = engine.optimize_storage(&user);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn replay(
    config: Config,
    transcript: PathBuf,
    user: &str,
    query: Option<String>,
    limit: usize,
    no_embed: bool,
    persist: bool,
) -> Result<()> {
    let mut builder = MemoryEngine::builder(config.clone());
    if !no_embed {
        builder = builder.embedder(Arc::new(FastEmbedProvider::new(&config)?));
    }
    match TokenCounter::for_gpt() {
        Ok(counter) => builder = builder.token_counter(Arc::new(counter)),
        Err(e) => tracing::warn!("Tokenizer unavailable, estimating tokens: {}", e),
    }
    let engine = builder.build()?;

    let storage = if persist {
        let storage = SqliteStorage::new(&config)?;
        engine.load_snapshot(&storage)?;
        Some(storage)
    } else {
        None
    };

    let turns: Vec<_> = read_transcript(&transcript)?
        .into_iter()
        .filter(|m| m.user_id == user)
        .collect();
    tracing::info!("Replaying {} turns from {:?}", turns.len(), transcript);

    let mut stored = 0;
    for turn in turns.iter().filter(|t| t.is_user()) {
        let outcome = engine.ingest(user, &turn.content, MemoryType::Conversation).await;
        if outcome.stored() {
            stored += 1;
        }
    }
    println!("Stored {} new memories", stored);

    if let Some(summary) = engine.maybe_summarize(user, &turns).await {
        println!(
            "Summary {} ({} turns, compression {:.2}):\n  {}",
            summary.id, summary.turn_count, summary.compression_ratio, summary.summary_text
        );
    }

    if let Some(query) = query {
        let recent_start = turns.len().saturating_sub(5);
        let context = engine
            .retrieve(user, &query, turns[recent_start..].to_vec(), limit)
            .await;
        println!("{}", context.format_for_prompt());
        println!("({} tokens)", context.total_tokens);
    }

    if let Some(storage) = storage {
        engine.save_snapshot(&storage)?;
    }
    Ok(())
}
