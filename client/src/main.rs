//! Lexicon CLI - offline access to the local dictionary store.
//!
//! Imports entries, searches them and reports store statistics against the
//! database named by `LEXICON_DB_PATH`. Nothing here talks to the network.

use clap::{Parser, Subcommand};
use lexicon_client::{Config, HydrationReport, LocalStoreManager, SearchIndexHydrator, UiState};
use lexicon_engine::EntrySchema;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "lexicon-client")]
#[command(about = "Offline access to the local Lexicon dictionary store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Create one local entry per line of a JSON Lines file
    Import { file: PathBuf },
    /// Rebuild the search index and print ranked matches
    Search {
        #[arg(required = true)]
        query: Vec<String>,

        /// Maximum number of hits to print
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Print entry, pending and index counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lexicon_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let store = Arc::new(LocalStoreManager::new(
        config.db_path.clone(),
        config.max_connections,
    ));
    store.init().await.map_err(|err| err.to_user_facing())?;

    match cli.command {
        Command::Import { file } => import(&store, &file).await?,
        Command::Search { query, limit } => {
            let hydrator = hydrator(&store, &config);
            hydrator.hydrate().await?;
            for hit in hydrator.search(&query.join(" "), limit).await? {
                let headword = hit
                    .record
                    .payload
                    .get("headword")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?");
                println!("{:>8.3}  {}  ({})", hit.score, headword, hit.record.key);
            }
        }
        Command::Stats => {
            let hydrator = hydrator(&store, &config);
            let HydrationReport { indexed, skipped } = hydrator.hydrate().await?;
            println!("entries:    {}", store.count().await?);
            println!("pending:    {}", store.pending_count().await?);
            println!("checkpoint: {}", store.checkpoint().await?);
            println!("indexed:    {}", indexed);
            println!("skipped:    {}", skipped);
        }
    }

    Ok(())
}

fn hydrator(store: &Arc<LocalStoreManager>, config: &Config) -> SearchIndexHydrator {
    SearchIndexHydrator::new(
        Arc::clone(store),
        UiState::new(),
        EntrySchema::dictionary(),
        config.hydrate_yield_every,
    )
}

/// Create one local entry per line of a JSON Lines file.
async fn import(
    store: &LocalStoreManager,
    file: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = tokio::fs::File::open(file).await?;
    let mut lines = BufReader::new(file).lines();
    let (mut imported, mut skipped) = (0u64, 0u64);
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let payload: serde_json::Value = match serde_json::from_str(&line) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(line = line_no, "Skipping malformed line: {}", err);
                skipped += 1;
                continue;
            }
        };

        match store.create_local(payload).await {
            Ok(_) => imported += 1,
            Err(lexicon_client::Error::Engine(err)) => {
                tracing::warn!(line = line_no, "Skipping invalid entry: {}", err);
                skipped += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }

    tracing::info!(imported, skipped, "Import finished");
    println!("imported {} entries, skipped {}", imported, skipped);
    Ok(())
}
