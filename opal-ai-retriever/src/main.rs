use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use opal_ai_embed::{EmbedConfig, HttpEmbedProvider};
use opal_ai_retriever::retrieval::{
    corpus::{CorpusLoader, DirectoryLoader},
    index_manager::{IndexManager, IndexManagerConfig, SyncOptions},
    ledger::JsonLedgerStore,
};
use opal_ai_retriever::storage::sqlite_index::SqliteVectorIndex;

/// A CLI tool to keep a semantic index in sync with a document corpus and
/// query it.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the fingerprint ledger and the vector index
    #[arg(short, long, default_value = ".opal")]
    state_dir: PathBuf,

    /// Base URL of the embeddings API
    #[arg(long, default_value = "https://api.openai.com/v1")]
    api_base: String,

    /// Embedding model name
    #[arg(long, default_value = "text-embedding-3-small")]
    model: String,

    /// Embedding dimension of the model
    #[arg(long, default_value_t = 1536)]
    dimension: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile ledger and index with the documents under a directory
    Sync {
        /// Corpus root to snapshot
        corpus: PathBuf,
        /// Re-embed every document, ignoring stored fingerprints
        #[arg(long)]
        force: bool,
    },
    /// Search the indexed corpus semantically
    Search {
        /// Query text
        query: String,
        /// Maximum number of results
        #[arg(short = 'k', long, default_value_t = 5)]
        limit: usize,
        /// Minimum cosine similarity (inclusive, in [-1, 1])
        #[arg(short, long, default_value_t = 0.25)]
        threshold: f32,
        /// Emit results as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Show ledger and index statistics
    Stats {
        /// Emit statistics as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let embed_config = EmbedConfig::new(&args.api_base, &args.model, args.dimension)
        .with_api_key(std::env::var("OPENAI_API_KEY").ok());
    let provider = Arc::new(HttpEmbedProvider::new(embed_config)?);
    let index = Arc::new(SqliteVectorIndex::open(&args.state_dir).await?);
    let ledger_store = Arc::new(JsonLedgerStore::new(args.state_dir.join("ledger.json")));

    let manager =
        IndexManager::new(IndexManagerConfig::new(), provider, index, ledger_store).await?;

    match args.command {
        Commands::Sync { corpus, force } => {
            let loader = DirectoryLoader::new(&corpus);
            let documents = loader.load().await?;
            println!("Loaded {} documents from {}", documents.len(), corpus.display());

            let report = manager
                .sync_with_options(documents, SyncOptions { force })
                .await?;

            println!(
                "Sync finished in {:.2}s: {} new, {} changed, {} unchanged, {} removed",
                report.elapsed_seconds, report.new, report.changed, report.unchanged, report.removed
            );
            println!(
                "Indexed {} chunks ({} embeddings generated)",
                report.chunks_indexed, report.embeddings_generated
            );
            if !report.is_complete() {
                println!("{} documents failed:", report.failed.len());
                for failure in &report.failed {
                    println!("  {} [{}]: {}", failure.document_id, failure.kind, failure.error);
                }
                process::exit(2);
            }
            Ok(())
        }
        Commands::Search {
            query,
            limit,
            threshold,
            json,
        } => {
            let hits = manager.search(&query, limit, threshold).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("No results above threshold {threshold}");
            } else {
                println!("Found {} results:", hits.len());
                for hit in &hits {
                    println!(
                        "  {:.4} | {}#{} | {}",
                        hit.similarity,
                        hit.document_id,
                        hit.sequence,
                        preview(&hit.content)
                    );
                }
            }
            Ok(())
        }
        Commands::Stats { json } => {
            let mut stats = manager.stats().await;
            stats.index_size_bytes = std::fs::metadata(args.state_dir.join(".opal-index.db"))
                .ok()
                .map(|m| m.len());

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Documents:         {}", stats.documents);
                println!("Vectors:           {}", stats.vectors);
                println!(
                    "Last sync:         {}",
                    stats
                        .last_sync_at
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "never (this process)".to_string())
                );
                println!("Failing documents: {}", stats.failing_documents);
                if let Some(bytes) = stats.index_size_bytes {
                    println!("Index size:        {bytes} bytes");
                }
            }
            Ok(())
        }
    }
}

/// First line of a chunk, truncated for terminal output.
fn preview(content: &str) -> String {
    let line = content.lines().next().unwrap_or_default();
    let mut end = line.len().min(96);
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    if end < line.len() {
        format!("{}…", &line[..end])
    } else {
        line.to_string()
    }
}
