use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ria_council::config::{Config, LogFormat};
use ria_council::corpus::Chunk;
use ria_council::graph::KnowledgeGraph;
use ria_council::service::AssessmentService;
use ria_council::workflow::engine::PersistPaths;
use ria_council::workflow::ProgressEvent;

#[derive(Parser)]
#[command(name = "ria-council", about = "Deliberative multi-model RIA synthesis engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector store directory.
    #[arg(long, default_value = "./data/vector_store")]
    store_dir: PathBuf,

    /// Knowledge graph blob path.
    #[arg(long, default_value = "./data/knowledge_graph.json")]
    graph_path: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest chunk JSON files into the vector store and knowledge graph.
    Ingest {
        /// Directory of chunk JSON files (each an array of chunks).
        chunks_dir: PathBuf,
    },
    /// Run a full assessment for a proposal and stream progress.
    Assess {
        /// File containing the proposal text.
        proposal_file: PathBuf,
        /// Optional JSON context metadata (jurisdiction, category, year).
        #[arg(long)]
        context: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "RIA council engine starting..."
    );

    let persist = PersistPaths {
        store_dir: Some(cli.store_dir.clone()),
        graph_path: Some(cli.graph_path.clone()),
    };

    match cli.command {
        Command::Ingest { chunks_dir } => {
            ingest(config, &cli.store_dir, &cli.graph_path, &chunks_dir).await
        }
        Command::Assess {
            proposal_file,
            context,
        } => assess(config, persist, &proposal_file, context).await,
    }
}

async fn ingest(
    config: Config,
    store_dir: &PathBuf,
    graph_path: &PathBuf,
    chunks_dir: &PathBuf,
) -> anyhow::Result<()> {
    use ria_council::embedding::{Embedder, HashEmbedder, RemoteEmbedder};
    use ria_council::index::VectorStore;
    use std::sync::Arc;

    let embedder: Arc<dyn Embedder> = if config.embedding.base_url.is_empty() {
        Arc::new(HashEmbedder::new(config.embedding.dim))
    } else {
        Arc::new(RemoteEmbedder::new(&config.embedding, config.request.clone())?)
    };

    let mut store = if store_dir.join("metadata.json").exists() {
        VectorStore::load(store_dir, embedder.clone())?
    } else {
        VectorStore::new(embedder)
    };

    let mut all_chunks: Vec<Chunk> = Vec::new();
    for entry in std::fs::read_dir(chunks_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = std::fs::read(&path)?;
        let chunks: Vec<Chunk> = serde_json::from_slice(&bytes)?;
        info!(file = %path.display(), chunks = chunks.len(), "Loaded chunk file");
        all_chunks.extend(chunks);
    }
    if all_chunks.is_empty() {
        anyhow::bail!("no chunk files found in {}", chunks_dir.display());
    }

    let added = store.add(&all_chunks).await?;
    store.persist(store_dir)?;

    let graph = KnowledgeGraph::build_from_chunks(&all_chunks);
    graph.persist(graph_path)?;

    let stats = store.stats();
    info!(
        added,
        entries = stats.entries,
        graph_nodes = graph.node_count(),
        graph_edges = graph.edge_count(),
        "Ingestion complete"
    );
    println!(
        "Ingested {} chunks ({} new). Store: {} entries. Graph: {} nodes, {} edges.",
        all_chunks.len(),
        added,
        stats.entries,
        graph.node_count(),
        graph.edge_count()
    );
    Ok(())
}

async fn assess(
    config: Config,
    persist: PersistPaths,
    proposal_file: &PathBuf,
    context: Option<String>,
) -> anyhow::Result<()> {
    let proposal = std::fs::read_to_string(proposal_file)?;
    let context_metadata: serde_json::Value = match context {
        Some(raw) => serde_json::from_str(&raw)?,
        None => serde_json::json!({}),
    };

    let service = AssessmentService::build(config, persist).await?;

    let assessment_id = match service.create_assessment(&proposal, context_metadata).await {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "Proposal rejected");
            anyhow::bail!("proposal rejected: {}", e);
        }
    };
    println!("Assessment created: {}", assessment_id);

    let mut events = service.stream_assessment(&assessment_id).await?;
    while let Some(event) = events.recv().await {
        match &event {
            ProgressEvent::ReviewRequired {
                review_type,
                assessment_id,
            } => {
                println!(
                    "review required ({}) for {}: submit a decision via the review API",
                    review_type, assessment_id
                );
            }
            ProgressEvent::WorkflowComplete => {
                println!("workflow complete");
                break;
            }
            ProgressEvent::Error { message } => {
                println!("error: {}", message);
                break;
            }
            other => println!("{}", serde_json::to_string(other)?),
        }
    }

    let status = service.get_status(&assessment_id).await?;
    println!("Final status: {}", status);
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
