use anyhow::Result;
use clap::{Parser, Subcommand};
use engram::embedding::create_provider;
use engram::memory::MemoryEngine;
use engram::{cli, EngramConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "engram", version, about = "Hierarchical sector graph memory engine")]
struct Cli {
    /// Path to a config file (default: ~/.engram/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a new memory
    Add {
        /// Memory content
        content: String,
        /// Tags, repeatable
        #[arg(short, long)]
        tag: Vec<String>,
        /// Metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
    },
    /// Retrieve memories for a query
    Query {
        text: String,
        /// Number of results
        #[arg(short)]
        k: Option<usize>,
        /// Restrict to sectors, repeatable
        #[arg(short, long)]
        sector: Vec<String>,
        /// Drop results below this salience
        #[arg(long)]
        min_salience: Option<f64>,
    },
    /// Boost a memory's salience
    Reinforce {
        id: String,
        #[arg(short, long, default_value_t = 0.1)]
        boost: f64,
    },
    /// Rewrite a memory's content or tags
    Update {
        id: String,
        #[arg(short, long)]
        content: Option<String>,
        #[arg(short, long)]
        tag: Option<Vec<String>>,
    },
    /// Run one decay sweep
    Decay,
    /// Remove waypoints below the prune threshold
    Prune,
    /// Show store statistics
    Stats,
    /// Run the background maintenance loop until interrupted
    Maintain {
        /// Seconds between decay sweeps
        #[arg(long, default_value_t = 300)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let config = match &args.config {
        Some(path) => EngramConfig::load_from(path)?,
        None => EngramConfig::load()?,
    };

    // Log to stderr so stdout stays clean for JSON output.
    let filter = EnvFilter::try_new(&config.runtime.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let provider = create_provider(&config.embedding);
    let engine = MemoryEngine::new(config, provider)?;

    match args.command {
        Command::Add { content, tag, metadata } => cli::add(&engine, content, tag, metadata)?,
        Command::Query { text, k, sector, min_salience } => {
            cli::query(&engine, text, k, sector, min_salience)?
        }
        Command::Reinforce { id, boost } => cli::reinforce(&engine, id, boost)?,
        Command::Update { id, content, tag } => cli::update(&engine, id, content, tag)?,
        Command::Decay => cli::decay(&engine)?,
        Command::Prune => cli::prune(&engine)?,
        Command::Stats => cli::stats(&engine)?,
        Command::Maintain { interval } => cli::maintain(Arc::new(engine), interval).await?,
    }

    Ok(())
}
