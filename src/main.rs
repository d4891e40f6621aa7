use clap::{Parser, Subcommand};
use rag_chat::Result;
use rag_chat::commands::{chat, ingest, load_config, rebuild, search, serve, show_status};
use rag_chat::config::{get_config_dir, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rag-chat")]
#[command(about = "Chat with your documents using retrieval-augmented generation")]
#[command(version)]
struct Cli {
    /// Configuration directory (defaults to ~/.rag-chat)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding and chat model settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Start the HTTP API
    Serve,
    /// Chat with the knowledge base in the terminal
    Chat,
    /// Add files or directories to the knowledge base
    Ingest {
        /// Files or directories to load
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Rebuild the index from every file in the data directory
    Rebuild,
    /// Show the chunks closest to a query
    Search {
        query: String,
        /// Number of results (defaults to the configured retrieval k)
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Show the state of the index and providers
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Serve => serve(load_config(&config_dir)?).await?,
        Commands::Chat => chat(load_config(&config_dir)?).await?,
        Commands::Ingest { paths } => ingest(&load_config(&config_dir)?, &paths).await?,
        Commands::Rebuild => rebuild(&load_config(&config_dir)?).await?,
        Commands::Search { query, k } => search(&load_config(&config_dir)?, &query, k).await?,
        Commands::Status => show_status(&load_config(&config_dir)?).await?,
    }

    Ok(())
}
