pub mod config;
pub mod dsl;
pub mod indexer;
pub mod search;
pub mod server;
pub mod service;

use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

use config::ServiceConfig;
use search::embedder::Embedder;
use search::ollama_embedder::OllamaEmbedder;
use search::query::SearchClient;
use search::tantivy::DocumentIndex;
use service::SearchService;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "qdsl",
    version,
    about = "YAML query DSL over a tantivy index with hybrid lexical + vector search"
)]
pub struct Cli {
    /// Embedding provider base URL (overrides QDSL_EMBED_URL)
    #[arg(long, global = true)]
    pub embed_url: Option<String>,

    /// Embedding model (overrides QDSL_EMBED_MODEL)
    #[arg(long, global = true)]
    pub embed_model: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP query API
    Serve {
        /// Index directory (overrides QDSL_INDEX_PATH)
        #[arg(long)]
        index: Option<PathBuf>,

        /// Listen address (overrides QDSL_BIND)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Index a JSON-lines file of documents
    Index {
        /// Index directory (overrides QDSL_INDEX_PATH)
        #[arg(long)]
        index: Option<PathBuf>,

        /// Do not compute embeddings for documents without a vector
        #[arg(long, default_value_t = false)]
        no_embed: bool,

        /// JSON-lines input
        file: PathBuf,
    },
    /// Run a YAML search document and print the JSON result
    Query {
        /// Index directory (overrides QDSL_INDEX_PATH)
        #[arg(long)]
        index: Option<PathBuf>,

        /// Search document; `-` reads stdin
        file: PathBuf,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ServiceConfig::from_env();
    if let Some(url) = &cli.embed_url {
        config.embed_url = url.clone();
    }
    if let Some(model) = &cli.embed_model {
        config.embed_model = model.clone();
    }

    match cli.command {
        Commands::Serve { index, bind } => {
            if let Some(path) = index {
                config.index_path = path;
            }
            if let Some(addr) = bind {
                config.bind = addr;
            }
            run_serve(&config)
        }
        Commands::Index {
            index,
            no_embed,
            file,
        } => {
            if let Some(path) = index {
                config.index_path = path;
            }
            run_index(&config, &file, no_embed)
        }
        Commands::Query { index, file } => {
            if let Some(path) = index {
                config.index_path = path;
            }
            run_query(&config, &file)
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "qdsl", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
    }
}

fn build_embedder(config: &ServiceConfig) -> Result<Arc<dyn Embedder>> {
    let embedder =
        OllamaEmbedder::with_timeout(&config.embed_url, &config.embed_model, config.embed_timeout)
            .context("build embedding client")?;
    Ok(Arc::new(embedder))
}

/// Open (or create) the index and wire the compiler and engine together.
pub fn build_service(config: &ServiceConfig, embedder: Arc<dyn Embedder>) -> Result<SearchService> {
    let index = DocumentIndex::open_or_create(&config.index_path)?;
    let client = SearchClient::from_index(index.index.clone())?;
    Ok(SearchService::new(client, embedder, config.max_depth))
}

fn run_serve(config: &ServiceConfig) -> Result<()> {
    // Built outside the runtime: the blocking HTTP client owns its own runtime.
    let service = Arc::new(build_service(config, build_embedder(config)?)?);
    tracing::info!(
        index = %config.index_path.display(),
        embed_url = %config.embed_url,
        embed_model = %config.embed_model,
        "starting query server"
    );
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(config.bind)
            .await
            .with_context(|| format!("bind {}", config.bind))?;
        server::serve(listener, service).await
    })
}

fn run_index(config: &ServiceConfig, file: &Path, no_embed: bool) -> Result<()> {
    let embedder = if no_embed {
        None
    } else {
        Some(build_embedder(config)?)
    };
    let mut index = DocumentIndex::open_or_create(&config.index_path)?;
    let stats = indexer::index_jsonl(file, &mut index, embedder.as_deref())?;
    println!(
        "indexed {} documents ({} embedded, {} skipped)",
        stats.indexed, stats.embedded, stats.skipped
    );
    Ok(())
}

fn run_query(config: &ServiceConfig, file: &Path) -> Result<()> {
    let body = if file.as_os_str() == "-" {
        let mut body = String::new();
        std::io::stdin()
            .read_to_string(&mut body)
            .context("read search document from stdin")?;
        body
    } else {
        std::fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?
    };
    let service = build_service(config, build_embedder(config)?)?;
    let result = service.search_yaml(&body)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
