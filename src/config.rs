//! Service configuration.
//!
//! Values come from defaults, then environment variables (a `.env` file is
//! honoured through `dotenvy`), then CLI flags applied by the caller.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use crate::dsl::compiler::DEFAULT_MAX_DEPTH;
use crate::search::embedder_registry::DEFAULT_MODEL;
use crate::search::ollama_embedder::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT};

pub const DEFAULT_BIND: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 8080));

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Directory holding the tantivy index.
    pub index_path: PathBuf,
    /// Address the HTTP server listens on.
    pub bind: SocketAddr,
    /// Embedding provider base URL.
    pub embed_url: String,
    /// Embedding model used for `vector` clauses with `text` and for indexing.
    pub embed_model: String,
    /// Per-request timeout for the embedding provider.
    pub embed_timeout: Duration,
    /// Maximum `bool` nesting accepted by the compiler.
    pub max_depth: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            bind: DEFAULT_BIND,
            embed_url: DEFAULT_BASE_URL.to_string(),
            embed_model: DEFAULT_MODEL.to_string(),
            embed_timeout: DEFAULT_TIMEOUT,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ServiceConfig {
    /// Load config from environment variables. Unparsable values are ignored
    /// with a warning and the default is kept.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(path) = var("QDSL_INDEX_PATH") {
            cfg.index_path = PathBuf::from(path);
        }

        if let Some(val) = var("QDSL_BIND") {
            match val.parse::<SocketAddr>() {
                Ok(addr) => cfg.bind = addr,
                Err(e) => tracing::warn!(value = %val, error = %e, "ignoring invalid QDSL_BIND"),
            }
        }

        if let Some(url) = var("QDSL_EMBED_URL") {
            cfg.embed_url = url;
        }

        if let Some(model) = var("QDSL_EMBED_MODEL")
            && !model.trim().is_empty()
        {
            cfg.embed_model = model;
        }

        if let Some(val) = var("QDSL_EMBED_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) => cfg.embed_timeout = Duration::from_millis(ms),
                Err(e) => {
                    tracing::warn!(value = %val, error = %e, "ignoring invalid QDSL_EMBED_TIMEOUT_MS")
                }
            }
        }

        if let Some(val) = var("QDSL_MAX_DEPTH") {
            match val.parse::<usize>() {
                Ok(depth) if depth > 0 => cfg.max_depth = depth,
                Ok(_) => tracing::warn!(value = %val, "ignoring zero QDSL_MAX_DEPTH"),
                Err(e) => {
                    tracing::warn!(value = %val, error = %e, "ignoring invalid QDSL_MAX_DEPTH")
                }
            }
        }

        cfg
    }
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "qdsl", "qdsl")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".qdsl"))
}

pub fn default_index_path() -> PathBuf {
    default_data_dir().join("index")
}
