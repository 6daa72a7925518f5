//! Request handling core shared by the HTTP server and the CLI:
//! decode → compile → apply options → execute.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, warn};

use crate::dsl::compiler::{CompileError, QueryCompiler};
use crate::dsl::options::apply_search_options;
use crate::dsl::request::{SearchRequest, parse_request};
use crate::search::embedder::Embedder;
use crate::search::query::{
    DocumentList, EngineError, EngineRequest, MAX_LISTED_DOCUMENTS, SearchClient, SearchResult,
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to parse YAML: {0}")]
    Decode(#[from] serde_yaml::Error),

    #[error("failed to build query: {0}")]
    Compile(#[from] CompileError),

    #[error("search failed: {0}")]
    Engine(#[from] EngineError),

    #[error("failed to render mapping: {0}")]
    Mapping(#[source] serde_yaml::Error),
}

impl ServiceError {
    /// Decode and compile failures, and malformed engine requests, are the
    /// caller's fault; everything else is ours.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Decode(_) | Self::Compile(_) => true,
            Self::Engine(e) => e.is_client_error(),
            Self::Mapping(_) => false,
        }
    }
}

pub struct SearchService {
    compiler: QueryCompiler,
    client: SearchClient,
}

impl SearchService {
    pub fn new(client: SearchClient, embedder: Arc<dyn Embedder>, max_depth: usize) -> Self {
        let compiler =
            QueryCompiler::new(client.index().clone(), embedder).with_max_depth(max_depth);
        Self { compiler, client }
    }

    pub fn compiler(&self) -> &QueryCompiler {
        &self.compiler
    }

    /// Decode a YAML search document and execute it.
    pub fn search_yaml(&self, body: &str) -> Result<SearchResult, ServiceError> {
        let request = parse_request(body)
            .inspect_err(|e| debug!(error = %e, "rejected search document"))?;
        self.search(&request)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult, ServiceError> {
        let started = Instant::now();
        let compiled = self.compiler.compile(&request.query).inspect_err(|e| {
            debug!(error = %e, kind = ?e.kind(), "query compilation failed");
        })?;

        let mut engine_request = EngineRequest::from_compiled(compiled);
        engine_request.facets = request.facets.clone();
        apply_search_options(&mut engine_request, request.options.as_ref());

        let result = self.client.search(&engine_request).inspect_err(|e| {
            if !e.is_client_error() {
                warn!(error = %e, "search execution failed");
            }
        })?;
        debug!(
            total = result.total,
            hits = result.hits.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search handled"
        );
        Ok(result)
    }

    pub fn list_documents(&self) -> Result<DocumentList, ServiceError> {
        Ok(self.client.list_documents(MAX_LISTED_DOCUMENTS)?)
    }

    /// The index schema rendered as YAML.
    pub fn mapping_yaml(&self) -> Result<String, ServiceError> {
        serde_yaml::to_string(&self.client.index().schema()).map_err(ServiceError::Mapping)
    }

    pub fn reload(&self) -> Result<(), ServiceError> {
        Ok(self.client.reload()?)
    }
}
