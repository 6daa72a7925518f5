//! Ollama-compatible HTTP embedder.
//!
//! Sends `POST {base_url}/api/embeddings` with `{"model", "prompt"}` and reads
//! `{"embedding": [f32, ...]}` back. Uses the reqwest blocking client: the
//! compiler is synchronous and callers run it off the async executor.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::embedder::{EmbedError, Embedder, EmbedderResult};
use super::embedder_registry;

/// Default provider address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default request timeout. A hung provider would otherwise block the
/// compiling request forever.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Values previewed in debug logs.
const PREVIEW_VALUES: usize = 10;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Embedder backed by an Ollama server.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OllamaEmbedder {
    /// Create an embedder with the default timeout.
    pub fn new(base_url: &str, model: &str) -> EmbedderResult<Self> {
        Self::with_timeout(base_url, model, DEFAULT_TIMEOUT)
    }

    /// Create an embedder with an explicit request timeout.
    pub fn with_timeout(base_url: &str, model: &str, timeout: Duration) -> EmbedderResult<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedError::ProviderUnreachable {
                url: base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            base_url,
            model: model.to_string(),
            client,
        })
    }

    /// Provider base address (without trailing slash).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embeddings", self.base_url)
    }
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        let started = Instant::now();
        let url = self.endpoint();
        debug!(
            model = %self.model,
            text_len = text.chars().count(),
            text = %truncate_text(text, 50),
            "embedding text"
        );

        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .map_err(|e| {
                warn!(url = %url, error = %e, "embedding request failed");
                EmbedError::ProviderUnreachable {
                    url: url.clone(),
                    reason: e.to_string(),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbedError::ProviderBadResponse(format!(
                "status {status}: {}",
                truncate_text(body.trim(), 200)
            )));
        }

        let body = response.bytes().map_err(|e| EmbedError::ProviderUnreachable {
            url: url.clone(),
            reason: format!("failed to read response body: {e}"),
        })?;
        let parsed: EmbedResponse = serde_json::from_slice(&body)
            .map_err(|e| EmbedError::ProviderBadResponse(format!("malformed payload: {e}")))?;

        if parsed.embedding.is_empty() {
            return Err(EmbedError::ProviderBadResponse(
                "provider returned an empty embedding".into(),
            ));
        }

        let preview: Vec<String> = parsed
            .embedding
            .iter()
            .take(PREVIEW_VALUES)
            .map(|v| format!("{v:.4}"))
            .collect();
        debug!(
            dims = parsed.embedding.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            preview = %preview.join(", "),
            "generated embedding"
        );

        Ok(parsed.embedding)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        embedder_registry::dimension_for(&self.model)
    }
}

/// Truncate to `max_chars` characters, appending "..." when cut.
fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
