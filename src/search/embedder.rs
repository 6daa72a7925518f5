//! Embedder trait for text-to-vector conversion.
//!
//! The query compiler is parameterized by exactly one [`Embedder`]; it is
//! consulted only for `vector` clauses that carry `text` instead of a raw
//! vector. Implementations must be cheap to share across request threads.

use thiserror::Error;

/// Result alias for embedding operations.
pub type EmbedderResult<T> = Result<T, EmbedError>;

/// Failures surfaced by an embedding provider.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The provider could not be reached (connect failure, timeout, broken transport).
    #[error("embedding provider unreachable at {url}: {reason}")]
    ProviderUnreachable { url: String, reason: String },

    /// The provider answered, but the payload was not a usable embedding.
    #[error("embedding provider returned a bad response: {0}")]
    ProviderBadResponse(String),
}

/// Converts text into a fixed-width embedding vector.
///
/// The model is fixed when the embedder is constructed. Each call is a fresh
/// request: there is no retry and no caching.
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>>;

    /// Model name this embedder was configured with (e.g. `all-minilm`).
    fn model(&self) -> &str;

    /// Known output width for the configured model, if the model is in the
    /// static registry. Never queried from the provider.
    fn dimension(&self) -> Option<usize>;
}
