//! Static registry of known embedding models.
//!
//! The registry answers one question without touching the network: how wide
//! is the vector a given model produces? The compiler uses it to reject raw
//! query vectors whose length cannot match the indexed vectors.
//!
//! # Known Models
//!
//! | Name | Dimension | Notes |
//! |------|-----------|-------|
//! | all-minilm | 384 | Default model |
//! | nomic-embed-text | 768 | Long context |
//! | mxbai-embed-large | 1024 | |
//! | snowflake-arctic-embed | 1024 | |
//! | bge-m3 | 1024 | Multilingual |
//! | granite-embedding | 384 | |
//!
//! Ollama model references may carry a tag (`all-minilm:latest`,
//! `all-minilm:l6-v2`); the tag is ignored for lookup.

/// Default model name when none is configured.
pub const DEFAULT_MODEL: &str = "all-minilm";

/// Information about a registered embedding model.
#[derive(Debug, Clone)]
pub struct RegisteredModel {
    /// Provider-side model name (e.g., "all-minilm").
    pub name: &'static str,
    /// Output dimension.
    pub dimension: usize,
    /// Human-readable description.
    pub description: &'static str,
}

pub static MODELS: &[RegisteredModel] = &[
    RegisteredModel {
        name: "all-minilm",
        dimension: 384,
        description: "sentence-transformers all-MiniLM-L6-v2 (default)",
    },
    RegisteredModel {
        name: "nomic-embed-text",
        dimension: 768,
        description: "Nomic Embed Text v1.5",
    },
    RegisteredModel {
        name: "mxbai-embed-large",
        dimension: 1024,
        description: "mixedbread.ai large embedding model",
    },
    RegisteredModel {
        name: "snowflake-arctic-embed",
        dimension: 1024,
        description: "Snowflake Arctic Embed L",
    },
    RegisteredModel {
        name: "bge-m3",
        dimension: 1024,
        description: "BAAI BGE-M3 multilingual",
    },
    RegisteredModel {
        name: "granite-embedding",
        dimension: 384,
        description: "IBM Granite embedding 30M",
    },
];

/// Strip an Ollama tag (`name:tag`) and normalise case.
fn base_name(model: &str) -> String {
    let trimmed = model.trim();
    let base = trimmed.split_once(':').map_or(trimmed, |(name, _)| name);
    base.to_ascii_lowercase()
}

/// Look up a model by name, ignoring any `:tag` suffix.
pub fn lookup(model: &str) -> Option<&'static RegisteredModel> {
    let wanted = base_name(model);
    MODELS.iter().find(|m| m.name == wanted)
}

/// Known output dimension for `model`, if registered.
pub fn dimension_for(model: &str) -> Option<usize> {
    lookup(model).map(|m| m.dimension)
}

/// Whether two model references name the same model (tags ignored).
pub fn same_model(a: &str, b: &str) -> bool {
    base_name(a) == base_name(b)
}
