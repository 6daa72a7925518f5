//! Search layer facade.
//!
//! - **[`tantivy`]**: schema, index creation and document ingestion.
//! - **[`query`]**: engine requests and their execution (lexical + k-NN fusion,
//!   sorting, projection, highlighting, explain).
//! - **[`vector`]**: exact cosine top-k over stored vectors.
//! - **[`facets`]**: terms / numeric range / date range aggregations.
//! - **[`embedder`]**: the text → vector trait the compiler depends on.
//! - **[`ollama_embedder`]**: HTTP embedder for Ollama-compatible providers.
//! - **[`embedder_registry`]**: static model → dimension table.

pub mod embedder;
pub mod embedder_registry;
pub mod facets;
pub mod ollama_embedder;
pub mod query;
pub mod tantivy;
pub mod vector;
