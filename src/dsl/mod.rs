//! The YAML query language.
//!
//! - **[`clause`]**: the clause tree ([`QueryClause`]) and its decoding rules.
//! - **[`request`]**: a full search document: query, options, facets.
//! - **[`compiler`]**: clause tree → tantivy query plus k-NN side requests.
//! - **[`options`]**: execution options → engine request.

pub mod clause;
pub mod compiler;
pub mod options;
pub mod request;

pub use clause::{ClauseShapeError, QueryClause};
pub use compiler::{CompileError, CompiledQuery, ErrorKind, KnnRequest, QueryCompiler};
pub use options::apply_search_options;
pub use request::{SearchOptions, SearchRequest, parse_request};
