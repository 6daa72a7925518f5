//! Query compiler: [`QueryClause`] tree → tantivy query + k-NN side requests.
//!
//! The compiler holds the [`Index`] only to resolve field names, field types
//! and analyzers; it never searches. Vector clauses do not become boolean
//! children: they are hoisted into [`CompiledQuery::knn`] and fused with the
//! lexical score by the engine.

use std::fmt;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Instant;

use tantivy::query::{
    AllQuery, BooleanQuery, BoostQuery, EmptyQuery, FuzzyTermQuery, Occur, PhraseQuery, Query,
    QueryParser, RangeQuery, RegexQuery, TermQuery, TermSetQuery,
};
use tantivy::schema::{Field, FieldEntry, FieldType, IndexRecordOption, Schema};
use tantivy::{DateTime, Index, Term};
use thiserror::Error;
use tracing::debug;

use super::clause::{
    BoolClause, DateRangeClause, DocIdClause, ExistsClause, FuzzyClause, MatchClause,
    MatchPhraseClause, NumericRangeClause, QueryClause, QueryStringClause, TermClause,
    VectorClause,
};
use crate::search::embedder::{EmbedError, Embedder};
use crate::search::embedder_registry;
use crate::search::query::is_vector_field;

/// Default bound on `bool` nesting.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Default name of the document identifier field.
pub const DEFAULT_ID_FIELD: &str = "id";

/// Largest edit distance the engine's Levenshtein automata support.
const MAX_FUZZINESS: i64 = 2;

/// Coarse error taxonomy shared by decode and compile failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    UnsupportedClause,
    EmbeddingFailed,
    VectorDimensionMismatch,
}

/// Which group of a `bool` clause a child belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolGroup {
    Must,
    Should,
    MustNot,
}

impl fmt::Display for BoolGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Must => "must",
            Self::Should => "should",
            Self::MustNot => "must_not",
        })
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unknown field {0:?}")]
    UnknownField(String),

    #[error("invalid operator {0:?}, must be 'and' or 'or'")]
    InvalidOperator(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("empty range on field {0:?}: at least one bound is required")]
    EmptyRange(String),

    #[error("invalid {bound} date {value:?}: {reason}")]
    InvalidDate {
        bound: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid query string {query:?}: {reason}")]
    QueryString { query: String, reason: String },

    #[error("doc_id requires at least one id")]
    EmptyIdList,

    #[error("exactly one of text or vector must be provided for a vector query")]
    AmbiguousVectorInput,

    #[error("k must be greater than zero, got {0}")]
    InvalidK(i64),

    #[error("vector clause model {requested:?} does not match the configured model {configured:?}")]
    ModelMismatch {
        requested: String,
        configured: String,
    },

    #[error("failed to generate vector embedding: {0}")]
    EmbeddingFailed(#[source] EmbedError),

    #[error("vector has {actual} dimensions but model {model:?} produces {expected}")]
    VectorDimensionMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },

    #[error("vector clauses are not allowed under must_not")]
    VectorInMustNot,

    #[error("query nesting exceeds the maximum depth of {0}")]
    MaxDepthExceeded(usize),

    /// A `bool` child failed. `source` is the child's own error.
    #[error("{group}[{index}] ({kind}): {source}")]
    Child {
        group: BoolGroup,
        index: usize,
        kind: &'static str,
        source: Box<CompileError>,
    },
}

impl CompileError {
    /// The innermost error, with every `Child` position wrapper removed.
    pub fn root_cause(&self) -> &CompileError {
        let mut current = self;
        while let CompileError::Child { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root_cause() {
            CompileError::EmbeddingFailed(_) => ErrorKind::EmbeddingFailed,
            CompileError::VectorDimensionMismatch { .. } => ErrorKind::VectorDimensionMismatch,
            _ => ErrorKind::Validation,
        }
    }
}

type CompileResult<T> = Result<T, CompileError>;

/// A k-nearest-neighbour side request produced by a `vector` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct KnnRequest {
    pub field: String,
    pub vector: Vec<f32>,
    pub k: usize,
    pub boost: f32,
}

/// Output of [`QueryCompiler::compile`].
#[derive(Debug)]
pub struct CompiledQuery {
    /// Lexical part. `None` when every clause in the tree was a vector clause.
    pub query: Option<Box<dyn Query>>,
    /// Hoisted vector clauses, in tree order.
    pub knn: Vec<KnnRequest>,
}

/// Compiles clause trees against one index schema and one embedder.
pub struct QueryCompiler {
    index: Index,
    schema: Schema,
    embedder: Arc<dyn Embedder>,
    max_depth: usize,
    id_field: String,
}

impl QueryCompiler {
    pub fn new(index: Index, embedder: Arc<dyn Embedder>) -> Self {
        let schema = index.schema();
        Self {
            index,
            schema,
            embedder,
            max_depth: DEFAULT_MAX_DEPTH,
            id_field: DEFAULT_ID_FIELD.to_string(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Compile a clause tree. Fails on the first invalid clause.
    pub fn compile(&self, clause: &QueryClause) -> CompileResult<CompiledQuery> {
        let started = Instant::now();
        let mut knn = Vec::new();
        let query = self.compile_node(clause, 1, false, &mut knn)?;
        debug!(
            root = clause.kind(),
            lexical = query.is_some(),
            knn = knn.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "compiled query"
        );
        Ok(CompiledQuery { query, knn })
    }

    fn compile_node(
        &self,
        clause: &QueryClause,
        depth: usize,
        negated: bool,
        knn: &mut Vec<KnnRequest>,
    ) -> CompileResult<Option<Box<dyn Query>>> {
        if depth > self.max_depth {
            return Err(CompileError::MaxDepthExceeded(self.max_depth));
        }
        let query = match clause {
            QueryClause::Match(m) => self.compile_match(m)?,
            QueryClause::MatchPhrase(p) => self.compile_phrase(p)?,
            QueryClause::Term(t) => self.compile_term(t)?,
            QueryClause::Prefix(p) => {
                let pattern = format!("{}.*", regex::escape(&p.value));
                boosted(self.automaton(&p.field, "prefix", &pattern)?, p.boost)?
            }
            QueryClause::Wildcard(w) => {
                let pattern = wildcard_to_regex(&w.value);
                boosted(self.automaton(&w.field, "wildcard", &pattern)?, w.boost)?
            }
            QueryClause::Regexp(r) => boosted(self.automaton(&r.field, "regexp", &r.value)?, r.boost)?,
            QueryClause::Fuzzy(f) => self.compile_fuzzy(f)?,
            QueryClause::NumericRange(r) => self.compile_numeric_range(r)?,
            QueryClause::DateRange(r) => self.compile_date_range(r)?,
            QueryClause::QueryString(q) => self.compile_query_string(q)?,
            QueryClause::DocId(d) => self.compile_doc_ids(d)?,
            QueryClause::Exists(e) => self.compile_exists(e)?,
            QueryClause::Vector(v) => {
                if negated {
                    return Err(CompileError::VectorInMustNot);
                }
                knn.push(self.compile_vector(v)?);
                return Ok(None);
            }
            QueryClause::Bool(b) => return self.compile_bool(b, depth, negated, knn),
        };
        Ok(Some(query))
    }

    fn compile_bool(
        &self,
        b: &BoolClause,
        depth: usize,
        negated: bool,
        knn: &mut Vec<KnnRequest>,
    ) -> CompileResult<Option<Box<dyn Query>>> {
        let minimum_should_match = non_negative("minimum_should_match", b.minimum_should_match)?;
        let groups = [
            (BoolGroup::Must, Occur::Must, &b.must),
            (BoolGroup::Should, Occur::Should, &b.should),
            (BoolGroup::MustNot, Occur::MustNot, &b.must_not),
        ];

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        let mut hoisted = 0usize;
        let mut hoisted_should = 0usize;
        for (group, occur, children) in groups {
            let child_negated = negated || group == BoolGroup::MustNot;
            for (index, child) in children.iter().enumerate() {
                let before = knn.len();
                match self.compile_node(child, depth + 1, child_negated, knn) {
                    Ok(Some(query)) => clauses.push((occur, query)),
                    Ok(None) => {
                        hoisted += knn.len() - before;
                        if group == BoolGroup::Should {
                            hoisted_should += 1;
                        }
                    }
                    Err(source) => {
                        return Err(CompileError::Child {
                            group,
                            index,
                            kind: child.kind(),
                            source: Box::new(source),
                        });
                    }
                }
            }
        }

        if clauses.is_empty() {
            if hoisted > 0 {
                return Ok(None);
            }
            // A bool without children matches everything.
            return boosted(Box::new(AllQuery), b.boost).map(Some);
        }
        if clauses.iter().all(|(occur, _)| *occur == Occur::MustNot) {
            clauses.push((Occur::Must, Box::new(AllQuery)));
        }

        // Should children hoisted into k-NN requests leave the quorum; only the
        // lexical should clauses that remain can satisfy it.
        let minimum_should_match = match minimum_should_match {
            Some(n) if hoisted_should > 0 => {
                let lexical_should = clauses
                    .iter()
                    .filter(|(occur, _)| *occur == Occur::Should)
                    .count();
                if n > lexical_should {
                    debug!(requested = n, lexical_should, "clamped minimum_should_match");
                }
                Some(n.min(lexical_should))
            }
            other => other,
        };

        let query: Box<dyn Query> = match minimum_should_match {
            Some(n) if n > 0 => Box::new(BooleanQuery::with_minimum_required_clauses(clauses, n)),
            _ => Box::new(BooleanQuery::new(clauses)),
        };
        boosted(query, b.boost).map(Some)
    }

    fn compile_match(&self, m: &MatchClause) -> CompileResult<Box<dyn Query>> {
        let (field, entry) = self.resolve(&m.field)?;
        let occur = match m.operator.as_deref().filter(|op| !op.is_empty()) {
            None => Occur::Should,
            Some(op) if op.eq_ignore_ascii_case("or") => Occur::Should,
            Some(op) if op.eq_ignore_ascii_case("and") => Occur::Must,
            Some(op) => return Err(CompileError::InvalidOperator(op.to_string())),
        };
        let fuzziness = fuzziness(m.fuzziness)?.unwrap_or(0);
        let prefix_length = non_negative("prefix_length", m.prefix_length)?.unwrap_or(0);

        if !is_text(entry) {
            let term = self.typed_term(field, entry, &m.value)?;
            return boosted(Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)), m.boost);
        }

        let tokens = self.analyze(field, m.analyzer.as_deref(), &m.value)?;
        let mut queries = tokens
            .iter()
            .map(|(_, token)| token_query(field, token, fuzziness, prefix_length))
            .collect::<CompileResult<Vec<_>>>()?;
        let query: Box<dyn Query> = match queries.len() {
            0 => Box::new(EmptyQuery),
            1 => queries.remove(0),
            _ => Box::new(BooleanQuery::new(
                queries.into_iter().map(|q| (occur, q)).collect(),
            )),
        };
        boosted(query, m.boost)
    }

    fn compile_phrase(&self, p: &MatchPhraseClause) -> CompileResult<Box<dyn Query>> {
        let (field, entry) = self.resolve(&p.field)?;
        let slop = non_negative("slop", p.slop)?.unwrap_or(0);

        if !is_text(entry) {
            let term = self.typed_term(field, entry, &p.value)?;
            return boosted(Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)), p.boost);
        }

        let tokens = self.analyze(field, p.analyzer.as_deref(), &p.value)?;
        let query: Box<dyn Query> = match tokens.as_slice() {
            [] => Box::new(EmptyQuery),
            [(_, token)] => Box::new(TermQuery::new(
                Term::from_field_text(field, token),
                IndexRecordOption::WithFreqs,
            )),
            _ => {
                let terms = tokens
                    .iter()
                    .map(|(position, token)| (*position, Term::from_field_text(field, token)))
                    .collect();
                let mut phrase = PhraseQuery::new_with_offset(terms);
                phrase.set_slop(u32::try_from(slop).unwrap_or(u32::MAX));
                Box::new(phrase)
            }
        };
        boosted(query, p.boost)
    }

    fn compile_term(&self, t: &TermClause) -> CompileResult<Box<dyn Query>> {
        let (field, entry) = self.resolve(&t.field)?;
        let term = self.typed_term(field, entry, &t.value)?;
        boosted(Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)), t.boost)
    }

    fn compile_fuzzy(&self, f: &FuzzyClause) -> CompileResult<Box<dyn Query>> {
        let (field, entry) = self.resolve(&f.field)?;
        require_text(entry, "fuzzy")?;
        let distance = fuzziness(f.fuzziness)?.unwrap_or(1);
        let prefix_length = non_negative("prefix_length", f.prefix_length)?.unwrap_or(0);
        let query: Box<dyn Query> = Box::new(FuzzyTermQuery::new(
            Term::from_field_text(field, &f.value),
            distance,
            true,
        ));
        let query = with_exact_prefix(query, field, &f.value, prefix_length)?;
        boosted(query, f.boost)
    }

    fn automaton(&self, name: &str, clause: &str, pattern: &str) -> CompileResult<Box<dyn Query>> {
        let (field, entry) = self.resolve(name)?;
        require_text(entry, clause)?;
        let query = RegexQuery::from_pattern(pattern, field).map_err(|e| {
            CompileError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Box::new(query))
    }

    fn compile_numeric_range(&self, r: &NumericRangeClause) -> CompileResult<Box<dyn Query>> {
        let (field, entry) = self.resolve(&r.field)?;
        if r.min.is_none() && r.max.is_none() {
            return Err(CompileError::EmptyRange(r.field.clone()));
        }
        let to_term = |value: f64| numeric_term(field, entry, value);
        let lower = bound(r.min.map(to_term).transpose()?, r.inclusive_min.unwrap_or(true));
        let upper = bound(r.max.map(to_term).transpose()?, r.inclusive_max.unwrap_or(false));
        boosted(Box::new(RangeQuery::new(lower, upper)), r.boost)
    }

    fn compile_date_range(&self, r: &DateRangeClause) -> CompileResult<Box<dyn Query>> {
        let (field, entry) = self.resolve(&r.field)?;
        let start = r.start.as_deref().filter(|s| !s.is_empty());
        let end = r.end.as_deref().filter(|s| !s.is_empty());
        if start.is_none() && end.is_none() {
            return Err(CompileError::EmptyRange(r.field.clone()));
        }
        let to_term = |name: &'static str, value: &str| -> CompileResult<Term> {
            let parsed = chrono::DateTime::parse_from_rfc3339(value).map_err(|e| {
                CompileError::InvalidDate {
                    bound: name,
                    value: value.to_string(),
                    reason: e.to_string(),
                }
            })?;
            match entry.field_type() {
                FieldType::Date(_) => Ok(Term::from_field_date(
                    field,
                    DateTime::from_timestamp_micros(parsed.timestamp_micros()),
                )),
                FieldType::I64(_) => Ok(Term::from_field_i64(field, parsed.timestamp_millis())),
                other => Err(CompileError::InvalidParameter(format!(
                    "date_range needs a date or i64 field, {:?} is {:?}",
                    entry.name(),
                    other.value_type()
                ))),
            }
        };
        let lower = bound(
            start.map(|s| to_term("start", s)).transpose()?,
            r.inclusive_start.unwrap_or(true),
        );
        let upper = bound(
            end.map(|e| to_term("end", e)).transpose()?,
            r.inclusive_end.unwrap_or(false),
        );
        boosted(Box::new(RangeQuery::new(lower, upper)), r.boost)
    }

    fn compile_query_string(&self, q: &QueryStringClause) -> CompileResult<Box<dyn Query>> {
        let default_fields = match q.default_field.as_deref().filter(|f| !f.is_empty()) {
            Some(name) => vec![self.resolve(name)?.0],
            None => self
                .schema
                .fields()
                .filter(|(_, entry)| entry.is_indexed() && is_text(entry))
                .map(|(field, _)| field)
                .collect(),
        };
        let parser = QueryParser::for_index(&self.index, default_fields);
        let query = parser
            .parse_query(&q.query)
            .map_err(|e| CompileError::QueryString {
                query: q.query.clone(),
                reason: e.to_string(),
            })?;
        boosted(query, q.boost)
    }

    fn compile_doc_ids(&self, d: &DocIdClause) -> CompileResult<Box<dyn Query>> {
        if d.ids.is_empty() {
            return Err(CompileError::EmptyIdList);
        }
        let (field, _) = self.resolve(&self.id_field)?;
        let terms = d.ids.iter().map(|id| Term::from_field_text(field, id));
        Ok(Box::new(TermSetQuery::new(terms)))
    }

    fn compile_exists(&self, e: &ExistsClause) -> CompileResult<Box<dyn Query>> {
        let (field, entry) = self.resolve(&e.field)?;
        let full_range = |lo: Term, hi: Term| -> Box<dyn Query> {
            Box::new(RangeQuery::new(Bound::Included(lo), Bound::Included(hi)))
        };
        let query: Box<dyn Query> = match entry.field_type() {
            FieldType::Str(_) => Box::new(RegexQuery::from_pattern(".*", field).map_err(|err| {
                CompileError::InvalidPattern {
                    pattern: ".*".into(),
                    reason: err.to_string(),
                }
            })?),
            FieldType::U64(_) => full_range(
                Term::from_field_u64(field, u64::MIN),
                Term::from_field_u64(field, u64::MAX),
            ),
            FieldType::I64(_) => full_range(
                Term::from_field_i64(field, i64::MIN),
                Term::from_field_i64(field, i64::MAX),
            ),
            FieldType::F64(_) => full_range(
                Term::from_field_f64(field, f64::MIN),
                Term::from_field_f64(field, f64::MAX),
            ),
            FieldType::Date(_) => full_range(
                Term::from_field_date(field, DateTime::from_timestamp_micros(i64::MIN)),
                Term::from_field_date(field, DateTime::from_timestamp_micros(i64::MAX)),
            ),
            FieldType::Bool(_) => Box::new(TermSetQuery::new([
                Term::from_field_bool(field, true),
                Term::from_field_bool(field, false),
            ])),
            other => {
                return Err(CompileError::InvalidParameter(format!(
                    "exists is not supported on {:?} field {:?}",
                    other.value_type(),
                    e.field
                )));
            }
        };
        Ok(query)
    }

    fn compile_vector(&self, v: &VectorClause) -> CompileResult<KnnRequest> {
        let (_, entry) = self.resolve(&v.field)?;
        if !entry.is_stored() || !is_vector_field(entry) {
            return Err(CompileError::InvalidParameter(format!(
                "field {:?} is not a stored vector field",
                v.field
            )));
        }
        if v.k <= 0 {
            return Err(CompileError::InvalidK(v.k));
        }
        if v.model.trim().is_empty() {
            return Err(CompileError::InvalidParameter(
                "vector clause requires a model".into(),
            ));
        }
        let boost = boost_value(v.boost)?.unwrap_or(1.0);

        let vector = match (v.text_input(), v.vector_input()) {
            (Some(text), None) => {
                let configured = self.embedder.model();
                if !embedder_registry::same_model(&v.model, configured) {
                    return Err(CompileError::ModelMismatch {
                        requested: v.model.clone(),
                        configured: configured.to_string(),
                    });
                }
                self.embedder
                    .embed(text)
                    .map_err(CompileError::EmbeddingFailed)?
            }
            (None, Some(raw)) => raw.to_vec(),
            _ => return Err(CompileError::AmbiguousVectorInput),
        };

        if let Some(expected) = embedder_registry::dimension_for(&v.model)
            && expected != vector.len()
        {
            return Err(CompileError::VectorDimensionMismatch {
                model: v.model.clone(),
                expected,
                actual: vector.len(),
            });
        }

        Ok(KnnRequest {
            field: v.field.clone(),
            vector,
            k: usize::try_from(v.k).unwrap_or(usize::MAX),
            boost,
        })
    }

    fn resolve(&self, name: &str) -> CompileResult<(Field, &FieldEntry)> {
        let field = self
            .schema
            .get_field(name)
            .map_err(|_| CompileError::UnknownField(name.to_string()))?;
        Ok((field, self.schema.get_field_entry(field)))
    }

    /// Run `value` through the field's analyzer, or a named one.
    fn analyze(
        &self,
        field: Field,
        analyzer: Option<&str>,
        value: &str,
    ) -> CompileResult<Vec<(usize, String)>> {
        let mut tokenizer = match analyzer.filter(|a| !a.is_empty()) {
            Some(name) => self.index.tokenizers().get(name).ok_or_else(|| {
                CompileError::InvalidParameter(format!("unknown analyzer {name:?}"))
            })?,
            None => self
                .index
                .tokenizer_for_field(field)
                .map_err(|e| CompileError::InvalidParameter(e.to_string()))?,
        };
        let mut stream = tokenizer.token_stream(value);
        let mut tokens = Vec::new();
        while stream.advance() {
            let token = stream.token();
            tokens.push((token.position, token.text.clone()));
        }
        Ok(tokens)
    }

    /// Exact term for `value` converted to the field's type.
    fn typed_term(&self, field: Field, entry: &FieldEntry, value: &str) -> CompileResult<Term> {
        let invalid = |ty: &str| {
            CompileError::InvalidParameter(format!(
                "value {value:?} is not a valid {ty} for field {:?}",
                entry.name()
            ))
        };
        match entry.field_type() {
            FieldType::Str(_) => Ok(Term::from_field_text(field, value)),
            FieldType::U64(_) => value
                .parse::<u64>()
                .map(|v| Term::from_field_u64(field, v))
                .map_err(|_| invalid("u64")),
            FieldType::I64(_) => value
                .parse::<i64>()
                .map(|v| Term::from_field_i64(field, v))
                .map_err(|_| invalid("i64")),
            FieldType::F64(_) => value
                .parse::<f64>()
                .map(|v| Term::from_field_f64(field, v))
                .map_err(|_| invalid("f64")),
            FieldType::Bool(_) => value
                .parse::<bool>()
                .map(|v| Term::from_field_bool(field, v))
                .map_err(|_| invalid("bool")),
            FieldType::Date(_) => chrono::DateTime::parse_from_rfc3339(value)
                .map(|dt| {
                    Term::from_field_date(field, DateTime::from_timestamp_micros(dt.timestamp_micros()))
                })
                .map_err(|_| invalid("RFC-3339 date")),
            other => Err(CompileError::InvalidParameter(format!(
                "field {:?} of type {:?} cannot be matched by value",
                entry.name(),
                other.value_type()
            ))),
        }
    }
}

fn is_text(entry: &FieldEntry) -> bool {
    matches!(entry.field_type(), FieldType::Str(_))
}

fn require_text(entry: &FieldEntry, clause: &str) -> CompileResult<()> {
    if is_text(entry) {
        Ok(())
    } else {
        Err(CompileError::InvalidParameter(format!(
            "{clause} requires a text field, {:?} is {:?}",
            entry.name(),
            entry.field_type().value_type()
        )))
    }
}

fn non_negative(name: &str, value: Option<i64>) -> CompileResult<Option<usize>> {
    match value {
        None => Ok(None),
        Some(v) if v < 0 => Err(CompileError::InvalidParameter(format!(
            "{name} must be non-negative, got {v}"
        ))),
        Some(v) => Ok(Some(usize::try_from(v).unwrap_or(usize::MAX))),
    }
}

fn fuzziness(value: Option<i64>) -> CompileResult<Option<u8>> {
    match value {
        None => Ok(None),
        Some(v) if v < 0 => Err(CompileError::InvalidParameter(format!(
            "fuzziness must be non-negative, got {v}"
        ))),
        Some(v) if v > MAX_FUZZINESS => Err(CompileError::InvalidParameter(format!(
            "fuzziness must be at most {MAX_FUZZINESS}, got {v}"
        ))),
        Some(v) => Ok(Some(v as u8)),
    }
}

/// `None` and `0` both mean "engine default".
fn boost_value(boost: Option<f32>) -> CompileResult<Option<f32>> {
    match boost {
        None => Ok(None),
        Some(b) if !b.is_finite() || b < 0.0 => Err(CompileError::InvalidParameter(format!(
            "boost must be a finite non-negative number, got {b}"
        ))),
        Some(b) if b == 0.0 => Ok(None),
        Some(b) => Ok(Some(b)),
    }
}

fn boosted(query: Box<dyn Query>, boost: Option<f32>) -> CompileResult<Box<dyn Query>> {
    Ok(match boost_value(boost)? {
        Some(b) => Box::new(BoostQuery::new(query, b)),
        None => query,
    })
}

fn bound(term: Option<Term>, inclusive: bool) -> Bound<Term> {
    match term {
        None => Bound::Unbounded,
        Some(t) if inclusive => Bound::Included(t),
        Some(t) => Bound::Excluded(t),
    }
}

fn numeric_term(field: Field, entry: &FieldEntry, value: f64) -> CompileResult<Term> {
    let invalid = |why: &str| {
        CompileError::InvalidParameter(format!(
            "range bound {value} {why} for field {:?}",
            entry.name()
        ))
    };
    if !value.is_finite() {
        return Err(invalid("is not finite"));
    }
    match entry.field_type() {
        FieldType::F64(_) => Ok(Term::from_field_f64(field, value)),
        FieldType::I64(_) if value.fract() == 0.0 => Ok(Term::from_field_i64(field, value as i64)),
        FieldType::U64(_) if value.fract() == 0.0 && value >= 0.0 => {
            Ok(Term::from_field_u64(field, value as u64))
        }
        FieldType::I64(_) | FieldType::U64(_) => Err(invalid("is not a valid integer")),
        _ => Err(invalid("cannot be applied")),
    }
}

/// Per-token query for `match`: exact term, or fuzzy with an exact prefix.
fn token_query(
    field: Field,
    token: &str,
    fuzziness: u8,
    prefix_length: usize,
) -> CompileResult<Box<dyn Query>> {
    let term = Term::from_field_text(field, token);
    if fuzziness == 0 {
        return Ok(Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)));
    }
    let fuzzy: Box<dyn Query> = Box::new(FuzzyTermQuery::new(term, fuzziness, true));
    with_exact_prefix(fuzzy, field, token, prefix_length)
}

/// Require the first `prefix_length` characters of `value` to match exactly.
fn with_exact_prefix(
    query: Box<dyn Query>,
    field: Field,
    value: &str,
    prefix_length: usize,
) -> CompileResult<Box<dyn Query>> {
    if prefix_length == 0 {
        return Ok(query);
    }
    let prefix: String = value.chars().take(prefix_length).collect();
    let pattern = format!("{}.*", regex::escape(&prefix));
    let prefix_query = RegexQuery::from_pattern(&pattern, field).map_err(|e| {
        CompileError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        }
    })?;
    Ok(Box::new(BooleanQuery::new(vec![
        (Occur::Must, query),
        (Occur::Must, Box::new(prefix_query)),
    ])))
}

/// `*` → `.*`, `?` → `.`, everything else literal.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    out
}
