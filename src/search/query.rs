use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tantivy::collector::{Count, DocSetCollector, TopDocs};
use tantivy::query::{AllQuery, Query};
use tantivy::schema::{Field, FieldType, Schema, Value};
use tantivy::snippet::{Snippet, SnippetGenerator};
use tantivy::{DocAddress, Index, IndexReader, Searcher, TantivyDocument, TantivyError};
use thiserror::Error;

use super::facets::{FacetResult, compute_facets};
use super::vector::{TopK, cosine_similarity};
use crate::dsl::compiler::{CompiledQuery, KnnRequest};
use crate::dsl::request::{FacetSpec, HighlightStyle};

/// Hits returned when a request does not set `size`.
pub const DEFAULT_SIZE: usize = 10;

/// Lexical candidates considered when results are re-ranked outside the
/// engine (custom sort or k-NN fusion).
const RERANK_WINDOW: usize = 10_000;

/// Largest `from + size` a search may ask for. Deeper pages are rejected
/// rather than collected.
pub const MAX_RESULT_WINDOW: usize = 10_000;

/// Upper bound for [`SearchClient::list_documents`].
pub const MAX_LISTED_DOCUMENTS: usize = 1000;

const FRAGMENT_CHARS: usize = 150;
const ANSI_HIGHLIGHT: &str = "\x1b[1;33m";
const ANSI_RESET: &str = "\x1b[0m";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("highlight requested with an empty field list")]
    EmptyHighlightFields,

    #[error("unknown field {0:?}")]
    UnknownField(String),

    #[error("field {field:?} cannot be used for {usage}")]
    UnsupportedField { field: String, usage: &'static str },

    #[error("result window from {from} + size {size} exceeds the limit of {max}")]
    ResultWindowTooLarge { from: usize, size: usize, max: usize },

    #[error("invalid facet {name:?}: {reason}")]
    InvalidFacet { name: String, reason: String },

    #[error("search engine failure: {0}")]
    Tantivy(#[from] TantivyError),
}

impl EngineError {
    /// Whether the request itself was at fault (as opposed to the engine).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Tantivy(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    Score { desc: bool },
    Field { name: String, desc: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightRequest {
    pub style: HighlightStyle,
    pub fields: Vec<String>,
}

/// Everything the engine needs to execute one search.
#[derive(Debug)]
pub struct EngineRequest {
    pub query: Option<Box<dyn Query>>,
    pub knn: Vec<KnnRequest>,
    pub size: usize,
    pub from: usize,
    /// Stored fields to return; empty or `*` means all stored non-vector fields.
    pub fields: Vec<String>,
    /// Empty means descending score.
    pub sort: Vec<SortKey>,
    pub highlight: Option<HighlightRequest>,
    pub explain: bool,
    pub facets: BTreeMap<String, FacetSpec>,
}

impl EngineRequest {
    pub fn new(query: Option<Box<dyn Query>>) -> Self {
        Self {
            query,
            knn: Vec::new(),
            size: DEFAULT_SIZE,
            from: 0,
            fields: Vec::new(),
            sort: Vec::new(),
            highlight: None,
            explain: false,
            facets: BTreeMap::new(),
        }
    }

    pub fn from_compiled(compiled: CompiledQuery) -> Self {
        let mut request = Self::new(compiled.query);
        request.knn = compiled.knn;
        request
    }

    /// Add a k-nearest-neighbour side query fused into the lexical score.
    pub fn add_knn(&mut self, field: impl Into<String>, vector: Vec<f32>, k: usize, boost: f32) {
        self.knn.push(KnnRequest {
            field: field.into(),
            vector,
            k,
            boost,
        });
    }

    /// Replace the sort order. Tokens are field names, `-` prefixed for
    /// descending; `_score` is relevance.
    pub fn sort_by(&mut self, tokens: &[String]) {
        self.sort = tokens
            .iter()
            .map(|token| {
                let (desc, name) = match token.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, token.as_str()),
                };
                if name == "_score" {
                    SortKey::Score { desc }
                } else {
                    SortKey::Field {
                        name: name.to_string(),
                        desc,
                    }
                }
            })
            .collect();
    }

    fn ranks_by_score_only(&self) -> bool {
        self.sort.is_empty() || self.sort == [SortKey::Score { desc: true }]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub id: String,
    pub score: f32,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fragments: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub total: u64,
    pub max_score: f32,
    pub took_ms: u64,
    pub hits: Vec<Hit>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub facets: BTreeMap<String, FacetResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListedDocument {
    pub id: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentList {
    pub total: u64,
    pub documents: Vec<ListedDocument>,
}

/// Per-document scoring state while fusing lexical and k-NN results.
#[derive(Debug, Default)]
struct Candidate {
    lexical: Option<f32>,
    similarities: Vec<(usize, f32)>,
}

impl Candidate {
    fn score(&self, knn: &[KnnRequest]) -> f32 {
        self.lexical.unwrap_or(0.0)
            + self
                .similarities
                .iter()
                .map(|(i, sim)| knn[*i].boost * sim)
                .sum::<f32>()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SortValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl SortValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Number(_) => 1,
            Self::Text(_) => 2,
        }
    }
}

struct Ranked {
    address: DocAddress,
    score: f32,
    sort_values: Vec<Option<SortValue>>,
}

enum ResolvedSort {
    Score { desc: bool },
    Field { index: usize, desc: bool },
}

pub struct SearchClient {
    index: Index,
    reader: IndexReader,
    schema: Schema,
    id_field: Field,
}

impl SearchClient {
    pub fn open(index_path: &Path) -> anyhow::Result<Self> {
        let index = Index::open_in_dir(index_path)
            .with_context(|| format!("open index at {}", index_path.display()))?;
        Self::from_index(index)
    }

    pub fn from_index(index: Index) -> anyhow::Result<Self> {
        let schema = index.schema();
        let id_field = schema.get_field("id").context("schema missing id")?;
        let reader = index.reader().context("open index reader")?;
        Ok(Self {
            index,
            reader,
            schema,
            id_field,
        })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Pick up commits made since the reader was opened.
    pub fn reload(&self) -> Result<(), EngineError> {
        self.reader.reload()?;
        Ok(())
    }

    pub fn search(&self, request: &EngineRequest) -> Result<SearchResult, EngineError> {
        let started = Instant::now();
        tracing::info!(
            lexical = request.query.is_some(),
            knn = request.knn.len(),
            size = request.size,
            from = request.from,
            "search_start"
        );
        let knn_fields = self.validate(request)?;
        let searcher = self.reader.searcher();

        let mut candidates: HashMap<DocAddress, Candidate> = HashMap::new();
        let mut total: u64 = 0;
        let window = request.from + request.size;

        if let Some(query) = &request.query {
            let limit = if request.knn.is_empty() && request.ranks_by_score_only() {
                window
            } else {
                window.max(RERANK_WINDOW)
            };
            let (top_docs, count) =
                searcher.search(query.as_ref(), &(TopDocs::with_limit(limit.max(1)).order_by_score(), Count))?;
            total = count as u64;
            for (score, address) in top_docs {
                candidates.entry(address).or_default().lexical = Some(score);
            }
        }

        for (i, (knn, field)) in request.knn.iter().zip(&knn_fields).enumerate() {
            for (address, similarity) in knn_scan(&searcher, *field, knn)? {
                candidates
                    .entry(address)
                    .or_default()
                    .similarities
                    .push((i, similarity));
            }
        }

        // Vector-only candidates may still match lexically outside the window.
        match &request.query {
            Some(query) => {
                for (address, candidate) in candidates.iter_mut() {
                    if candidate.lexical.is_some() {
                        continue;
                    }
                    match query.explain(&searcher, *address) {
                        Ok(explanation) => candidate.lexical = Some(explanation.value()),
                        Err(_) => total += 1,
                    }
                }
            }
            None => total = candidates.len() as u64,
        }

        let facets = if request.facets.is_empty() {
            BTreeMap::new()
        } else {
            let mut matching: HashSet<DocAddress> = match &request.query {
                Some(query) => searcher.search(query.as_ref(), &DocSetCollector)?,
                None => HashSet::new(),
            };
            matching.extend(candidates.keys().copied());
            let mut matching: Vec<DocAddress> = matching.into_iter().collect();
            matching.sort();
            compute_facets(&searcher, &self.schema, &matching, &request.facets)?
        };

        let ranked = self.rank(&searcher, request, &candidates)?;
        let max_score = ranked
            .iter()
            .map(|r| r.score)
            .fold(0.0f32, |acc, s| acc.max(s));

        let generators = self.snippet_generators(&searcher, request)?;
        let mut hits = Vec::with_capacity(request.size.min(ranked.len()));
        for entry in ranked.into_iter().skip(request.from).take(request.size) {
            let doc: TantivyDocument = searcher.doc(entry.address)?;
            let id = doc
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let mut fragments = BTreeMap::new();
            if let Some(highlight) = &request.highlight {
                for (name, generator) in &generators {
                    let snippet = generator.snippet_from_doc(&doc);
                    if !snippet.fragment().is_empty() {
                        fragments.insert(name.clone(), vec![render_snippet(&snippet, highlight.style)]);
                    }
                }
            }
            let explanation = if request.explain {
                Some(explain_hit(
                    &searcher,
                    request,
                    entry.address,
                    entry.score,
                    candidates.get(&entry.address),
                ))
            } else {
                None
            };
            hits.push(Hit {
                id,
                score: entry.score,
                fields: self.project(&doc, &request.fields),
                fragments,
                explanation,
            });
        }

        let took_ms = started.elapsed().as_millis() as u64;
        tracing::info!(total, hits = hits.len(), took_ms, "search_complete");
        Ok(SearchResult {
            total,
            max_score,
            took_ms,
            hits,
            facets,
        })
    }

    /// Match-all listing with every stored field, capped at
    /// [`MAX_LISTED_DOCUMENTS`].
    pub fn list_documents(&self, limit: usize) -> Result<DocumentList, EngineError> {
        let mut request = EngineRequest::new(Some(Box::new(AllQuery)));
        request.size = limit.clamp(1, MAX_LISTED_DOCUMENTS);
        request.fields = vec!["*".to_string()];
        let result = self.search(&request)?;
        Ok(DocumentList {
            total: result.total,
            documents: result
                .hits
                .into_iter()
                .map(|hit| ListedDocument {
                    id: hit.id,
                    fields: hit.fields,
                })
                .collect(),
        })
    }

    /// Reject request shapes the engine cannot serve; resolve k-NN fields.
    fn validate(&self, request: &EngineRequest) -> Result<Vec<Field>, EngineError> {
        match request.from.checked_add(request.size) {
            Some(window) if window <= MAX_RESULT_WINDOW => {}
            _ => {
                return Err(EngineError::ResultWindowTooLarge {
                    from: request.from,
                    size: request.size,
                    max: MAX_RESULT_WINDOW,
                });
            }
        }
        if let Some(highlight) = &request.highlight {
            if highlight.fields.is_empty() {
                return Err(EngineError::EmptyHighlightFields);
            }
            for name in &highlight.fields {
                let (_, entry) = self.field(name)?;
                if !matches!(entry.field_type(), FieldType::Str(_)) || !entry.is_stored() {
                    return Err(unsupported(name, "highlighting"));
                }
            }
        }
        for name in request.fields.iter().filter(|f| *f != "*") {
            self.field(name)?;
        }
        for key in &request.sort {
            if let SortKey::Field { name, .. } = key
                && !self.field(name)?.1.is_stored()
            {
                return Err(unsupported(name, "sorting"));
            }
        }
        request
            .knn
            .iter()
            .map(|knn| {
                let (field, entry) = self.field(&knn.field)?;
                if !entry.is_stored() || !is_vector_field(entry) {
                    return Err(unsupported(&knn.field, "k-NN search"));
                }
                Ok(field)
            })
            .collect()
    }

    fn field(&self, name: &str) -> Result<(Field, &tantivy::schema::FieldEntry), EngineError> {
        let field = self
            .schema
            .get_field(name)
            .map_err(|_| EngineError::UnknownField(name.to_string()))?;
        Ok((field, self.schema.get_field_entry(field)))
    }

    fn rank(
        &self,
        searcher: &Searcher,
        request: &EngineRequest,
        candidates: &HashMap<DocAddress, Candidate>,
    ) -> Result<Vec<Ranked>, EngineError> {
        let mut sort_fields: Vec<Field> = Vec::new();
        let keys: Vec<ResolvedSort> = if request.sort.is_empty() {
            vec![ResolvedSort::Score { desc: true }]
        } else {
            request
                .sort
                .iter()
                .map(|key| match key {
                    SortKey::Score { desc } => Ok(ResolvedSort::Score { desc: *desc }),
                    SortKey::Field { name, desc } => {
                        sort_fields.push(self.field(name)?.0);
                        Ok(ResolvedSort::Field {
                            index: sort_fields.len() - 1,
                            desc: *desc,
                        })
                    }
                })
                .collect::<Result<_, EngineError>>()?
        };

        let mut ranked = Vec::with_capacity(candidates.len());
        for (address, candidate) in candidates {
            let sort_values = if sort_fields.is_empty() {
                Vec::new()
            } else {
                let doc: TantivyDocument = searcher.doc(*address)?;
                sort_fields
                    .iter()
                    .map(|field| doc.get_first(*field).and_then(|v| sort_value(&v)))
                    .collect()
            };
            ranked.push(Ranked {
                address: *address,
                score: candidate.score(&request.knn),
                sort_values,
            });
        }
        ranked.sort_by(|a, b| compare_ranked(a, b, &keys));
        Ok(ranked)
    }

    fn snippet_generators(
        &self,
        searcher: &Searcher,
        request: &EngineRequest,
    ) -> Result<Vec<(String, SnippetGenerator)>, EngineError> {
        let (Some(highlight), Some(query)) = (&request.highlight, &request.query) else {
            return Ok(Vec::new());
        };
        highlight
            .fields
            .iter()
            .map(|name| {
                let (field, _) = self.field(name)?;
                let mut generator = SnippetGenerator::create(searcher, query.as_ref(), field)?;
                generator.set_max_num_chars(FRAGMENT_CHARS);
                Ok((name.clone(), generator))
            })
            .collect()
    }

    /// Stored values for the requested fields. Stored-only f64 fields hold
    /// vectors and are skipped unless named explicitly.
    fn project(
        &self,
        doc: &TantivyDocument,
        requested: &[String],
    ) -> serde_json::Map<String, serde_json::Value> {
        let all = requested.is_empty() || requested.iter().any(|f| f == "*");
        let selected: Vec<(Field, String)> = if all {
            self.schema
                .fields()
                .filter(|(_, entry)| entry.is_stored() && !is_vector_field(entry))
                .map(|(field, entry)| (field, entry.name().to_string()))
                .collect()
        } else {
            requested
                .iter()
                .filter_map(|name| self.schema.get_field(name).ok().map(|f| (f, name.clone())))
                .collect()
        };

        let mut out = serde_json::Map::new();
        for (field, name) in selected {
            let mut values: Vec<serde_json::Value> =
                doc.get_all(field).filter_map(|v| json_value(&v)).collect();
            match values.len() {
                0 => {}
                1 => {
                    out.insert(name, values.remove(0));
                }
                _ => {
                    out.insert(name, serde_json::Value::Array(values));
                }
            }
        }
        out
    }
}

fn unsupported(field: &str, usage: &'static str) -> EngineError {
    EngineError::UnsupportedField {
        field: field.to_string(),
        usage,
    }
}

/// Vector fields are multi-valued f64 fields that are neither indexed nor fast.
pub(crate) fn is_vector_field(entry: &tantivy::schema::FieldEntry) -> bool {
    matches!(entry.field_type(), FieldType::F64(_)) && !entry.is_indexed() && !entry.is_fast()
}

/// Exact cosine scan over every stored vector in `field`.
fn knn_scan(
    searcher: &Searcher,
    field: Field,
    knn: &KnnRequest,
) -> Result<Vec<(DocAddress, f32)>, EngineError> {
    let mut top = TopK::new(knn.k);
    for address in searcher.search(&AllQuery, &DocSetCollector)? {
        let doc: TantivyDocument = searcher.doc(address)?;
        let stored: Vec<f32> = doc
            .get_all(field)
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();
        if let Some(similarity) = cosine_similarity(&knn.vector, &stored) {
            top.push(address, similarity);
        }
    }
    Ok(top.into_sorted_vec())
}

fn compare_ranked(a: &Ranked, b: &Ranked, keys: &[ResolvedSort]) -> Ordering {
    for key in keys {
        let ord = match key {
            ResolvedSort::Score { desc } => directed(a.score.total_cmp(&b.score), *desc),
            ResolvedSort::Field { index, desc } => {
                match (&a.sort_values[*index], &b.sort_values[*index]) {
                    (Some(x), Some(y)) => directed(x.cmp(y), *desc),
                    // Missing values sort last in both directions.
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.address.cmp(&b.address)
}

fn directed(ord: Ordering, desc: bool) -> Ordering {
    if desc { ord.reverse() } else { ord }
}

fn sort_value<'a>(value: &impl Value<'a>) -> Option<SortValue> {
    if let Some(s) = value.as_str() {
        return Some(SortValue::Text(s.to_string()));
    }
    if let Some(v) = value.as_f64() {
        return Some(SortValue::Number(v));
    }
    if let Some(v) = value.as_i64() {
        return Some(SortValue::Number(v as f64));
    }
    if let Some(v) = value.as_u64() {
        return Some(SortValue::Number(v as f64));
    }
    if let Some(dt) = value.as_datetime() {
        return Some(SortValue::Number(dt.into_timestamp_micros() as f64));
    }
    value.as_bool().map(SortValue::Bool)
}

fn json_value<'a>(value: &impl Value<'a>) -> Option<serde_json::Value> {
    if let Some(s) = value.as_str() {
        return Some(serde_json::Value::String(s.to_string()));
    }
    if let Some(v) = value.as_u64() {
        return Some(v.into());
    }
    if let Some(v) = value.as_i64() {
        return Some(v.into());
    }
    if let Some(v) = value.as_f64() {
        return serde_json::Number::from_f64(v).map(serde_json::Value::Number);
    }
    if let Some(v) = value.as_bool() {
        return Some(v.into());
    }
    value.as_datetime().and_then(|dt| {
        chrono::DateTime::<Utc>::from_timestamp_micros(dt.into_timestamp_micros())
            .map(|d| serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
    })
}

fn render_snippet(snippet: &Snippet, style: HighlightStyle) -> String {
    let fragment = snippet.fragment();
    let mut out = String::with_capacity(fragment.len() + 16);
    let mut cursor = 0;
    for range in snippet.highlighted() {
        if range.start < cursor || range.end > fragment.len() {
            continue;
        }
        push_text(&mut out, &fragment[cursor..range.start], style);
        match style {
            HighlightStyle::Html => out.push_str("<mark>"),
            HighlightStyle::Ansi => out.push_str(ANSI_HIGHLIGHT),
        }
        push_text(&mut out, &fragment[range.start..range.end], style);
        match style {
            HighlightStyle::Html => out.push_str("</mark>"),
            HighlightStyle::Ansi => out.push_str(ANSI_RESET),
        }
        cursor = range.end;
    }
    push_text(&mut out, &fragment[cursor..], style);
    out
}

fn push_text(out: &mut String, text: &str, style: HighlightStyle) {
    if style == HighlightStyle::Ansi {
        out.push_str(text);
        return;
    }
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

fn explain_hit(
    searcher: &Searcher,
    request: &EngineRequest,
    address: DocAddress,
    score: f32,
    candidate: Option<&Candidate>,
) -> serde_json::Value {
    let lexical = request
        .query
        .as_ref()
        .and_then(|q| q.explain(searcher, address).ok())
        .and_then(|e| serde_json::to_value(&e).ok());
    let knn: Vec<serde_json::Value> = candidate
        .map(|c| {
            c.similarities
                .iter()
                .map(|(i, similarity)| {
                    serde_json::json!({
                        "field": request.knn[*i].field,
                        "similarity": similarity,
                        "boost": request.knn[*i].boost,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    serde_json::json!({
        "value": score,
        "description": "lexical score plus boosted k-NN similarities",
        "lexical": lexical,
        "knn": knn,
    })
}
