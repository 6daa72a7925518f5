//! Query clause model.
//!
//! A [`QueryClause`] is one node of the declarative query tree. In YAML it is
//! a single-key mapping whose key names the clause kind:
//!
//! ```yaml
//! bool:
//!   must:
//!     - match: { field: content, value: "quick fox", operator: and }
//!   must_not:
//!     - term: { field: status, value: archived }
//! ```
//!
//! Decoding goes through [`RawClause`], which accepts every kind as an
//! optional key and then insists that exactly one is present. Empty,
//! ambiguous, or unknown mappings never become a `QueryClause`.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// YAML keys of every supported clause kind, in declaration order.
pub const CLAUSE_KINDS: &[&str] = &[
    "match",
    "match_phrase",
    "term",
    "prefix",
    "fuzzy",
    "wildcard",
    "regexp",
    "numeric_range",
    "date_range",
    "query_string",
    "doc_id",
    "exists",
    "vector",
    "bool",
];

/// One node of the query tree. Exactly one kind per value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "RawClause")]
pub enum QueryClause {
    Match(MatchClause),
    MatchPhrase(MatchPhraseClause),
    Term(TermClause),
    Prefix(PrefixClause),
    Fuzzy(FuzzyClause),
    Wildcard(WildcardClause),
    Regexp(RegexpClause),
    NumericRange(NumericRangeClause),
    DateRange(DateRangeClause),
    QueryString(QueryStringClause),
    DocId(DocIdClause),
    Exists(ExistsClause),
    Vector(VectorClause),
    Bool(BoolClause),
}

impl QueryClause {
    /// The YAML key naming this clause kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Match(_) => "match",
            Self::MatchPhrase(_) => "match_phrase",
            Self::Term(_) => "term",
            Self::Prefix(_) => "prefix",
            Self::Fuzzy(_) => "fuzzy",
            Self::Wildcard(_) => "wildcard",
            Self::Regexp(_) => "regexp",
            Self::NumericRange(_) => "numeric_range",
            Self::DateRange(_) => "date_range",
            Self::QueryString(_) => "query_string",
            Self::DocId(_) => "doc_id",
            Self::Exists(_) => "exists",
            Self::Vector(_) => "vector",
            Self::Bool(_) => "bool",
        }
    }

    /// Decode a single clause from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

/// Full-text match: the value is analyzed and each token becomes a clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchClause {
    pub field: String,
    #[serde(deserialize_with = "scalar_string")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
    /// `and` or `or` (default `or`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzziness: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_length: Option<i64>,
    /// Registered analyzer name overriding the field's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchPhraseClause {
    pub field: String,
    #[serde(deserialize_with = "scalar_string")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slop: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
}

/// Exact, unanalyzed term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TermClause {
    pub field: String,
    #[serde(deserialize_with = "scalar_string")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrefixClause {
    pub field: String,
    #[serde(deserialize_with = "scalar_string")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FuzzyClause {
    pub field: String,
    #[serde(deserialize_with = "scalar_string")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzziness: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_length: Option<i64>,
}

/// `*` matches any run of characters, `?` exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WildcardClause {
    pub field: String,
    #[serde(deserialize_with = "scalar_string")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexpClause {
    pub field: String,
    #[serde(deserialize_with = "scalar_string")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumericRangeClause {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusive_min: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusive_max: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

/// Bounds are RFC-3339 timestamps, parsed at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateRangeClause {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusive_start: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusive_end: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

/// Raw expression handed to the engine's query parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryStringClause {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocIdClause {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExistsClause {
    pub field: String,
}

/// k-nearest-neighbour search. Exactly one of `text` / `vector` is expected;
/// an empty string or empty list counts as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VectorClause {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    pub model: String,
    pub k: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

impl VectorClause {
    pub(crate) fn text_input(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    pub(crate) fn vector_input(&self) -> Option<&[f32]> {
        self.vector.as_deref().filter(|v| !v.is_empty())
    }
}

/// Boolean composition; the only recursive clause.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoolClause {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<QueryClause>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<QueryClause>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<QueryClause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_should_match: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

/// Why a mapping could not be read as a clause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClauseShapeError {
    #[error("unsupported clause: no query clause given, expected one of: {}", CLAUSE_KINDS.join(", "))]
    Empty,

    #[error("unsupported clause: ambiguous clause with kinds [{}], exactly one is required", .0.join(", "))]
    Ambiguous(Vec<&'static str>),
}

/// Every clause kind as an optional key. Only used for decoding.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawClause {
    #[serde(rename = "match")]
    match_: Option<MatchClause>,
    match_phrase: Option<MatchPhraseClause>,
    term: Option<TermClause>,
    prefix: Option<PrefixClause>,
    fuzzy: Option<FuzzyClause>,
    wildcard: Option<WildcardClause>,
    regexp: Option<RegexpClause>,
    numeric_range: Option<NumericRangeClause>,
    date_range: Option<DateRangeClause>,
    query_string: Option<QueryStringClause>,
    doc_id: Option<DocIdClause>,
    exists: Option<ExistsClause>,
    vector: Option<VectorClause>,
    #[serde(rename = "bool")]
    boolean: Option<BoolClause>,
}

impl TryFrom<RawClause> for QueryClause {
    type Error = ClauseShapeError;

    fn try_from(raw: RawClause) -> Result<Self, Self::Error> {
        let mut found: Vec<QueryClause> = Vec::with_capacity(1);
        found.extend(raw.match_.map(QueryClause::Match));
        found.extend(raw.match_phrase.map(QueryClause::MatchPhrase));
        found.extend(raw.term.map(QueryClause::Term));
        found.extend(raw.prefix.map(QueryClause::Prefix));
        found.extend(raw.fuzzy.map(QueryClause::Fuzzy));
        found.extend(raw.wildcard.map(QueryClause::Wildcard));
        found.extend(raw.regexp.map(QueryClause::Regexp));
        found.extend(raw.numeric_range.map(QueryClause::NumericRange));
        found.extend(raw.date_range.map(QueryClause::DateRange));
        found.extend(raw.query_string.map(QueryClause::QueryString));
        found.extend(raw.doc_id.map(QueryClause::DocId));
        found.extend(raw.exists.map(QueryClause::Exists));
        found.extend(raw.vector.map(QueryClause::Vector));
        found.extend(raw.boolean.map(QueryClause::Bool));

        match found.len() {
            0 => Err(ClauseShapeError::Empty),
            1 => Ok(found.remove(0)),
            _ => Err(ClauseShapeError::Ambiguous(
                found.iter().map(QueryClause::kind).collect(),
            )),
        }
    }
}

/// Accept any YAML scalar for a `value` and keep its textual form.
/// Conversion to the field's type happens at compile time.
fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Int(i64),
        UInt(u64),
        Float(f64),
        Str(String),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Bool(b) => b.to_string(),
        Scalar::Int(i) => i.to_string(),
        Scalar::UInt(u) => u.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Str(s) => s,
    })
}
