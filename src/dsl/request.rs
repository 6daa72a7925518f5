//! Top-level search request: a query tree plus execution options and facets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::clause::QueryClause;

/// A decoded YAML search document. Immutable after decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchRequest {
    pub query: QueryClause,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<SearchOptions>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub facets: BTreeMap<String, FacetSpec>,
}

/// Post-compilation execution options.
///
/// `size` and `from` are only applied when greater than zero, so a request
/// cannot ask for zero hits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<usize>,
    #[serde(default)]
    pub explain: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<Highlight>,
}

/// One sort key. `_score` sorts by relevance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortOption {
    pub field: String,
    #[serde(default)]
    pub desc: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightStyle {
    #[default]
    Html,
    Ansi,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Highlight {
    #[serde(default)]
    pub style: HighlightStyle,
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacetKind {
    Terms,
    NumericRange,
    DateRange,
}

/// A named aggregation computed over every matching document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FacetSpec {
    #[serde(rename = "type")]
    pub kind: FacetKind,
    pub field: String,
    /// Number of buckets kept for `terms` facets.
    #[serde(default = "default_facet_size")]
    pub size: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<FacetRange>,
}

/// Bucket bounds: `min`/`max` for numeric facets, `start`/`end` (RFC-3339)
/// for date facets. Lower bounds are inclusive, upper bounds exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FacetRange {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

fn default_facet_size() -> usize {
    10
}

/// Decode a YAML search document.
pub fn parse_request(yaml: &str) -> Result<SearchRequest, serde_yaml::Error> {
    serde_yaml::from_str(yaml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_request() {
        let yaml = r#"
query:
  match: {field: content, value: fox}
options:
  size: 5
  from: 10
  explain: true
  fields: [title, status]
  sort:
    - {field: rating, desc: true}
    - {field: _score}
  highlight:
    style: ansi
    fields: [content]
facets:
  by_status:
    type: terms
    field: status
  ratings:
    type: numeric_range
    field: rating
    ranges:
      - {name: low, max: 3.0}
      - {name: high, min: 3.0}
"#;
        let req = parse_request(yaml).unwrap();
        let opts = req.options.unwrap();
        assert_eq!(opts.size, Some(5));
        assert_eq!(opts.from, Some(10));
        assert!(opts.explain);
        assert_eq!(opts.sort[0], SortOption { field: "rating".into(), desc: true });
        assert!(!opts.sort[1].desc);
        let hl = opts.highlight.unwrap();
        assert_eq!(hl.style, HighlightStyle::Ansi);
        assert_eq!(hl.fields, vec!["content"]);
        assert_eq!(req.facets["by_status"].kind, FacetKind::Terms);
        assert_eq!(req.facets["by_status"].size, 10);
        assert_eq!(req.facets["ratings"].ranges.len(), 2);
    }

    #[test]
    fn options_are_optional() {
        let req = parse_request("query:\n  exists: {field: title}\n").unwrap();
        assert!(req.options.is_none());
        assert!(req.facets.is_empty());
    }

    #[test]
    fn highlight_style_defaults_to_html() {
        let req = parse_request(
            "query:\n  exists: {field: title}\noptions:\n  highlight: {fields: []}\n",
        )
        .unwrap();
        let hl = req.options.unwrap().highlight.unwrap();
        assert_eq!(hl.style, HighlightStyle::Html);
        assert!(hl.fields.is_empty());
    }

    #[test]
    fn missing_query_is_rejected() {
        assert!(parse_request("options: {size: 3}\n").is_err());
    }

    #[test]
    fn invalid_clause_surfaces_as_decode_error() {
        let err = parse_request("query: {}\n").unwrap_err().to_string();
        assert!(err.contains("no query clause"), "{err}");
    }
}
