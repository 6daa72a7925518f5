//! Facet aggregation over the full set of matching documents.
//!
//! Values are read from stored fields, so every faceted field must be STORED.
//! Range buckets are `[min, max)` / `[start, end)`; an absent bound is open.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tantivy::schema::{Field, FieldType, Schema, Value};
use tantivy::{DocAddress, Searcher, TantivyDocument};

use super::query::EngineError;
use crate::dsl::request::{FacetKind, FacetRange, FacetSpec};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacetResult {
    pub field: String,
    /// Number of values seen (a multi-valued field counts each value).
    pub total: u64,
    /// Matching documents without a value in the field.
    pub missing: u64,
    /// Values that fell outside the kept buckets.
    pub other: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub terms: Vec<TermBucket>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub numeric_ranges: Vec<NumericBucket>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub date_ranges: Vec<DateBucket>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermBucket {
    pub term: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericBucket {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateBucket {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    pub count: u64,
}

/// A facet spec resolved against the schema, with parsed date bounds.
struct Plan<'a> {
    name: &'a str,
    spec: &'a FacetSpec,
    field: Field,
    date_bounds: Vec<(Option<i64>, Option<i64>)>,
}

/// Compute every facet in `specs` over `docs`.
pub fn compute_facets(
    searcher: &Searcher,
    schema: &Schema,
    docs: &[DocAddress],
    specs: &BTreeMap<String, FacetSpec>,
) -> Result<BTreeMap<String, FacetResult>, EngineError> {
    let plans = specs
        .iter()
        .map(|(name, spec)| plan(schema, name, spec))
        .collect::<Result<Vec<_>, _>>()?;
    if plans.is_empty() {
        return Ok(BTreeMap::new());
    }

    let stored = docs
        .iter()
        .map(|addr| searcher.doc::<TantivyDocument>(*addr))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(plans
        .into_iter()
        .map(|plan| {
            let result = match plan.spec.kind {
                FacetKind::Terms => terms_facet(&stored, &plan),
                FacetKind::NumericRange => numeric_facet(&stored, &plan),
                FacetKind::DateRange => date_facet(&stored, &plan),
            };
            (plan.name.to_string(), result)
        })
        .collect())
}

fn plan<'a>(schema: &Schema, name: &'a str, spec: &'a FacetSpec) -> Result<Plan<'a>, EngineError> {
    let field = schema
        .get_field(&spec.field)
        .map_err(|_| EngineError::UnknownField(spec.field.clone()))?;
    let entry = schema.get_field_entry(field);
    let invalid = |reason: String| EngineError::InvalidFacet {
        name: name.to_string(),
        reason,
    };
    if !entry.is_stored() {
        return Err(invalid(format!("field {:?} is not stored", spec.field)));
    }

    let mut date_bounds = Vec::new();
    match spec.kind {
        FacetKind::Terms => {}
        FacetKind::NumericRange => {
            if !matches!(
                entry.field_type(),
                FieldType::F64(_) | FieldType::I64(_) | FieldType::U64(_)
            ) {
                return Err(invalid(format!("field {:?} is not numeric", spec.field)));
            }
            if spec.ranges.is_empty() {
                return Err(invalid("numeric_range facets need at least one range".into()));
            }
        }
        FacetKind::DateRange => {
            if !matches!(entry.field_type(), FieldType::Date(_)) {
                return Err(invalid(format!("field {:?} is not a date", spec.field)));
            }
            if spec.ranges.is_empty() {
                return Err(invalid("date_range facets need at least one range".into()));
            }
            for range in &spec.ranges {
                let start = parse_bound(range.start.as_deref()).map_err(&invalid)?;
                let end = parse_bound(range.end.as_deref()).map_err(&invalid)?;
                date_bounds.push((start, end));
            }
        }
    }
    Ok(Plan {
        name,
        spec,
        field,
        date_bounds,
    })
}

fn parse_bound(value: Option<&str>) -> Result<Option<i64>, String> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            chrono::DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.timestamp_micros())
                .map_err(|e| format!("invalid date {v:?}: {e}"))
        })
        .transpose()
}

fn terms_facet(stored: &[TantivyDocument], plan: &Plan<'_>) -> FacetResult {
    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut result = empty_result(plan);
    for doc in stored {
        let mut seen = false;
        for value in doc.get_all(plan.field) {
            let term = if let Some(s) = value.as_str() {
                s.to_string()
            } else if let Some(v) = value.as_u64() {
                v.to_string()
            } else if let Some(v) = value.as_i64() {
                v.to_string()
            } else if let Some(v) = value.as_f64() {
                v.to_string()
            } else if let Some(v) = value.as_bool() {
                v.to_string()
            } else {
                continue;
            };
            seen = true;
            result.total += 1;
            *counts.entry(term).or_default() += 1;
        }
        if !seen {
            result.missing += 1;
        }
    }

    let mut buckets: Vec<TermBucket> = counts
        .into_iter()
        .map(|(term, count)| TermBucket { term, count })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));
    if buckets.len() > plan.spec.size {
        result.other = buckets[plan.spec.size..].iter().map(|b| b.count).sum();
        buckets.truncate(plan.spec.size);
    }
    result.terms = buckets;
    result
}

fn numeric_facet(stored: &[TantivyDocument], plan: &Plan<'_>) -> FacetResult {
    let mut result = empty_result(plan);
    let mut counts = vec![0u64; plan.spec.ranges.len()];
    for doc in stored {
        let mut seen = false;
        for value in doc.get_all(plan.field) {
            let Some(v) = value
                .as_f64()
                .or_else(|| value.as_i64().map(|v| v as f64))
                .or_else(|| value.as_u64().map(|v| v as f64))
            else {
                continue;
            };
            seen = true;
            result.total += 1;
            let mut matched = false;
            for (i, range) in plan.spec.ranges.iter().enumerate() {
                if in_numeric_range(range, v) {
                    counts[i] += 1;
                    matched = true;
                }
            }
            if !matched {
                result.other += 1;
            }
        }
        if !seen {
            result.missing += 1;
        }
    }
    result.numeric_ranges = plan
        .spec
        .ranges
        .iter()
        .zip(counts)
        .map(|(range, count)| NumericBucket {
            name: range.name.clone(),
            min: range.min,
            max: range.max,
            count,
        })
        .collect();
    result
}

fn in_numeric_range(range: &FacetRange, v: f64) -> bool {
    range.min.is_none_or(|min| v >= min) && range.max.is_none_or(|max| v < max)
}

fn date_facet(stored: &[TantivyDocument], plan: &Plan<'_>) -> FacetResult {
    let mut result = empty_result(plan);
    let mut counts = vec![0u64; plan.spec.ranges.len()];
    for doc in stored {
        let mut seen = false;
        for value in doc.get_all(plan.field) {
            let Some(micros) = value.as_datetime().map(|dt| dt.into_timestamp_micros()) else {
                continue;
            };
            seen = true;
            result.total += 1;
            let mut matched = false;
            for (i, (start, end)) in plan.date_bounds.iter().enumerate() {
                if start.is_none_or(|s| micros >= s) && end.is_none_or(|e| micros < e) {
                    counts[i] += 1;
                    matched = true;
                }
            }
            if !matched {
                result.other += 1;
            }
        }
        if !seen {
            result.missing += 1;
        }
    }
    result.date_ranges = plan
        .spec
        .ranges
        .iter()
        .zip(counts)
        .map(|(range, count)| DateBucket {
            name: range.name.clone(),
            start: range.start.clone(),
            end: range.end.clone(),
            count,
        })
        .collect();
    result
}

fn empty_result(plan: &Plan<'_>) -> FacetResult {
    FacetResult {
        field: plan.spec.field.clone(),
        total: 0,
        missing: 0,
        other: 0,
        terms: Vec::new(),
        numeric_ranges: Vec::new(),
        date_ranges: Vec::new(),
    }
}
