//! Maps [`SearchOptions`] onto an [`EngineRequest`].

use super::request::SearchOptions;
use crate::search::query::{EngineRequest, HighlightRequest};

/// Apply execution options to `request`. `None` leaves it untouched.
///
/// `size` and `from` are only applied when greater than zero. Sort keys are
/// applied together as one composite ordering; `_score` always sorts by
/// descending relevance. A present `highlight` always enables highlighting
/// with its field list verbatim, even when that list is empty.
pub fn apply_search_options(request: &mut EngineRequest, options: Option<&SearchOptions>) {
    let Some(options) = options else {
        return;
    };

    if let Some(size) = options.size.filter(|s| *s > 0) {
        request.size = size;
    }
    if let Some(from) = options.from.filter(|f| *f > 0) {
        request.from = from;
    }
    if !options.fields.is_empty() {
        request.fields = options.fields.clone();
    }
    if options.explain {
        request.explain = true;
    }
    if let Some(highlight) = &options.highlight {
        request.highlight = Some(HighlightRequest {
            style: highlight.style,
            fields: highlight.fields.clone(),
        });
    }
    if !options.sort.is_empty() {
        let tokens: Vec<String> = options
            .sort
            .iter()
            .map(|s| {
                if s.field == "_score" {
                    "-_score".to_string()
                } else if s.desc {
                    format!("-{}", s.field)
                } else {
                    s.field.clone()
                }
            })
            .collect();
        request.sort_by(&tokens);
    }
}
