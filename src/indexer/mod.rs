//! Bulk ingestion of JSON-lines documents.
//!
//! One [`Document`] per line. Documents that arrive without a vector get one
//! from the embedder (computed over `content`) when an embedder is supplied.
//! Bad lines and failed embeddings are logged and skipped; the batch goes on.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::search::embedder::Embedder;
use crate::search::tantivy::{Document, DocumentIndex};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub indexed: usize,
    pub embedded: usize,
    pub skipped: usize,
}

pub fn index_jsonl(
    path: &Path,
    index: &mut DocumentIndex,
    embedder: Option<&dyn Embedder>,
) -> Result<IndexStats> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let stats = index_lines(BufReader::new(file), index, embedder)
        .with_context(|| format!("index {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        indexed = stats.indexed,
        embedded = stats.embedded,
        skipped = stats.skipped,
        "index_complete"
    );
    Ok(stats)
}

/// Index every document read from `reader`, then commit once.
pub fn index_lines<R: BufRead>(
    reader: R,
    index: &mut DocumentIndex,
    embedder: Option<&dyn Embedder>,
) -> Result<IndexStats> {
    let started = Instant::now();
    let mut stats = IndexStats::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut doc: Document = match serde_json::from_str(&line) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "skipping malformed document");
                stats.skipped += 1;
                continue;
            }
        };
        if doc.id.trim().is_empty() {
            tracing::warn!(line = line_no + 1, "skipping document without id");
            stats.skipped += 1;
            continue;
        }

        if doc.vector.is_none()
            && let Some(embedder) = embedder
            && !doc.content.trim().is_empty()
        {
            match embedder.embed(&doc.content) {
                Ok(vector) => {
                    doc.vector = Some(vector);
                    stats.embedded += 1;
                }
                Err(e) => {
                    tracing::warn!(id = %doc.id, error = %e, "skipping document: embedding failed");
                    stats.skipped += 1;
                    continue;
                }
            }
        }

        index.add_document(&doc)?;
        stats.indexed += 1;
    }

    index.commit()?;
    tracing::debug!(
        indexed = stats.indexed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "committed batch"
    );
    Ok(stats)
}
