//! Exact cosine k-NN over stored vectors.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tantivy::DocAddress;

/// Cosine similarity of two equal-length vectors.
///
/// `None` when the lengths differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot = dot_product(a, b);
    let norm = (dot_product(a, a) * dot_product(b, b)).sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(dot / norm)
}

#[inline]
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[derive(Debug, Clone, Copy)]
struct ScoredEntry {
    score: f32,
    address: DocAddress,
}

impl PartialEq for ScoredEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredEntry {}

impl PartialOrd for ScoredEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredEntry {
    // Lower address wins ties, so it must compare as "greater".
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.address.cmp(&self.address))
    }
}

/// Bounded collector keeping the `k` highest-scoring documents.
pub struct TopK {
    k: usize,
    heap: BinaryHeap<std::cmp::Reverse<ScoredEntry>>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(4096)),
        }
    }

    pub fn push(&mut self, address: DocAddress, score: f32) {
        if self.k == 0 {
            return;
        }
        self.heap
            .push(std::cmp::Reverse(ScoredEntry { score, address }));
        if self.heap.len() > self.k {
            self.heap.pop();
        }
    }

    /// Best first; ties broken by ascending address.
    pub fn into_sorted_vec(self) -> Vec<(DocAddress, f32)> {
        let mut results: Vec<ScoredEntry> = self.heap.into_iter().map(|e| e.0).collect();
        results.sort_by(|a, b| b.cmp(a));
        results.into_iter().map(|e| (e.address, e.score)).collect()
    }
}
