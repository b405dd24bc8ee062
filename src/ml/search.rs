//! Exact nearest-neighbour search over stored embeddings
//!
//! The index of a single medical record holds at most a few hundred chunks, so a
//! flat scan is both exact and fast enough; no approximate structure is kept.

use crate::config::DistanceMetric;
use crate::ml::embedding::Embedding;
use std::cmp::Ordering;

impl DistanceMetric {
    /// Similarity of two vectors; larger is closer for every metric
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::DotProduct => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            DistanceMetric::Euclidean => {
                let distance = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (x - y).powi(2))
                    .sum::<f32>()
                    .sqrt();
                1.0 / (1.0 + distance)
            }
        }
    }
}

/// Cosine similarity; zero vectors are orthogonal to everything
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// A scored candidate
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId<K> {
    pub key: K,
    pub score: f32,
}

/// Score every candidate against `query` and keep the best `k`, best first.
///
/// Candidates whose dimension differs from the query are skipped.
pub fn top_k<K, I>(query: &[f32], candidates: I, k: usize, metric: DistanceMetric) -> Vec<ScoredId<K>>
where
    I: IntoIterator<Item = (K, Embedding)>,
{
    let mut skipped = 0usize;
    let mut scored: Vec<ScoredId<K>> = candidates
        .into_iter()
        .filter_map(|(key, vector)| {
            if vector.len() != query.len() {
                skipped += 1;
                return None;
            }
            let score = metric.similarity(query, &vector);
            Some(ScoredId { key, score })
        })
        .collect();

    if skipped > 0 {
        log::warn!(
            "Skipped {} stored vectors with a dimension other than {}",
            skipped,
            query.len()
        );
    }

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(k);
    scored
}
