//! Similarity primitives shared by the ranking pipeline.

use std::collections::HashSet;

/// Cosine similarity between two embedding vectors.
///
/// Operates on the overlapping prefix `min(|a|, |b|)` so vectors of
/// mismatched length degrade gracefully instead of panicking. Dot product
/// and both squared norms are accumulated in `f64` in a single pass, which
/// keeps results stable to well past five decimal places across platforms.
/// Returns 0.0 when either norm is zero.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for i in 0..len {
        let x = a[i] as f64;
        let y = b[i] as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Jaccard similarity between two string sets.
///
/// Two empty sets compare as identical (1.0); exactly one empty set yields
/// 0.0. Membership is counted by iterating the smaller set and probing the
/// larger, so the cost is `O(min(|a|, |b|))` hash lookups.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let intersection = small.iter().filter(|item| large.contains(*item)).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}
