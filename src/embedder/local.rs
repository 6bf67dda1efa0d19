//! Deterministic local embedder for offline use and tests.

use async_trait::async_trait;

use super::{preprocess_diff, Embedder, EmbedderError};

/// Default vector dimension produced by the local embedder.
pub const DEFAULT_LOCAL_DIMENSIONS: usize = 256;

/// Content-dependent embedder that needs no remote service: a
/// hash-indexed bag of characters, L2-normalized. Similar texts land on
/// similar character distributions, which is enough signal for the
/// ranking pipeline and keeps every test fully deterministic.
#[derive(Debug, Clone)]
pub struct LocalHashEmbedder {
    dimensions: usize,
}

impl LocalHashEmbedder {
    /// Builds an embedder emitting vectors of the given dimension.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    /// Vector dimension this embedder emits.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn bag_of_chars(&self, input: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        if input.is_empty() {
            // Fixed basis vector so two empty inputs compare as identical.
            vector[0] = 1.0;
            return vector;
        }
        for ch in input.chars() {
            let slot = char_slot(ch) % self.dimensions;
            vector[slot] += 1.0;
        }
        let norm = vector.iter().map(|v| (*v as f64).powi(2)).sum::<f64>().sqrt();
        for value in &mut vector {
            *value = (*value as f64 / norm) as f32;
        }
        vector
    }
}

impl Default for LocalHashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for LocalHashEmbedder {
    async fn embed_text(&self, input: &str) -> Result<Vec<f32>, EmbedderError> {
        Ok(self.bag_of_chars(input))
    }

    async fn embed_diff(&self, input: &str) -> Result<Vec<f32>, EmbedderError> {
        Ok(self.bag_of_chars(&preprocess_diff(input)))
    }
}

/// Deterministic slot assignment per character, case-folded so title
/// casing does not split mass across slots.
fn char_slot(ch: char) -> usize {
    let mut hash = ch.to_ascii_lowercase() as u64 ^ 0x9e37_79b1_85eb_ca87;
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
    hash ^= hash >> 33;
    hash as usize
}
