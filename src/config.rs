//! Detector tuning knobs and their validation.

use crate::bloom::{DEFAULT_BLOOM_BITS, DEFAULT_BLOOM_HASHES, MAX_BLOOM_BITS, MIN_BLOOM_BITS};
use crate::error::DetectorError;
use crate::ranker::{DecisionThresholds, SignalWeights};

/// Default number of candidates retrieved for re-ranking.
pub const DEFAULT_MAX_CANDIDATES: usize = 20;
/// Largest permitted candidate count.
pub const MAX_MAX_CANDIDATES: usize = 1000;
/// Default embedding cache capacity per layer.
pub const DEFAULT_CACHE_SIZE: usize = 1000;
/// Largest permitted cache capacity.
pub const MAX_CACHE_SIZE: usize = 100_000;

/// Tunable knobs that bound detector behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Decision cutoffs for the combined score.
    pub thresholds: DecisionThresholds,
    /// Relative weights of the three ranking signals.
    pub weights: SignalWeights,
    /// Bloom filter bit count, in `[64, 2^26]`.
    pub bloom_filter_size: usize,
    /// Bloom hash-function count.
    pub bloom_hashes: usize,
    /// Top-k retrieved from candidate search, in `[1, 1000]`.
    pub max_candidates: usize,
    /// Whether the embedding caches are active.
    pub enable_cache: bool,
    /// Capacity of each cache layer, in `[1, 100_000]`.
    pub cache_size: usize,
    /// Opaque repository identifier; carried for cross-repo dispatch by
    /// external composition, never interpreted by the core.
    pub repo_id: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            thresholds: DecisionThresholds::default(),
            weights: SignalWeights::default(),
            bloom_filter_size: DEFAULT_BLOOM_BITS,
            bloom_hashes: DEFAULT_BLOOM_HASHES,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            enable_cache: true,
            cache_size: DEFAULT_CACHE_SIZE,
            repo_id: None,
        }
    }
}

impl DetectorConfig {
    /// Checks every range constraint, returning a configuration error for
    /// the first violation. Thresholds and weights are re-validated here
    /// because the fields are publicly assignable.
    pub fn validate(&self) -> Result<(), DetectorError> {
        DecisionThresholds::new(self.thresholds.duplicate, self.thresholds.possible)?;
        SignalWeights::new(self.weights.text, self.weights.diff, self.weights.file)?;
        if !(MIN_BLOOM_BITS..=MAX_BLOOM_BITS).contains(&self.bloom_filter_size) {
            return Err(DetectorError::Configuration(format!(
                "bloom_filter_size {} outside [{MIN_BLOOM_BITS}, {MAX_BLOOM_BITS}]",
                self.bloom_filter_size
            )));
        }
        if self.bloom_hashes == 0 {
            return Err(DetectorError::Configuration(
                "bloom_hashes must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_MAX_CANDIDATES).contains(&self.max_candidates) {
            return Err(DetectorError::Configuration(format!(
                "max_candidates {} outside [1, {MAX_MAX_CANDIDATES}]",
                self.max_candidates
            )));
        }
        if !(1..=MAX_CACHE_SIZE).contains(&self.cache_size) {
            return Err(DetectorError::Configuration(format!(
                "cache_size {} outside [1, {MAX_CACHE_SIZE}]",
                self.cache_size
            )));
        }
        Ok(())
    }
}
