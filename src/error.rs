//! Top-level error taxonomy for detector operations.

use thiserror::Error;

use crate::embedder::EmbedderError;
use crate::storage::StorageError;

/// Result alias for detector operations.
pub type Result<T> = std::result::Result<T, DetectorError>;

/// Errors surfaced to detector callers, tagged by kind.
///
/// Storage failures are mostly recovered locally (degraded init, logged
/// save failures, search fallback); the `Storage` variant appears only on
/// the explicitly surfaced paths such as `get`/`delete`/`get_all` and
/// snapshot file I/O.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The input violates a descriptor or batch constraint. The failing
    /// operation performs no partial work.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Inconsistent thresholds, invalid weights or out-of-range tunables,
    /// raised at construction or on `set_weights`.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The embedder failed or returned an unusable vector.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    /// The persistence layer failed on a surfaced path.
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
}
