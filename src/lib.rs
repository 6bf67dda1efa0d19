#![warn(missing_docs)]
//! Core library entry points for the repomem duplicate detector.
//!
//! repomem ingests pull-request descriptors, maintains a persistent
//! semantic index of them, and answers two questions with quantified
//! confidence: is a new descriptor a near-duplicate of an indexed one,
//! and which indexed descriptors best match a free-text query.

pub mod attribution;
pub mod bloom;
pub mod cache;
pub mod config;
pub mod descriptor;
pub mod detector;
pub mod embedder;
pub mod error;
pub mod ranker;
pub mod record;
pub mod similarity;
pub mod storage;

pub use attribution::AttributionGraph;
pub use bloom::{BloomError, BloomFilter};
pub use cache::{CacheStats, EmbeddingCache};
pub use config::DetectorConfig;
pub use descriptor::{DescriptorError, PrDescriptor, SanitizedDescriptor};
pub use detector::{BatchCheckOutcome, CheckOptions, DetailedCheckResult, DuplicateDetector};
pub use embedder::local::LocalHashEmbedder;
pub use embedder::openai::OpenAiEmbedder;
pub use embedder::{Embedder, EmbedderError};
pub use error::DetectorError;
pub use ranker::{CheckResult, DecisionThresholds, ResultKind, ScoreBreakdown, SignalWeights};
pub use record::{IndexStats, SearchHit, Snapshot, StoredRecord};
pub use storage::memory::MemoryStorage;
pub use storage::postgres::PostgresStorage;
pub use storage::snapshot::SnapshotStorage;
pub use storage::sqlite::SqliteStorage;
pub use storage::{Analytics, CheckRow, Storage, StorageError, VectorMatch};
