//! Embedding capability and shared diff preprocessing.

pub mod local;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

/// Maximum number of characters submitted to the diff embedder after
/// preprocessing.
pub const MAX_DIFF_EMBED_CHARS: usize = 8000;

/// Errors surfaced while generating embeddings.
#[derive(Debug, Error)]
pub enum EmbedderError {
    /// HTTP transport failed (includes the 30-second deadline firing,
    /// which reqwest reports as a timeout error).
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The endpoint answered with a non-success status.
    #[error("embedding endpoint returned {status}: {body}")]
    Status {
        /// HTTP status code received.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The response body did not match the expected contract.
    #[error("malformed embedding response: {0}")]
    Malformed(String),
    /// The embedder produced an empty vector.
    #[error("embedder returned an empty vector")]
    Empty,
}

/// Embedding capability the detector depends on. Implementations must be
/// pure within a process lifetime: the same input yields the same vector,
/// and both operations produce vectors of one fixed dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds descriptive text (title and description).
    async fn embed_text(&self, input: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embeds diff text. Implementations preprocess via
    /// [`preprocess_diff`] before embedding; the empty string is a valid
    /// input.
    async fn embed_diff(&self, input: &str) -> Result<Vec<f32>, EmbedderError>;
}

/// Reduces a unified diff to its change-carrying lines: hunk headers,
/// `diff`/`index` lines and the `+++`/`---` file markers are dropped,
/// added/removed/context lines are kept, and the result is truncated to
/// [`MAX_DIFF_EMBED_CHARS`] characters.
pub fn preprocess_diff(diff: &str) -> String {
    let mut kept = String::new();
    for line in diff.lines() {
        if line.starts_with("@@")
            || line.starts_with("diff ")
            || line.starts_with("index ")
            || line.starts_with("+++")
            || line.starts_with("---")
        {
            continue;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        if kept.len() > MAX_DIFF_EMBED_CHARS * 4 {
            break;
        }
    }
    if kept.chars().count() > MAX_DIFF_EMBED_CHARS {
        kept.chars().take(MAX_DIFF_EMBED_CHARS).collect()
    } else {
        kept
    }
}
