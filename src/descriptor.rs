//! Pull-request descriptors, their validation limits and sanitization.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Maximum title length in characters.
pub const MAX_TITLE_CHARS: usize = 500;
/// Maximum description length in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 10_000;
/// Maximum number of changed files per descriptor.
pub const MAX_FILES: usize = 1000;
/// Maximum length of a single file path in characters.
pub const MAX_FILE_PATH_CHARS: usize = 500;
/// Maximum diff length in characters.
pub const MAX_DIFF_CHARS: usize = 500_000;

/// Validation failures for a descriptor. Each variant names the violated
/// constraint; the detector reports them under its `invalid_input` kind.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// Identifier must be strictly positive.
    #[error("id must be a positive integer, got {0}")]
    NonPositiveId(i64),
    /// Title must be non-empty.
    #[error("title must not be empty")]
    EmptyTitle,
    /// Title exceeds [`MAX_TITLE_CHARS`].
    #[error("title of {0} chars exceeds the {MAX_TITLE_CHARS} char limit")]
    TitleTooLong(usize),
    /// Description exceeds [`MAX_DESCRIPTION_CHARS`].
    #[error("description of {0} chars exceeds the {MAX_DESCRIPTION_CHARS} char limit")]
    DescriptionTooLong(usize),
    /// File list exceeds [`MAX_FILES`].
    #[error("{0} files exceeds the {MAX_FILES} file limit")]
    TooManyFiles(usize),
    /// A file path is empty.
    #[error("file path at index {0} is empty")]
    EmptyFilePath(usize),
    /// A file path exceeds [`MAX_FILE_PATH_CHARS`].
    #[error("file path at index {index} is {len} chars, limit is {MAX_FILE_PATH_CHARS}")]
    FilePathTooLong {
        /// Position of the offending path in the file list.
        index: usize,
        /// Its length in characters.
        len: usize,
    },
    /// Diff exceeds [`MAX_DIFF_CHARS`].
    #[error("diff of {0} chars exceeds the {MAX_DIFF_CHARS} char limit")]
    DiffTooLong(usize),
}

/// Incoming change-request descriptor submitted for a duplicate check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrDescriptor {
    /// Strictly positive identifier; the primary key of the index.
    pub id: i64,
    /// Short human-readable title.
    pub title: String,
    /// Longer free-form description; may be empty.
    #[serde(default)]
    pub description: String,
    /// Changed file paths, in submission order.
    #[serde(default)]
    pub files: Vec<String>,
    /// Optional unified diff text.
    #[serde(default)]
    pub diff: Option<String>,
}

impl PrDescriptor {
    /// Builds a descriptor with an empty file list and no diff.
    pub fn new(id: i64, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: description.into(),
            files: Vec::new(),
            diff: None,
        }
    }

    /// Attaches a changed-file list.
    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches a unified diff.
    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = Some(diff.into());
        self
    }

    /// Enforces every structural constraint. No partial work: the check
    /// pipeline runs this before touching any state.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.id <= 0 {
            return Err(DescriptorError::NonPositiveId(self.id));
        }
        if self.title.is_empty() {
            return Err(DescriptorError::EmptyTitle);
        }
        let title_chars = self.title.chars().count();
        if title_chars > MAX_TITLE_CHARS {
            return Err(DescriptorError::TitleTooLong(title_chars));
        }
        let description_chars = self.description.chars().count();
        if description_chars > MAX_DESCRIPTION_CHARS {
            return Err(DescriptorError::DescriptionTooLong(description_chars));
        }
        if self.files.len() > MAX_FILES {
            return Err(DescriptorError::TooManyFiles(self.files.len()));
        }
        for (index, path) in self.files.iter().enumerate() {
            if path.is_empty() {
                return Err(DescriptorError::EmptyFilePath(index));
            }
            let len = path.chars().count();
            if len > MAX_FILE_PATH_CHARS {
                return Err(DescriptorError::FilePathTooLong { index, len });
            }
        }
        if let Some(diff) = &self.diff {
            let diff_chars = diff.chars().count();
            if diff_chars > MAX_DIFF_CHARS {
                return Err(DescriptorError::DiffTooLong(diff_chars));
            }
        }
        Ok(())
    }

    /// Produces the sanitized view the rest of the pipeline operates on:
    /// control bytes stripped from the text fields, file paths normalized.
    pub fn sanitize(&self) -> SanitizedDescriptor {
        let files: Vec<String> = self
            .files
            .iter()
            .map(|path| normalize_path(&strip_control_bytes(path)))
            .filter(|path| !path.is_empty())
            .collect();
        SanitizedDescriptor {
            id: self.id,
            title: strip_control_bytes(&self.title),
            description: strip_control_bytes(&self.description),
            files,
            diff: strip_control_bytes(self.diff.as_deref().unwrap_or("")),
        }
    }
}

/// Descriptor after sanitization; the shape the embedding, ranking and
/// storage stages consume.
#[derive(Debug, Clone)]
pub struct SanitizedDescriptor {
    /// Identifier carried through unchanged.
    pub id: i64,
    /// Title with control bytes removed.
    pub title: String,
    /// Description with control bytes removed.
    pub description: String,
    /// Normalized file paths; empty results dropped.
    pub files: Vec<String>,
    /// Diff text, flattened to the empty string when absent.
    pub diff: String,
}

impl SanitizedDescriptor {
    /// Text submitted to the text embedder: title, a newline, description.
    pub fn combined_text(&self) -> String {
        format!("{}\n{}", self.title, self.description)
    }

    /// File paths as a set, duplicates collapsed.
    pub fn file_set(&self) -> HashSet<String> {
        self.files.iter().cloned().collect()
    }

    /// Content fingerprint: SHA-256 hex over the concatenated text fields.
    /// Feeds the bloom filter only; never persisted.
    pub fn fingerprint(&self) -> String {
        content_fingerprint(&self.title, &self.description, &self.diff)
    }
}

/// SHA-256 hex digest of `title ⊕ description ⊕ diff`.
pub fn content_fingerprint(title: &str, description: &str, diff: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(description.as_bytes());
    hasher.update(diff.as_bytes());
    hex::encode(hasher.finalize())
}

/// Removes C0 control bytes (except tab/newline/carriage-return) and DEL.
fn strip_control_bytes(input: &str) -> String {
    input
        .chars()
        .filter(|&ch| !matches!(ch, '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}'))
        .collect()
}

/// Normalizes a file path: backslashes become forward slashes, leading
/// slashes are dropped, and `..` segments are erased so a hostile path
/// cannot traverse upward.
fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "..")
        .collect::<Vec<_>>()
        .join("/")
}
