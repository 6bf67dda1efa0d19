//! Signal weighting, score breakdowns and the duplicate decision rule.

use serde::{Deserialize, Serialize};

use crate::error::DetectorError;

/// Default weight of the text-embedding similarity signal.
pub const DEFAULT_TEXT_WEIGHT: f64 = 0.45;
/// Default weight of the diff-embedding similarity signal.
pub const DEFAULT_DIFF_WEIGHT: f64 = 0.35;
/// Default weight of the file-overlap signal.
pub const DEFAULT_FILE_WEIGHT: f64 = 0.20;
/// Default score at or above which a candidate is a duplicate.
pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.90;
/// Default score at or above which a candidate is a possible duplicate.
pub const DEFAULT_POSSIBLE_THRESHOLD: f64 = 0.82;

/// Relative weights of the three ranking signals. Always normalized to
/// sum to 1.0 on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalWeights {
    /// Weight of the text similarity signal.
    pub text: f64,
    /// Weight of the diff similarity signal.
    pub diff: f64,
    /// Weight of the file-overlap signal.
    pub file: f64,
}

impl SignalWeights {
    /// Validates and normalizes a weight triple. Negative, non-finite and
    /// all-zero weights are rejected as configuration errors.
    pub fn new(text: f64, diff: f64, file: f64) -> Result<Self, DetectorError> {
        for (name, value) in [("text", text), ("diff", diff), ("file", file)] {
            if !value.is_finite() || value < 0.0 {
                return Err(DetectorError::Configuration(format!(
                    "{name} weight must be a nonnegative finite number, got {value}"
                )));
            }
        }
        let sum = text + diff + file;
        if sum <= 0.0 {
            return Err(DetectorError::Configuration(
                "weights must not all be zero".to_string(),
            ));
        }
        Ok(Self {
            text: text / sum,
            diff: diff / sum,
            file: file / sum,
        })
    }

    /// Weights as the `[text, diff, file]` triple.
    pub fn as_array(&self) -> [f64; 3] {
        [self.text, self.diff, self.file]
    }
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEXT_WEIGHT,
            diff: DEFAULT_DIFF_WEIGHT,
            file: DEFAULT_FILE_WEIGHT,
        }
    }
}

/// Decision cutoffs applied to the combined score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    /// Score at or above which the result is `duplicate`.
    pub duplicate: f64,
    /// Score at or above which the result is `possible`.
    pub possible: f64,
}

impl DecisionThresholds {
    /// Validates a threshold pair: both in `[0, 1]`, duplicate ≥ possible.
    pub fn new(duplicate: f64, possible: f64) -> Result<Self, DetectorError> {
        for (name, value) in [("duplicate", duplicate), ("possible", possible)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(DetectorError::Configuration(format!(
                    "{name} threshold must lie in [0, 1], got {value}"
                )));
            }
        }
        if duplicate < possible {
            return Err(DetectorError::Configuration(format!(
                "duplicate threshold {duplicate} must not be below possible threshold {possible}"
            )));
        }
        Ok(Self {
            duplicate,
            possible,
        })
    }
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            duplicate: DEFAULT_DUPLICATE_THRESHOLD,
            possible: DEFAULT_POSSIBLE_THRESHOLD,
        }
    }
}

/// Classification tier of a check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// Confident near-duplicate of a prior record.
    Duplicate,
    /// Plausible duplicate warranting review.
    Possible,
    /// No sufficiently similar prior record.
    Unique,
}

impl ResultKind {
    /// Stable string form used by the analytics tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Possible => "possible",
            Self::Unique => "unique",
        }
    }

    /// Parses the stable string form; unknown strings map to `Unique`.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "duplicate" => Self::Duplicate,
            "possible" => Self::Possible,
            _ => Self::Unique,
        }
    }
}

/// Outcome of a duplicate check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Classification tier.
    pub result: ResultKind,
    /// Confidence in `[0, 1]`: the best combined score, 0.0 when no
    /// candidates exist.
    pub confidence: f64,
    /// Identifier of the best prior match; always present for duplicate
    /// and possible results.
    pub original_id: Option<i64>,
}

/// Per-candidate score decomposition produced during re-ranking.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    /// Candidate identifier.
    pub candidate_id: i64,
    /// Cosine similarity of the text embeddings.
    pub text_similarity: f64,
    /// Cosine similarity of the diff embeddings.
    pub diff_similarity: f64,
    /// Jaccard similarity of the file sets.
    pub file_similarity: f64,
    /// `weights.text * text_similarity`.
    pub weighted_text: f64,
    /// `weights.diff * diff_similarity`.
    pub weighted_diff: f64,
    /// `weights.file * file_similarity`.
    pub weighted_file: f64,
    /// Final combined score.
    pub total: f64,
    /// Weights active when the breakdown was produced.
    pub weights: SignalWeights,
}

/// Combines the three similarity signals under the given weights,
/// retaining every intermediate contribution for explainability.
pub fn score_candidate(
    candidate_id: i64,
    text_similarity: f64,
    diff_similarity: f64,
    file_similarity: f64,
    weights: SignalWeights,
) -> ScoreBreakdown {
    let weighted_text = weights.text * text_similarity;
    let weighted_diff = weights.diff * diff_similarity;
    let weighted_file = weights.file * file_similarity;
    ScoreBreakdown {
        candidate_id,
        text_similarity,
        diff_similarity,
        file_similarity,
        weighted_text,
        weighted_diff,
        weighted_file,
        total: weighted_text + weighted_diff + weighted_file,
        weights,
    }
}

/// Applies the decision thresholds to the best-scoring candidate. Scores
/// exactly at a threshold classify at the higher tier. With no candidate
/// the result is `unique` at zero confidence.
pub fn decide(best: Option<&ScoreBreakdown>, thresholds: &DecisionThresholds) -> CheckResult {
    let Some(best) = best else {
        return CheckResult {
            result: ResultKind::Unique,
            confidence: 0.0,
            original_id: None,
        };
    };
    let confidence = best.total.clamp(0.0, 1.0);
    if best.total >= thresholds.duplicate {
        CheckResult {
            result: ResultKind::Duplicate,
            confidence,
            original_id: Some(best.candidate_id),
        }
    } else if best.total >= thresholds.possible {
        CheckResult {
            result: ResultKind::Possible,
            confidence,
            original_id: Some(best.candidate_id),
        }
    } else {
        CheckResult {
            result: ResultKind::Unique,
            confidence,
            original_id: None,
        }
    }
}
