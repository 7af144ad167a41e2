//! Shared embedding data structures passed between pipeline stages.

use serde::{Deserialize, Serialize};

/// Fixed-dimension embedding produced by the embedding service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    /// Wraps raw model output.
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Number of components.
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Borrowed view of the components.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// Unit of source text stored in and retrieved from the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSegment {
    /// Source text submitted to the embedding model.
    pub text: String,
    /// Embedding computed from `text`.
    pub embedding: EmbeddingVector,
}

impl TextSegment {
    /// Pairs text with the embedding computed from it.
    pub fn new(text: impl Into<String>, embedding: EmbeddingVector) -> Self {
        Self {
            text: text.into(),
            embedding,
        }
    }
}

/// Query result row: stored text plus its similarity score and 1-based rank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMatch {
    /// Stored segment text.
    pub text: String,
    /// Similarity score; higher always means more similar.
    pub score: f64,
    /// Position in the ranking, starting at 1.
    pub rank: usize,
}

impl ScoredMatch {
    /// First `limit` characters of the text, for log previews.
    pub fn preview(&self, limit: usize) -> String {
        self.text.chars().take(limit).collect()
    }
}
