//! Retrieval context assembly.

use crate::embeddings::ScoredMatch;

/// Joins match texts in ranking order with a single newline.
///
/// No deduplication and no truncation happen here; length limits are a
/// concern of whoever calls the completion service.
pub fn assemble(matches: &[ScoredMatch]) -> String {
    matches
        .iter()
        .map(|hit| hit.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
