//! Vector index: the ranking contract layered over a [`VectorStore`].

use tracing::{debug, info};

use crate::embeddings::{EmbeddingVector, ScoredMatch, TextSegment};
use crate::error::PipelineError;
use crate::vector_store::{StoredHit, VectorStore};

/// Extra rows requested from the backend so ties straddling the k-th position
/// are settled here by insertion order. Ties wider than this are still cut by
/// the backend.
const TIE_HEADROOM: usize = 8;

/// Typed insert/query wrapper that owns the similarity-ranking contract.
///
/// `query` returns exactly `min(k, n)` matches ordered by descending score,
/// ties resolved by insertion order, whatever order the backend reports.
pub struct VectorIndex {
    store: Box<dyn VectorStore>,
    dimension: usize,
}

impl VectorIndex {
    /// Wraps `store`, accepting only vectors of `dimension` components.
    pub fn new(store: Box<dyn VectorStore>, dimension: usize) -> Self {
        Self { store, dimension }
    }

    /// Backend label.
    pub fn describe(&self) -> String {
        self.store.describe()
    }

    /// Reachability probe used by the health check.
    pub fn ping(&self) -> anyhow::Result<()> {
        self.store.ping()
    }

    /// Creates the backing collection if needed.
    ///
    /// An existing collection sized for other vectors is a `DimensionMismatch`.
    pub fn prepare(&self) -> Result<(), PipelineError> {
        let existing = self
            .store
            .prepare(self.dimension)
            .map_err(|cause| PipelineError::IndexWriteFailed { cause })?;
        match existing {
            Some(actual) if actual != self.dimension => Err(PipelineError::DimensionMismatch {
                expected: self.dimension,
                actual,
            }),
            _ => Ok(()),
        }
    }

    /// Stores a segment; a dimension mismatch fails before any backend call.
    pub fn insert(&self, segment: &TextSegment) -> Result<(), PipelineError> {
        self.check_dimension(&segment.embedding)?;
        self.store
            .insert(segment)
            .map_err(|cause| PipelineError::IndexWriteFailed { cause })?;
        info!(
            store = %self.store.describe(),
            chars = segment.text.chars().count(),
            "segment stored"
        );
        Ok(())
    }

    /// Returns the `k` nearest stored segments, best first.
    pub fn query(
        &self,
        vector: &EmbeddingVector,
        k: usize,
    ) -> Result<Vec<ScoredMatch>, PipelineError> {
        self.check_dimension(vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let hits = self
            .store
            .search(vector.as_slice(), k.saturating_add(TIE_HEADROOM))
            .map_err(|cause| PipelineError::IndexQueryFailed { cause })?;
        debug!(returned = hits.len(), k, "backend search complete");
        Ok(rank(hits, k))
    }

    fn check_dimension(&self, vector: &EmbeddingVector) -> Result<(), PipelineError> {
        if vector.dimension() != self.dimension {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.dimension(),
            });
        }
        Ok(())
    }
}

fn rank(mut hits: Vec<StoredHit>, k: usize) -> Vec<ScoredMatch> {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
    hits.truncate(k);
    hits.into_iter()
        .enumerate()
        .map(|(idx, hit)| ScoredMatch {
            text: hit.text,
            score: hit.score,
            rank: idx + 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::{MemoryStore, Metric};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn segment(text: &str, values: &[f32]) -> TextSegment {
        TextSegment::new(text, EmbeddingVector::new(values.to_vec()))
    }

    fn index_with(segments: &[(&str, [f32; 2])]) -> VectorIndex {
        let index = VectorIndex::new(Box::new(MemoryStore::new(Metric::InnerProduct)), 2);
        for (text, values) in segments {
            index.insert(&segment(text, values)).unwrap();
        }
        index
    }

    #[test]
    fn returns_min_of_k_and_size() {
        let index = index_with(&[("a", [1.0, 0.0]), ("b", [0.5, 0.0]), ("c", [0.2, 0.0])]);
        let query = EmbeddingVector::new(vec![1.0, 0.0]);
        for k in 0..6 {
            assert_eq!(index.query(&query, k).unwrap().len(), k.min(3), "k={k}");
        }
    }

    #[test]
    fn strictly_descending_with_ranks() {
        let index = index_with(&[("low", [0.1, 0.0]), ("high", [0.9, 0.0]), ("mid", [0.5, 0.0])]);
        let matches = index
            .query(&EmbeddingVector::new(vec![1.0, 0.0]), 3)
            .unwrap();
        let texts: Vec<_> = matches.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["high", "mid", "low"]);
        assert!(matches.windows(2).all(|pair| pair[0].score > pair[1].score));
        let ranks: Vec<_> = matches.iter().map(|m| m.rank).collect();
        assert_eq!(ranks, [1, 2, 3]);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = index_with(&[
            ("first", [1.0, 0.0]),
            ("second", [1.0, 0.0]),
            ("third", [1.0, 0.0]),
        ]);
        let matches = index
            .query(&EmbeddingVector::new(vec![1.0, 0.0]), 2)
            .unwrap();
        let texts: Vec<_> = matches.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["first", "second"]);
    }

    #[test]
    fn querying_with_own_embedding_ranks_segment_first() {
        let index = VectorIndex::new(Box::new(MemoryStore::new(Metric::Cosine)), 2);
        index.insert(&segment("other", &[0.0, 1.0])).unwrap();
        let target = segment("target", &[0.6, 0.8]);
        index.insert(&target).unwrap();
        index.insert(&segment("near", &[0.8, 0.6])).unwrap();

        let matches = index.query(&target.embedding, 1).unwrap();
        assert_eq!(matches[0].text, "target");
        let all = index.query(&target.embedding, 10).unwrap();
        let best = all.iter().map(|m| m.score).fold(f64::MIN, f64::max);
        assert_eq!(matches[0].score, best);
    }

    #[test]
    fn short_index_is_not_an_error() {
        let index = index_with(&[]);
        assert!(index
            .query(&EmbeddingVector::new(vec![1.0, 0.0]), 3)
            .unwrap()
            .is_empty());
    }

    #[derive(Default)]
    struct CountingStore {
        calls: Arc<AtomicUsize>,
        last_limit: Arc<AtomicUsize>,
        existing_dimension: Option<usize>,
        hits: Vec<StoredHit>,
    }

    impl VectorStore for CountingStore {
        fn describe(&self) -> String {
            "counting".to_string()
        }

        fn ping(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn prepare(&self, _dimension: usize) -> anyhow::Result<Option<usize>> {
            Ok(self.existing_dimension)
        }

        fn insert(&self, _segment: &TextSegment) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn search(&self, _vector: &[f32], limit: usize) -> anyhow::Result<Vec<StoredHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_limit.store(limit, Ordering::SeqCst);
            Ok(self.hits.clone())
        }
    }

    fn hit(text: &str, score: f64, sequence: u64) -> StoredHit {
        StoredHit {
            text: text.to_string(),
            score,
            sequence,
        }
    }

    #[test]
    fn dimension_mismatch_fails_before_backend_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let index = VectorIndex::new(
            Box::new(CountingStore {
                calls: calls.clone(),
                ..CountingStore::default()
            }),
            768,
        );
        let short = segment("text", &[1.0, 2.0]);
        assert!(matches!(
            index.insert(&short).unwrap_err(),
            PipelineError::DimensionMismatch {
                expected: 768,
                actual: 2
            }
        ));
        assert!(matches!(
            index.query(&short.embedding, 3).unwrap_err(),
            PipelineError::DimensionMismatch { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn existing_collection_of_other_dimension_is_mismatch() {
        let index = VectorIndex::new(
            Box::new(CountingStore {
                existing_dimension: Some(384),
                ..CountingStore::default()
            }),
            768,
        );
        assert!(matches!(
            index.prepare().unwrap_err(),
            PipelineError::DimensionMismatch {
                expected: 768,
                actual: 384
            }
        ));
    }

    #[test]
    fn existing_collection_of_same_dimension_is_accepted() {
        for existing_dimension in [None, Some(768)] {
            let index = VectorIndex::new(
                Box::new(CountingStore {
                    existing_dimension,
                    ..CountingStore::default()
                }),
                768,
            );
            index.prepare().unwrap();
        }
    }

    #[test]
    fn reorders_and_truncates_backend_results() {
        let index = VectorIndex::new(
            Box::new(CountingStore {
                // overfetching backend that reports in arbitrary order
                hits: vec![
                    hit("late tie", 0.5, 9),
                    hit("best", 0.9, 4),
                    hit("early tie", 0.5, 2),
                    hit("worst", 0.1, 1),
                ],
                ..CountingStore::default()
            }),
            1,
        );
        let matches = index.query(&EmbeddingVector::new(vec![1.0]), 3).unwrap();
        let texts: Vec<_> = matches.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["best", "early tie", "late tie"]);
    }

    #[test]
    fn requests_headroom_so_ties_at_the_cut_keep_insertion_order() {
        let last_limit = Arc::new(AtomicUsize::new(0));
        let index = VectorIndex::new(
            Box::new(CountingStore {
                last_limit: last_limit.clone(),
                // the backend ranked a later duplicate ahead of the earlier one
                hits: vec![
                    hit("best", 0.9, 1),
                    hit("rerun copy", 0.7, 8),
                    hit("first copy", 0.7, 3),
                ],
                ..CountingStore::default()
            }),
            1,
        );
        let matches = index.query(&EmbeddingVector::new(vec![1.0]), 2).unwrap();
        assert_eq!(last_limit.load(Ordering::SeqCst), 2 + TIE_HEADROOM);
        let texts: Vec<_> = matches.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["best", "first copy"]);
    }

    #[test]
    fn zero_k_skips_backend() {
        let calls = Arc::new(AtomicUsize::new(0));
        let index = VectorIndex::new(
            Box::new(CountingStore {
                calls: calls.clone(),
                ..CountingStore::default()
            }),
            1,
        );
        assert!(index
            .query(&EmbeddingVector::new(vec![1.0]), 0)
            .unwrap()
            .is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
