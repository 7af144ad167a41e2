//! Vector store backends behind a narrow blocking interface.
//!
//! Every backend reports its native similarity or distance value; [`Metric`]
//! converts those values so that a [`StoredHit::score`] is always
//! "higher is more similar", whatever the store computes internally.

use anyhow::Result;
use clap::ValueEnum;

use crate::embeddings::TextSegment;

pub mod memory;
pub mod milvus;
#[cfg(feature = "pgvector")]
pub mod pgvector;

pub use memory::MemoryStore;
pub use milvus::MilvusStore;
#[cfg(feature = "pgvector")]
pub use pgvector::{PgVectorStore, TableName};

/// Similarity metric used to rank stored vectors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Metric {
    /// Cosine similarity in `[-1, 1]`.
    Cosine,
    /// Raw dot product.
    InnerProduct,
    /// Negated Euclidean (L2) distance.
    Euclidean,
}

impl Metric {
    /// Similarity between two vectors of equal length, higher is closer.
    pub fn similarity(self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Metric::Cosine => {
                let dot = dot(a, b);
                let norm = dot_self(a).sqrt() * dot_self(b).sqrt();
                if norm == 0.0 {
                    0.0
                } else {
                    dot / norm
                }
            }
            Metric::InnerProduct => dot(a, b),
            Metric::Euclidean => -a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = f64::from(*x) - f64::from(*y);
                    d * d
                })
                .sum::<f64>()
                .sqrt(),
        }
    }

    /// Milvus `metricType` name.
    pub fn milvus_name(self) -> &'static str {
        match self {
            Metric::Cosine => "COSINE",
            Metric::InnerProduct => "IP",
            Metric::Euclidean => "L2",
        }
    }

    /// Converts a Milvus search `distance` into a higher-is-better score.
    ///
    /// COSINE and IP are already similarities; L2 is a distance and is negated.
    pub fn score_from_milvus(self, distance: f64) -> f64 {
        match self {
            Metric::Cosine | Metric::InnerProduct => distance,
            Metric::Euclidean => -distance,
        }
    }

    /// pgvector distance operator; smaller results are closer for all three.
    pub fn pg_operator(self) -> &'static str {
        match self {
            Metric::Cosine => "<=>",
            Metric::InnerProduct => "<#>",
            Metric::Euclidean => "<->",
        }
    }

    /// Converts a pgvector operator result into a higher-is-better score.
    ///
    /// `<=>` yields `1 - cosine`, `<#>` yields the negated dot product and
    /// `<->` the L2 distance.
    pub fn score_from_pg(self, distance: f64) -> f64 {
        match self {
            Metric::Cosine => 1.0 - distance,
            Metric::InnerProduct | Metric::Euclidean => -distance,
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum()
}

fn dot_self(a: &[f32]) -> f64 {
    dot(a, a)
}

/// One nearest-neighbour result as returned by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredHit {
    /// Stored segment text.
    pub text: String,
    /// Higher-is-better similarity score.
    pub score: f64,
    /// Monotonic insertion sequence, used as the ranking tie-breaker.
    pub sequence: u64,
}

/// Blocking vector store boundary.
pub trait VectorStore: Send + Sync {
    /// Human-readable backend label used in logs.
    fn describe(&self) -> String;

    /// Read-only reachability probe.
    fn ping(&self) -> Result<()>;

    /// Idempotently creates the collection for `dimension`-sized vectors.
    ///
    /// Returns the vector dimension of a collection that already existed, or
    /// `None` when it was created now or holds nothing to compare against.
    fn prepare(&self, dimension: usize) -> Result<Option<usize>>;

    /// Appends a segment (text plus its embedding).
    fn insert(&self, segment: &TextSegment) -> Result<()>;

    /// Returns up to `limit` nearest stored segments.
    fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<StoredHit>>;
}

impl<T: VectorStore + ?Sized> VectorStore for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn ping(&self) -> Result<()> {
        (**self).ping()
    }

    fn prepare(&self, dimension: usize) -> Result<Option<usize>> {
        (**self).prepare(dimension)
    }

    fn insert(&self, segment: &TextSegment) -> Result<()> {
        (**self).insert(segment)
    }

    fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<StoredHit>> {
        (**self).search(vector, limit)
    }
}
