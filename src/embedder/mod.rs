//! Embedding backends and the gateway that enforces the embedding contract.

use anyhow::Result;
use tracing::debug;

use crate::embeddings::EmbeddingVector;
use crate::error::PipelineError;

pub mod ollama;
pub mod openai;

/// Blocking text-to-vector backend.
pub trait Embedder: Send + Sync {
    /// Embeds a single piece of text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Human-readable backend label used in logs.
    fn describe(&self) -> String;
}

impl<T: Embedder + ?Sized> Embedder for Box<T> {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Wraps an [`Embedder`] with input validation and the dimension invariant.
pub struct EmbeddingGateway {
    backend: Box<dyn Embedder>,
    dimension: usize,
}

impl EmbeddingGateway {
    /// Creates a gateway that only ever yields vectors of `dimension` components.
    pub fn new(backend: Box<dyn Embedder>, dimension: usize) -> Self {
        Self { backend, dimension }
    }

    /// Configured embedding dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Backend label.
    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Embeds `text`, failing fast on empty input, backend errors, or a wrong dimension.
    pub fn embed(&self, text: &str) -> Result<EmbeddingVector, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "cannot embed empty text".to_string(),
            ));
        }
        debug!(
            backend = %self.backend.describe(),
            chars = text.chars().count(),
            "requesting embedding"
        );
        let values = self
            .backend
            .embed(text)
            .map_err(|cause| PipelineError::EmbeddingFailed { cause })?;
        if values.len() != self.dimension {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dimension,
                actual: values.len(),
            });
        }
        Ok(EmbeddingVector::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedEmbedder {
        dimension: usize,
        calls: Arc<AtomicUsize>,
    }

    impl Embedder for FixedEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.25; self.dimension])
        }

        fn describe(&self) -> String {
            "fixed".to_string()
        }
    }

    struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            bail!("operation timed out")
        }

        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    fn gateway(backend_dim: usize, configured: usize) -> (EmbeddingGateway, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = FixedEmbedder {
            dimension: backend_dim,
            calls: calls.clone(),
        };
        (EmbeddingGateway::new(Box::new(backend), configured), calls)
    }

    #[test]
    fn empty_text_is_rejected_without_remote_call() {
        let (gateway, calls) = gateway(4, 4);
        for input in ["", "   \n\t"] {
            let err = gateway.embed(input).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidInput(_)), "{err}");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn returns_vector_of_configured_dimension() {
        let (gateway, calls) = gateway(4, 4);
        let vector = gateway.embed("machine learning").unwrap();
        assert_eq!(vector.dimension(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wrong_backend_dimension_is_a_mismatch() {
        let (gateway, _) = gateway(384, 768);
        let err = gateway.embed("hello").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DimensionMismatch {
                expected: 768,
                actual: 384
            }
        ));
    }

    #[test]
    fn backend_errors_surface_as_embedding_failed() {
        let gateway = EmbeddingGateway::new(Box::new(BrokenEmbedder), 4);
        let err = gateway.embed("hello").unwrap_err();
        assert!(matches!(err, PipelineError::EmbeddingFailed { .. }));
        assert!(err.to_string().contains("timed out"));
    }
}
