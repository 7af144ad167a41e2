//! Error taxonomy shared by every pipeline stage.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// External service probed by the pre-flight health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Chat completion backend.
    Chat,
    /// Embedding backend.
    Embedding,
    /// Vector store backend.
    VectorStore,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Service::Chat => "chat model",
            Service::Embedding => "embedding model",
            Service::VectorStore => "vector store",
        };
        f.write_str(label)
    }
}

/// Terminal failure raised by a pipeline stage. None of these are retried by the core.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Pre-flight health check failed.
    #[error("{service} unavailable: {cause:#}")]
    ServiceUnavailable {
        /// Which service failed the probe.
        service: Service,
        /// Underlying backend error.
        cause: anyhow::Error,
    },
    /// Empty or malformed text handed to the embedding gateway.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A vector's dimension disagrees with the configured index dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured index dimension.
        expected: usize,
        /// Dimension actually observed.
        actual: usize,
    },
    /// Embedding backend call failed or timed out.
    #[error("embedding request failed: {cause:#}")]
    EmbeddingFailed {
        /// Underlying backend error.
        cause: anyhow::Error,
    },
    /// Chat completion call failed or timed out.
    #[error("generation request failed: {cause:#}")]
    GenerationFailed {
        /// Underlying backend error.
        cause: anyhow::Error,
    },
    /// Vector store rejected an insert or collection setup.
    #[error("vector index write failed: {cause:#}")]
    IndexWriteFailed {
        /// Underlying backend error.
        cause: anyhow::Error,
    },
    /// Vector store nearest-neighbour query failed.
    #[error("vector index query failed: {cause:#}")]
    IndexQueryFailed {
        /// Underlying backend error.
        cause: anyhow::Error,
    },
    /// The answer could not be written to the sink.
    #[error("failed to persist answer to {path:?}: {cause:#}")]
    PersistenceFailed {
        /// Sink location.
        path: PathBuf,
        /// Underlying I/O error.
        cause: anyhow::Error,
    },
    /// A run precondition (such as the knowledge file) is not met.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
}

impl PipelineError {
    /// Short machine-friendly name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ServiceUnavailable { .. } => "ServiceUnavailable",
            PipelineError::InvalidInput(_) => "InvalidInput",
            PipelineError::DimensionMismatch { .. } => "DimensionMismatch",
            PipelineError::EmbeddingFailed { .. } => "EmbeddingFailed",
            PipelineError::GenerationFailed { .. } => "GenerationFailed",
            PipelineError::IndexWriteFailed { .. } => "IndexWriteFailed",
            PipelineError::IndexQueryFailed { .. } => "IndexQueryFailed",
            PipelineError::PersistenceFailed { .. } => "PersistenceFailed",
            PipelineError::PreconditionFailed(_) => "PreconditionFailed",
        }
    }
}

/// Pipeline stage names used when tagging failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Source existence check, before any network call.
    Preflight,
    /// Chat, embedding and vector store probes.
    HealthCheck,
    /// Knowledge load, document embedding and index insert.
    Ingest,
    /// Query embedding.
    EmbedQuery,
    /// Top-K nearest neighbour lookup.
    Retrieve,
    /// Context assembly, prompt rendering and completion.
    Generate,
    /// Answer sink write.
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Preflight => "preflight",
            Stage::HealthCheck => "health-check",
            Stage::Ingest => "ingest",
            Stage::EmbedQuery => "embed-query",
            Stage::Retrieve => "retrieve",
            Stage::Generate => "generate",
            Stage::Persist => "persist",
        };
        f.write_str(label)
    }
}

/// A stage-tagged terminal failure returned by [`crate::Pipeline::run`].
#[derive(Debug, Error)]
#[error("stage {stage} failed: {error}")]
pub struct PipelineFailure {
    /// Stage that was running when the failure occurred.
    pub stage: Stage,
    /// The failure itself.
    #[source]
    pub error: PipelineError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn failure_message_names_stage_and_cause() {
        let failure = PipelineFailure {
            stage: Stage::HealthCheck,
            error: PipelineError::ServiceUnavailable {
                service: Service::Chat,
                cause: anyhow!("connection refused").context("failed to call Ollama"),
            },
        };
        assert_eq!(
            failure.to_string(),
            "stage health-check failed: chat model unavailable: failed to call Ollama: connection refused"
        );
        assert_eq!(failure.error.kind(), "ServiceUnavailable");
    }

    #[test]
    fn dimension_mismatch_reports_both_sides() {
        let err = PipelineError::DimensionMismatch {
            expected: 768,
            actual: 384,
        };
        assert_eq!(
            err.to_string(),
            "embedding dimension mismatch: expected 768, got 384"
        );
    }
}
