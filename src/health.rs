//! Pre-flight probes run before any state-mutating call.

use tracing::info;

use crate::embedder::EmbeddingGateway;
use crate::error::{PipelineError, Service};
use crate::index::VectorIndex;
use crate::llm::GenerationGateway;

const CHAT_PROBE: &str = "Hi";
const EMBEDDING_PROBE: &str = "test";

/// Sends minimal real requests to each backend.
///
/// A reachable port says nothing about whether the model is loaded, so each
/// probe is a real completion or embedding rather than a handshake.
pub struct ServiceHealthCheck<'a> {
    embeddings: &'a EmbeddingGateway,
    generation: &'a GenerationGateway,
    index: &'a VectorIndex,
}

impl<'a> ServiceHealthCheck<'a> {
    /// Borrows the gateways to probe.
    pub fn new(
        embeddings: &'a EmbeddingGateway,
        generation: &'a GenerationGateway,
        index: &'a VectorIndex,
    ) -> Self {
        Self {
            embeddings,
            generation,
            index,
        }
    }

    /// Runs the chat, embedding and vector store probes in that order.
    pub fn check_all(&self) -> Result<(), PipelineError> {
        self.check_chat()?;
        self.check_embedding()?;
        self.check_vector_store()
    }

    /// Trivial completion against the chat backend.
    pub fn check_chat(&self) -> Result<(), PipelineError> {
        match self.generation.generate(CHAT_PROBE) {
            Ok(_) => {
                info!(backend = %self.generation.describe(), "chat model connected");
                Ok(())
            }
            Err(err) => Err(unavailable(Service::Chat, err)),
        }
    }

    /// Trivial embedding; a wrong-dimension reply is a configuration error.
    pub fn check_embedding(&self) -> Result<(), PipelineError> {
        match self.embeddings.embed(EMBEDDING_PROBE) {
            Ok(_) => {
                info!(
                    backend = %self.embeddings.describe(),
                    dimension = self.embeddings.dimension(),
                    "embedding model connected"
                );
                Ok(())
            }
            Err(err @ PipelineError::DimensionMismatch { .. }) => Err(err),
            Err(err) => Err(unavailable(Service::Embedding, err)),
        }
    }

    /// Read-only reachability probe of the vector store.
    pub fn check_vector_store(&self) -> Result<(), PipelineError> {
        self.index
            .ping()
            .map_err(|cause| PipelineError::ServiceUnavailable {
                service: Service::VectorStore,
                cause,
            })?;
        info!(store = %self.index.describe(), "vector store connected");
        Ok(())
    }
}

fn unavailable(service: Service, err: PipelineError) -> PipelineError {
    let cause = match err {
        PipelineError::EmbeddingFailed { cause } | PipelineError::GenerationFailed { cause } => {
            cause
        }
        other => anyhow::Error::new(other),
    };
    PipelineError::ServiceUnavailable { service, cause }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::Embedder;
    use crate::llm::{GenerationParams, LlmProvider, ProviderRequest};
    use crate::vector_store::{MemoryStore, Metric};
    use anyhow::{bail, Result};

    struct Chat(bool);

    impl LlmProvider for Chat {
        fn answer(&self, _request: &ProviderRequest) -> Result<String> {
            if self.0 {
                Ok("Hello".to_string())
            } else {
                bail!("model 'llama3' not found")
            }
        }

        fn describe(&self) -> String {
            "chat".to_string()
        }
    }

    struct Embed(Option<usize>);

    impl Embedder for Embed {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            match self.0 {
                Some(dim) => Ok(vec![0.0; dim]),
                None => bail!("connection refused"),
            }
        }

        fn describe(&self) -> String {
            "embed".to_string()
        }
    }

    fn parts(
        chat_up: bool,
        embed_dim: Option<usize>,
    ) -> (EmbeddingGateway, GenerationGateway, VectorIndex) {
        (
            EmbeddingGateway::new(Box::new(Embed(embed_dim)), 3),
            GenerationGateway::new(Box::new(Chat(chat_up)), GenerationParams::default()),
            VectorIndex::new(Box::new(MemoryStore::new(Metric::Cosine)), 3),
        )
    }

    #[test]
    fn healthy_backends_pass() {
        let (embeddings, generation, index) = parts(true, Some(3));
        ServiceHealthCheck::new(&embeddings, &generation, &index)
            .check_all()
            .unwrap();
    }

    #[test]
    fn chat_failure_is_service_unavailable() {
        let (embeddings, generation, index) = parts(false, Some(3));
        let err = ServiceHealthCheck::new(&embeddings, &generation, &index)
            .check_all()
            .unwrap_err();
        match err {
            PipelineError::ServiceUnavailable { service, cause } => {
                assert_eq!(service, Service::Chat);
                assert!(cause.to_string().contains("not found"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn embedding_failure_is_service_unavailable() {
        let (embeddings, generation, index) = parts(true, None);
        let err = ServiceHealthCheck::new(&embeddings, &generation, &index)
            .check_embedding()
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ServiceUnavailable {
                service: Service::Embedding,
                ..
            }
        ));
    }

    #[test]
    fn wrong_probe_dimension_is_reported_as_mismatch() {
        let (embeddings, generation, index) = parts(true, Some(5));
        let err = ServiceHealthCheck::new(&embeddings, &generation, &index)
            .check_embedding()
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DimensionMismatch {
                expected: 3,
                actual: 5
            }
        ));
    }
}
