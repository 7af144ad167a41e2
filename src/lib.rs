#![warn(missing_docs)]
//! Single-pass retrieval-augmented answering over a local knowledge file.

pub mod config;
pub mod context;
pub mod document;
pub mod embedder;
pub mod embeddings;
pub mod error;
pub mod health;
pub mod index;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod telemetry;
pub mod vector_store;

pub use config::Cli;
pub use document::{AnswerRecord, AnswerSink, FileSink, FileSource, KnowledgeSource};
pub use embedder::{Embedder, EmbeddingGateway};
pub use embeddings::{EmbeddingVector, ScoredMatch, TextSegment};
pub use error::{PipelineError, PipelineFailure, Service, Stage};
pub use health::ServiceHealthCheck;
pub use index::VectorIndex;
pub use llm::{GenerationGateway, GenerationParams, LlmProvider, ProviderRequest};
pub use pipeline::{Pipeline, PipelineState, RunReport};
pub use retry::{RetryPolicy, Retrying};
pub use vector_store::{MemoryStore, Metric, VectorStore};
