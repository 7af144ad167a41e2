//! Startup configuration: command-line flags with environment fallbacks.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use clap::{Parser, ValueEnum};
use url::Url;

use crate::document::{FileSink, FileSource};
use crate::embedder::ollama::{OllamaEmbedder, OLLAMA_DEFAULT_URL};
use crate::embedder::openai::OpenAiEmbedder;
use crate::embedder::{Embedder, EmbeddingGateway};
use crate::index::VectorIndex;
use crate::llm::{
    AnthropicProvider, GenerationGateway, GenerationParams, LlmProvider, OllamaProvider,
    OpenAiProvider, ANTHROPIC_DEFAULT_URL,
};
use crate::pipeline::Pipeline;
use crate::retry::{RetryPolicy, Retrying};
use crate::vector_store::milvus::MILVUS_DEFAULT_URI;
use crate::vector_store::{MemoryStore, Metric, MilvusStore, VectorStore};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Chat completion backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ChatProviderKind {
    /// Local Ollama server.
    Ollama,
    /// OpenAI chat completions.
    Openai,
    /// Anthropic messages API.
    Anthropic,
}

impl ChatProviderKind {
    fn default_model(self) -> &'static str {
        match self {
            ChatProviderKind::Ollama => "llama3",
            ChatProviderKind::Openai => "gpt-4o-mini",
            ChatProviderKind::Anthropic => "claude-3-sonnet-20240229",
        }
    }
}

/// Embedding backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum EmbeddingProviderKind {
    /// Local Ollama server.
    Ollama,
    /// OpenAI embeddings endpoint.
    Openai,
}

impl EmbeddingProviderKind {
    fn default_model(self) -> &'static str {
        match self {
            EmbeddingProviderKind::Ollama => "nomic-embed-text",
            EmbeddingProviderKind::Openai => "text-embedding-3-small",
        }
    }
}

/// Vector store backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum VectorStoreKind {
    /// Milvus REST v2 API.
    Milvus,
    /// Postgres with the pgvector extension.
    Pgvector,
    /// In-process store, optionally snapshotted to JSONL.
    Memory,
}

/// Command-line interface of the `ragline` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ragline",
    about = "Answer one question grounded in a local knowledge file"
)]
pub struct Cli {
    /// Question to answer
    #[arg(long, short, env = "RAGLINE_QUERY")]
    pub query: String,

    /// UTF-8 text file ingested as the knowledge base
    #[arg(long, env = "RAGLINE_KNOWLEDGE", default_value = "knowledge.txt")]
    pub knowledge: PathBuf,

    /// File overwritten with the question and answer
    #[arg(long, env = "RAGLINE_ANSWER", default_value = "answer_output.txt")]
    pub answer: PathBuf,

    /// Chat completion backend
    #[arg(long, env = "RAGLINE_CHAT_PROVIDER", value_enum, default_value_t = ChatProviderKind::Ollama)]
    pub chat_provider: ChatProviderKind,

    /// Chat model (defaults per provider: llama3, gpt-4o-mini, claude-3-sonnet-20240229)
    #[arg(long, env = "RAGLINE_CHAT_MODEL")]
    pub chat_model: Option<String>,

    /// Embedding backend
    #[arg(long, env = "RAGLINE_EMBEDDING_PROVIDER", value_enum, default_value_t = EmbeddingProviderKind::Ollama)]
    pub embedding_provider: EmbeddingProviderKind,

    /// Embedding model (defaults per provider: nomic-embed-text, text-embedding-3-small)
    #[arg(long, env = "RAGLINE_EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    /// Ollama base URL
    #[arg(long, env = "RAGLINE_OLLAMA_URL", default_value = OLLAMA_DEFAULT_URL)]
    pub ollama_url: String,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "RAGLINE_OPENAI_URL", default_value = OPENAI_DEFAULT_URL)]
    pub openai_url: String,

    /// Anthropic API base URL
    #[arg(long, env = "RAGLINE_ANTHROPIC_URL", default_value = ANTHROPIC_DEFAULT_URL)]
    pub anthropic_url: String,

    /// OpenAI API key (required when an OpenAI backend is selected)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Anthropic API key (required when --chat-provider anthropic)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Embedding dimension expected from the model and the index
    #[arg(long, env = "RAGLINE_DIMENSION", default_value_t = 768)]
    pub dimension: usize,

    /// Vector store backend
    #[arg(long, env = "RAGLINE_VECTOR_STORE", value_enum, default_value_t = VectorStoreKind::Milvus)]
    pub vector_store: VectorStoreKind,

    /// Milvus endpoint
    #[arg(long, env = "RAGLINE_MILVUS_URI", default_value = MILVUS_DEFAULT_URI)]
    pub milvus_uri: String,

    /// Postgres connection string (required when --vector-store pgvector)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Postgres schema holding the collection table
    #[arg(long, env = "RAGLINE_PG_SCHEMA", default_value = "public")]
    pub pg_schema: String,

    /// Collection (or table) name
    #[arg(long, env = "RAGLINE_COLLECTION", default_value = "knowledge_base")]
    pub collection: String,

    /// Similarity metric used for ranking
    #[arg(long, env = "RAGLINE_METRIC", value_enum, default_value_t = Metric::Cosine)]
    pub metric: Metric,

    /// JSONL snapshot kept by the memory store across runs
    #[arg(long, env = "RAGLINE_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Number of segments retrieved as context
    #[arg(long, env = "RAGLINE_TOP_K", default_value_t = 3)]
    pub top_k: usize,

    /// Per-call timeout in seconds for every backend
    #[arg(long, env = "RAGLINE_TIMEOUT_SECS", default_value_t = 180)]
    pub timeout_secs: u64,

    /// Sampling temperature for the answer model
    #[arg(long, env = "RAGLINE_TEMPERATURE", default_value_t = 0.2)]
    pub temperature: f32,

    /// Maximum tokens to request from the completion model
    #[arg(long, env = "RAGLINE_MAX_COMPLETION_TOKENS", default_value_t = 1024)]
    pub max_completion_tokens: usize,

    /// Attempts per chat or embedding call (1 disables retries)
    #[arg(long, env = "RAGLINE_MAX_ATTEMPTS", default_value_t = 1)]
    pub max_attempts: usize,

    /// Log filter directive
    #[arg(long = "log", env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Cli {
    /// Rejects configurations that cannot run, before anything is contacted.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.query.trim().is_empty(), "query must not be empty");
        ensure!(self.dimension > 0, "--dimension must be positive");
        ensure!(self.timeout_secs > 0, "--timeout-secs must be positive");
        ensure!(self.max_attempts > 0, "--max-attempts must be at least 1");
        ensure!(
            (0.0..=2.0).contains(&self.temperature),
            "--temperature must be between 0 and 2"
        );
        ensure!(
            !self.chat_model().trim().is_empty(),
            "chat model name must not be empty"
        );
        ensure!(
            !self.embedding_model().trim().is_empty(),
            "embedding model name must not be empty"
        );
        ensure!(
            !self.collection.trim().is_empty(),
            "collection name must not be empty"
        );

        match self.chat_provider {
            ChatProviderKind::Ollama => check_http_url("--ollama-url", &self.ollama_url)?,
            ChatProviderKind::Openai => {
                check_http_url("--openai-url", &self.openai_url)?;
                self.openai_key()?;
            }
            ChatProviderKind::Anthropic => {
                check_http_url("--anthropic-url", &self.anthropic_url)?;
                self.anthropic_key()?;
            }
        }
        match self.embedding_provider {
            EmbeddingProviderKind::Ollama => check_http_url("--ollama-url", &self.ollama_url)?,
            EmbeddingProviderKind::Openai => {
                check_http_url("--openai-url", &self.openai_url)?;
                self.openai_key()?;
            }
        }
        match self.vector_store {
            VectorStoreKind::Milvus => check_http_url("--milvus-uri", &self.milvus_uri)?,
            VectorStoreKind::Pgvector => {
                let url = self.database_url()?;
                ensure!(
                    url.starts_with("postgres://") || url.starts_with("postgresql://"),
                    "DATABASE_URL must start with postgres:// or postgresql://"
                );
            }
            VectorStoreKind::Memory => {}
        }
        Ok(())
    }

    /// Chat model after applying the provider default.
    pub fn chat_model(&self) -> String {
        self.chat_model
            .clone()
            .unwrap_or_else(|| self.chat_provider.default_model().to_string())
    }

    /// Embedding model after applying the provider default.
    pub fn embedding_model(&self) -> String {
        self.embedding_model
            .clone()
            .unwrap_or_else(|| self.embedding_provider.default_model().to_string())
    }

    /// Timeout applied to every backend call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy for chat and embedding calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, RETRY_BASE_DELAY)
    }

    /// Sampling parameters for the generation gateway.
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_completion_tokens,
        }
    }

    /// Builds the selected embedding backend, wrapped for retries when enabled.
    pub fn build_embedder(&self) -> Result<Box<dyn Embedder>> {
        let model = self.embedding_model();
        let backend: Box<dyn Embedder> = match self.embedding_provider {
            EmbeddingProviderKind::Ollama => Box::new(OllamaEmbedder::new(
                self.ollama_url.clone(),
                model,
                self.timeout(),
            )?),
            EmbeddingProviderKind::Openai => Box::new(OpenAiEmbedder::new(
                self.openai_key()?,
                self.openai_url.clone(),
                model,
                Some(self.dimension),
                self.timeout(),
            )?),
        };
        let policy = self.retry_policy();
        Ok(if policy.is_enabled() {
            Box::new(Retrying::new(backend, policy))
        } else {
            backend
        })
    }

    /// Builds the selected chat backend, wrapped for retries when enabled.
    pub fn build_llm(&self) -> Result<Box<dyn LlmProvider>> {
        let model = self.chat_model();
        let provider: Box<dyn LlmProvider> = match self.chat_provider {
            ChatProviderKind::Ollama => Box::new(OllamaProvider::new(
                self.ollama_url.clone(),
                model,
                self.timeout(),
            )?),
            ChatProviderKind::Openai => Box::new(OpenAiProvider::new(
                self.openai_key()?,
                self.openai_url.clone(),
                model,
                self.timeout(),
            )?),
            ChatProviderKind::Anthropic => Box::new(AnthropicProvider::new(
                self.anthropic_key()?,
                self.anthropic_url.clone(),
                model,
                self.timeout(),
            )?),
        };
        let policy = self.retry_policy();
        Ok(if policy.is_enabled() {
            Box::new(Retrying::new(provider, policy))
        } else {
            provider
        })
    }

    /// Builds the selected vector store. Nothing is contacted yet.
    pub fn build_store(&self) -> Result<Box<dyn VectorStore>> {
        match self.vector_store {
            VectorStoreKind::Milvus => Ok(Box::new(MilvusStore::new(
                self.milvus_uri.clone(),
                self.collection.clone(),
                self.metric,
                self.timeout(),
            )?)),
            VectorStoreKind::Memory => match &self.snapshot {
                Some(path) => Ok(Box::new(MemoryStore::open(self.metric, path)?)),
                None => Ok(Box::new(MemoryStore::new(self.metric))),
            },
            VectorStoreKind::Pgvector => self.build_pgvector(),
        }
    }

    #[cfg(feature = "pgvector")]
    fn build_pgvector(&self) -> Result<Box<dyn VectorStore>> {
        use crate::vector_store::{PgVectorStore, TableName};

        let table = TableName::new(self.pg_schema.clone(), self.collection.clone())?;
        Ok(Box::new(PgVectorStore::new(
            self.database_url()?,
            table,
            self.metric,
            self.timeout(),
        )?))
    }

    #[cfg(not(feature = "pgvector"))]
    fn build_pgvector(&self) -> Result<Box<dyn VectorStore>> {
        bail!("ragline was built without the `pgvector` feature")
    }

    /// Validates the configuration and wires every collaborator into a pipeline.
    pub fn build_pipeline(&self) -> Result<Pipeline> {
        self.validate()?;
        let embeddings = EmbeddingGateway::new(self.build_embedder()?, self.dimension);
        let generation = GenerationGateway::new(self.build_llm()?, self.generation_params());
        let index = VectorIndex::new(self.build_store()?, self.dimension);
        Ok(Pipeline::new(
            embeddings,
            generation,
            index,
            Box::new(FileSource::new(&self.knowledge)),
            Box::new(FileSink::new(&self.answer)),
            self.top_k,
        ))
    }

    fn openai_key(&self) -> Result<String> {
        non_empty(&self.openai_api_key)
            .context("OPENAI_API_KEY must be set for the OpenAI provider")
    }

    fn anthropic_key(&self) -> Result<String> {
        non_empty(&self.anthropic_api_key)
            .context("ANTHROPIC_API_KEY must be set for the Anthropic provider")
    }

    fn database_url(&self) -> Result<String> {
        non_empty(&self.database_url).context("DATABASE_URL must be set for the pgvector store")
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn check_http_url(flag: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw).with_context(|| format!("{flag} is not a valid URL: {raw}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => bail!("{flag} must use http or https, got {other}"),
    }
}
