//! Single-pass orchestration: health check, ingest, retrieve, generate, persist.

use std::fmt;

use tracing::{error, info};

use crate::context;
use crate::document::{AnswerRecord, AnswerSink, KnowledgeSource};
use crate::embedder::EmbeddingGateway;
use crate::embeddings::{ScoredMatch, TextSegment};
use crate::error::{PipelineError, PipelineFailure, Stage};
use crate::health::ServiceHealthCheck;
use crate::index::VectorIndex;
use crate::llm::GenerationGateway;
use crate::prompt;

const PREVIEW_CHARS: usize = 100;

/// Where a run currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing has run yet.
    Idle,
    /// Every backend answered its probe.
    HealthChecked,
    /// The knowledge text is embedded and stored.
    Ingested,
    /// The query is embedded.
    Queried,
    /// Nearest segments are selected.
    Retrieved,
    /// The chat model returned an answer.
    Generated,
    /// The answer is written to the sink.
    Persisted,
    /// The run stopped at `stage`.
    Failed {
        /// Stage that failed.
        stage: Stage,
        /// Rendered failure message.
        error: String,
    },
}

impl PipelineState {
    /// `Persisted` and `Failed` end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Persisted | PipelineState::Failed { .. })
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::HealthChecked => f.write_str("health-checked"),
            PipelineState::Ingested => f.write_str("ingested"),
            PipelineState::Queried => f.write_str("queried"),
            PipelineState::Retrieved => f.write_str("retrieved"),
            PipelineState::Generated => f.write_str("generated"),
            PipelineState::Persisted => f.write_str("persisted"),
            PipelineState::Failed { stage, .. } => write!(f, "failed at {stage}"),
        }
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Query and answer as written to the sink.
    pub record: AnswerRecord,
    /// Retrieved segments, best first.
    pub matches: Vec<ScoredMatch>,
    /// Context handed to the prompt.
    pub context: String,
    /// Prompt sent to the chat model.
    pub prompt: String,
}

/// Owns every collaborator of a run and drives them in a fixed order.
///
/// Each stage short-circuits on the first error. Nothing is retried and
/// index entries written before a failure are left in place.
pub struct Pipeline {
    embeddings: EmbeddingGateway,
    generation: GenerationGateway,
    index: VectorIndex,
    source: Box<dyn KnowledgeSource>,
    sink: Box<dyn AnswerSink>,
    top_k: usize,
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl Pipeline {
    /// Assembles a pipeline from its collaborators.
    pub fn new(
        embeddings: EmbeddingGateway,
        generation: GenerationGateway,
        index: VectorIndex,
        source: Box<dyn KnowledgeSource>,
        sink: Box<dyn AnswerSink>,
        top_k: usize,
    ) -> Self {
        Self {
            embeddings,
            generation,
            index,
            source,
            sink,
            top_k,
            state: PipelineState::Idle,
            history: vec![PipelineState::Idle],
        }
    }

    /// Current state.
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// States visited by the latest run, starting with `Idle`.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Runs one query end to end.
    pub fn run(&mut self, query: &str) -> Result<RunReport, PipelineFailure> {
        self.state = PipelineState::Idle;
        self.history = vec![PipelineState::Idle];
        info!(
            query,
            source = %self.source.location(),
            top_k = self.top_k,
            "starting pipeline run"
        );

        self.preflight(query)
            .map_err(|err| self.fail(Stage::Preflight, err))?;

        let health =
            ServiceHealthCheck::new(&self.embeddings, &self.generation, &self.index).check_all();
        health.map_err(|err| self.fail(Stage::HealthCheck, err))?;
        self.advance(PipelineState::HealthChecked);

        self.ingest().map_err(|err| self.fail(Stage::Ingest, err))?;
        self.advance(PipelineState::Ingested);

        let query_vector = self
            .embeddings
            .embed(query)
            .map_err(|err| self.fail(Stage::EmbedQuery, err))?;
        self.advance(PipelineState::Queried);

        let matches = self
            .index
            .query(&query_vector, self.top_k)
            .map_err(|err| self.fail(Stage::Retrieve, err))?;
        if matches.is_empty() {
            info!("no stored segments matched the query");
        }
        for hit in &matches {
            info!(
                rank = hit.rank,
                score = hit.score,
                preview = %hit.preview(PREVIEW_CHARS),
                "retrieved segment"
            );
        }
        self.advance(PipelineState::Retrieved);

        let context = context::assemble(&matches);
        let prompt = prompt::build(&context, query);
        let answer = self
            .generation
            .generate(&prompt)
            .map_err(|err| self.fail(Stage::Generate, err))?;
        self.advance(PipelineState::Generated);

        let record = AnswerRecord::new(query, answer);
        self.sink
            .persist(&record)
            .map_err(|cause| PipelineError::PersistenceFailed {
                path: self.sink.location(),
                cause,
            })
            .map_err(|err| self.fail(Stage::Persist, err))?;
        info!(path = %self.sink.location().display(), "answer saved");
        self.advance(PipelineState::Persisted);

        Ok(RunReport {
            record,
            matches,
            context,
            prompt,
        })
    }

    fn preflight(&self, query: &str) -> Result<(), PipelineError> {
        if query.trim().is_empty() {
            return Err(PipelineError::InvalidInput("query is empty".to_string()));
        }
        if !self.source.exists() {
            return Err(PipelineError::PreconditionFailed(format!(
                "knowledge file {} not found",
                self.source.location()
            )));
        }
        Ok(())
    }

    fn ingest(&self) -> Result<(), PipelineError> {
        let text = self.source.load().map_err(|cause| {
            PipelineError::PreconditionFailed(format!("{cause:#}"))
        })?;
        info!(chars = text.chars().count(), "knowledge loaded");
        self.index.prepare()?;
        let embedding = self.embeddings.embed(&text)?;
        self.index.insert(&TextSegment::new(text, embedding))
    }

    fn advance(&mut self, next: PipelineState) {
        info!(from = %self.state, to = %next, "pipeline transition");
        self.history.push(next.clone());
        self.state = next;
    }

    fn fail(&mut self, stage: Stage, error: PipelineError) -> PipelineFailure {
        error!(%stage, kind = error.kind(), "{error}");
        let failed = PipelineState::Failed {
            stage,
            error: error.to_string(),
        };
        self.history.push(failed.clone());
        self.state = failed;
        PipelineFailure { stage, error }
    }
}
