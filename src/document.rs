//! Knowledge source and answer sink boundaries.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The query and generated answer of one successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// User query as submitted.
    pub query: String,
    /// Completion returned by the chat model.
    pub answer: String,
}

impl AnswerRecord {
    /// Creates a record from its parts.
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            answer: answer.into(),
        }
    }

    /// Two labelled blocks: the question, then the answer.
    pub fn render(&self) -> String {
        format!(
            "User question:\n{}\n\nAnswer:\n{}\n",
            self.query,
            self.answer.trim_end()
        )
    }
}

/// Where the knowledge corpus comes from.
pub trait KnowledgeSource {
    /// Location shown in logs and errors.
    fn location(&self) -> String;

    /// Cheap presence check that does not read the content.
    fn exists(&self) -> bool;

    /// Reads the full corpus as UTF-8 text.
    fn load(&self) -> Result<String>;
}

/// Where the final answer goes.
pub trait AnswerSink {
    /// Location shown in logs and errors.
    fn location(&self) -> PathBuf;

    /// Writes the record, replacing any previous content.
    fn persist(&self, record: &AnswerRecord) -> Result<()>;
}

/// UTF-8 text file used as the knowledge corpus.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Source reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KnowledgeSource for FileSource {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn load(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read knowledge file {:?}", self.path))
    }
}

/// UTF-8 text file overwritten once per successful run.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Sink writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AnswerSink for FileSink {
    fn location(&self) -> PathBuf {
        self.path.clone()
    }

    fn persist(&self, record: &AnswerRecord) -> Result<()> {
        fs::write(&self.path, record.render())
            .with_context(|| format!("failed to write answer file {:?}", self.path))
    }
}
