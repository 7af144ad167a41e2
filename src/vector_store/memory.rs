//! In-process vector store with an optional append-only JSONL snapshot.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use super::{Metric, StoredHit, VectorStore};
use crate::embeddings::TextSegment;

/// Snapshot row: one stored segment and its insertion sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    sequence: u64,
    segment: TextSegment,
}

/// Exact nearest-neighbour store held in memory.
///
/// With a snapshot path every insert is appended to the file and the file is
/// replayed on open, which gives the store durable cross-run state.
pub struct MemoryStore {
    metric: Metric,
    snapshot: Option<PathBuf>,
    records: Mutex<Vec<StoredRecord>>,
}

impl MemoryStore {
    /// Empty, purely in-memory store.
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            snapshot: None,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Opens a store backed by `snapshot`, replaying any rows it already holds.
    pub fn open(metric: Metric, snapshot: impl Into<PathBuf>) -> Result<Self> {
        let snapshot = snapshot.into();
        let records = if snapshot.exists() {
            load_snapshot(&snapshot)?
        } else {
            Vec::new()
        };
        Ok(Self {
            metric,
            snapshot: Some(snapshot),
            records: Mutex::new(records),
        })
    }

    /// Number of stored segments.
    pub fn len(&self) -> usize {
        self.records.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Whether the store holds no segments.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append_to_snapshot(&self, record: &StoredRecord) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open snapshot {:?}", path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl VectorStore for MemoryStore {
    fn describe(&self) -> String {
        match &self.snapshot {
            Some(path) => format!("memory:{}", path.display()),
            None => "memory".to_string(),
        }
    }

    fn ping(&self) -> Result<()> {
        self.records
            .lock()
            .map(|_| ())
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn prepare(&self, _dimension: usize) -> Result<Option<usize>> {
        let guard = self
            .records
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        let mut dimensions = guard
            .iter()
            .map(|record| (record.sequence, record.segment.embedding.dimension()));
        let Some((_, first)) = dimensions.next() else {
            return Ok(None);
        };
        if let Some((sequence, other)) = dimensions.find(|(_, dim)| *dim != first) {
            anyhow::bail!(
                "snapshot mixes dimensions: segment {} has {}, earlier segments have {}",
                sequence,
                other,
                first
            );
        }
        Ok(Some(first))
    }

    fn insert(&self, segment: &TextSegment) -> Result<()> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        let sequence = guard.last().map_or(0, |record| record.sequence + 1);
        let record = StoredRecord {
            sequence,
            segment: segment.clone(),
        };
        self.append_to_snapshot(&record)?;
        guard.push(record);
        Ok(())
    }

    fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<StoredHit>> {
        let guard = self
            .records
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        let mut hits: Vec<StoredHit> = guard
            .iter()
            .map(|record| StoredHit {
                text: record.segment.text.clone(),
                score: self
                    .metric
                    .similarity(vector, record.segment.embedding.as_slice()),
                sequence: record.sequence,
            })
            .collect();
        // sort_by is stable and records are kept in sequence order
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

fn load_snapshot(path: &Path) -> Result<Vec<StoredRecord>> {
    let file = File::open(path).with_context(|| format!("failed to open snapshot {:?}", path))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read snapshot line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: StoredRecord = serde_json::from_str(&line)
            .with_context(|| format!("invalid snapshot record at line {}", line_no + 1))?;
        records.push(record);
    }
    records.sort_by_key(|record| record.sequence);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingVector;

    fn segment(text: &str, values: &[f32]) -> TextSegment {
        TextSegment::new(text, EmbeddingVector::new(values.to_vec()))
    }

    #[test]
    fn search_orders_by_similarity() {
        let store = MemoryStore::new(Metric::Cosine);
        store.insert(&segment("east", &[1.0, 0.0])).unwrap();
        store.insert(&segment("north", &[0.0, 1.0])).unwrap();
        store.insert(&segment("north-east", &[1.0, 1.0])).unwrap();

        let hits = store.search(&[0.0, 1.0], 10).unwrap();
        let texts: Vec<_> = hits.iter().map(|hit| hit.text.as_str()).collect();
        assert_eq!(texts, ["north", "north-east", "east"]);
        assert_eq!(hits[0].sequence, 1);
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.jsonl");
        {
            let store = MemoryStore::open(Metric::Cosine, &path).unwrap();
            store.insert(&segment("first", &[1.0, 0.0])).unwrap();
            store.insert(&segment("second", &[0.0, 1.0])).unwrap();
        }
        let reopened = MemoryStore::open(Metric::Cosine, &path).unwrap();
        assert_eq!(reopened.len(), 2);
        reopened.insert(&segment("third", &[1.0, 1.0])).unwrap();
        let hits = reopened.search(&[1.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].text, "third");
        assert_eq!(hits[0].sequence, 2);
    }

    #[test]
    fn prepare_reports_stored_dimension() {
        let store = MemoryStore::new(Metric::Cosine);
        assert_eq!(store.prepare(768).unwrap(), None);
        store.insert(&segment("small", &[1.0, 0.0])).unwrap();
        assert_eq!(store.prepare(768).unwrap(), Some(2));
    }

    #[test]
    fn prepare_rejects_mixed_snapshot() {
        let store = MemoryStore::new(Metric::Cosine);
        store.insert(&segment("small", &[1.0, 0.0])).unwrap();
        store.insert(&segment("large", &[1.0, 0.0, 0.0])).unwrap();
        let err = store.prepare(2).unwrap_err();
        assert!(err.to_string().contains("segment 1 has 3"));
    }
}
