//! Milvus vector store over the RESTful v2 API.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{Metric, StoredHit, VectorStore};
use crate::embeddings::TextSegment;

/// Default standalone Milvus endpoint.
pub const MILVUS_DEFAULT_URI: &str = "http://localhost:19530";

const VECTOR_FIELD: &str = "vector";

/// Blocking Milvus client bound to a single collection.
pub struct MilvusStore {
    client: Client,
    base: String,
    collection: String,
    metric: Metric,
}

impl MilvusStore {
    /// Builds a client for `collection` on the Milvus server at `uri`.
    pub fn new(uri: String, collection: String, metric: Metric, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(
            uri.starts_with("http://") || uri.starts_with("https://"),
            "Milvus URI must be an http(s) URL"
        );
        anyhow::ensure!(!collection.trim().is_empty(), "collection name is required");
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Milvus HTTP client")?;
        Ok(Self {
            client,
            base: uri.trim_end_matches('/').to_string(),
            collection,
            metric,
        })
    }

    fn call<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Default,
    {
        let url = format!("{}/v2/vectordb/{}", self.base, path);
        debug!(%url, "calling Milvus");
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .with_context(|| format!("failed to call Milvus at {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("Milvus returned {}: {}", status, text);
        }
        let envelope: Envelope<T> = resp
            .json()
            .with_context(|| format!("failed to parse Milvus response from {path}"))?;
        envelope.into_data(path)
    }

    fn has_collection(&self) -> Result<bool> {
        let data: HasCollection = self.call(
            "collections/has",
            &json!({ "collectionName": self.collection }),
        )?;
        Ok(data.has)
    }
}

impl VectorStore for MilvusStore {
    fn describe(&self) -> String {
        format!("milvus:{}/{}", self.base, self.collection)
    }

    fn ping(&self) -> Result<()> {
        let collections: Vec<String> = self.call("collections/list", &json!({}))?;
        debug!(count = collections.len(), "Milvus reachable");
        Ok(())
    }

    fn prepare(&self, dimension: usize) -> Result<Option<usize>> {
        anyhow::ensure!(dimension > 0, "embedding dimension must be positive");
        if self.has_collection()? {
            let description: CollectionDescription = self.call(
                "collections/describe",
                &json!({ "collectionName": self.collection }),
            )?;
            let existing = description.vector_dimension(VECTOR_FIELD).ok_or_else(|| {
                anyhow!(
                    "collection {} has no `{}` vector field with a dim parameter",
                    self.collection,
                    VECTOR_FIELD
                )
            })?;
            return Ok(Some(existing));
        }
        let request = json!({
            "collectionName": self.collection,
            "dimension": dimension,
            "metricType": self.metric.milvus_name(),
            "idType": "Int64",
            "autoID": false,
            "primaryFieldName": "id",
            "vectorFieldName": VECTOR_FIELD,
            "params": { "consistencyLevel": "Strong" }
        });
        let _: serde_json::Value = self.call("collections/create", &request)?;
        info!(collection = %self.collection, dimension, "created Milvus collection");
        Ok(None)
    }

    fn insert(&self, segment: &TextSegment) -> Result<()> {
        let sequence = next_sequence()?;
        let request = InsertRequest {
            collection_name: &self.collection,
            data: [InsertRow {
                id: sequence,
                vector: segment.embedding.as_slice(),
                text: &segment.text,
                seq: sequence,
            }],
        };
        let result: InsertResult = self.call("entities/insert", &request)?;
        anyhow::ensure!(
            result.insert_count == 1,
            "Milvus acknowledged {} inserted rows, expected 1",
            result.insert_count
        );
        Ok(())
    }

    fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<StoredHit>> {
        let request = SearchRequest {
            collection_name: &self.collection,
            data: [vector],
            anns_field: VECTOR_FIELD,
            limit,
            output_fields: ["text", "seq"],
        };
        let rows: Vec<SearchRow> = self.call("entities/search", &request)?;
        Ok(rows
            .into_iter()
            .map(|row| StoredHit {
                score: self.metric.score_from_milvus(row.distance),
                sequence: row.sequence(),
                text: row.text,
            })
            .collect())
    }
}

// Microseconds since the epoch double as primary key and insertion order.
fn next_sequence() -> Result<i64> {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the Unix epoch")?
        .as_micros();
    i64::try_from(micros).map_err(|_| anyhow!("timestamp {} exceeds i64 range", micros))
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

impl<T: Default> Envelope<T> {
    fn into_data(self, path: &str) -> Result<T> {
        if self.code != 0 {
            anyhow::bail!(
                "Milvus {} failed with code {}: {}",
                path,
                self.code,
                self.message.unwrap_or_default()
            );
        }
        Ok(self.data.unwrap_or_default())
    }
}

#[derive(Debug, Default, Deserialize)]
struct HasCollection {
    has: bool,
}

#[derive(Debug, Default, Deserialize)]
struct CollectionDescription {
    #[serde(default)]
    fields: Vec<FieldDescription>,
}

impl CollectionDescription {
    fn vector_dimension(&self, field: &str) -> Option<usize> {
        self.fields
            .iter()
            .find(|candidate| candidate.name == field)?
            .params
            .iter()
            .find(|param| param.key == "dim")
            .and_then(|param| match &param.value {
                serde_json::Value::String(raw) => raw.parse().ok(),
                serde_json::Value::Number(num) => {
                    num.as_u64().and_then(|v| usize::try_from(v).ok())
                }
                _ => None,
            })
    }
}

#[derive(Debug, Deserialize)]
struct FieldDescription {
    name: String,
    #[serde(default)]
    params: Vec<FieldParam>,
}

#[derive(Debug, Deserialize)]
struct FieldParam {
    key: String,
    value: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertRequest<'a> {
    collection_name: &'a str,
    data: [InsertRow<'a>; 1],
}

#[derive(Serialize)]
struct InsertRow<'a> {
    id: i64,
    vector: &'a [f32],
    text: &'a str,
    seq: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertResult {
    #[serde(default)]
    insert_count: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    collection_name: &'a str,
    data: [&'a [f32]; 1],
    anns_field: &'a str,
    limit: usize,
    output_fields: [&'a str; 2],
}

#[derive(Debug, Deserialize)]
struct SearchRow {
    id: i64,
    distance: f64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    seq: Option<i64>,
}

impl SearchRow {
    fn sequence(&self) -> u64 {
        u64::try_from(self.seq.unwrap_or(self.id)).unwrap_or(0)
    }
}
