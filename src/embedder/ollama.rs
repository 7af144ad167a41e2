//! Ollama embedding client (`/api/embed`).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::Embedder;

/// Default local Ollama endpoint.
pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Blocking embeddings client for a local or remote Ollama server.
#[derive(Clone)]
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaEmbedder {
    /// Builds a client for `model` served at `base_url`.
    pub fn new(base_url: String, model: String, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!model.trim().is_empty(), "missing Ollama embedding model name");
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Ollama HTTP client")?;
        let endpoint = format!("{}/api/embed", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
        })
    }
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedRequest {
            model: &self.model,
            input: text,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .with_context(|| format!("failed to call Ollama embed API at {}", self.endpoint))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("Ollama embed request failed ({}): {}", status, body);
        }
        let parsed: EmbedResponse = resp
            .json()
            .context("failed to parse Ollama embed response")?;
        parsed.into_single()
    }

    fn describe(&self) -> String {
        format!("ollama:{}", self.model)
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

impl EmbedResponse {
    fn into_single(mut self) -> Result<Vec<f32>> {
        anyhow::ensure!(
            self.embeddings.len() <= 1,
            "Ollama returned {} embeddings for a single input",
            self.embeddings.len()
        );
        self.embeddings
            .pop()
            .filter(|vector| !vector.is_empty())
            .ok_or_else(|| anyhow!("Ollama response missing embedding payload"))
    }
}
