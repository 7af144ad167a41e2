use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{LlmProvider, ProviderRequest};

/// Non-streaming client for Ollama's `/api/generate`.
pub struct OllamaProvider {
    model: String,
    endpoint: String,
    client: Client,
}

impl OllamaProvider {
    /// Builds a client for `model` served at `base_url`.
    pub fn new(base_url: String, model: String, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!model.trim().is_empty(), "missing Ollama chat model name");
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Ollama HTTP client")?;
        let endpoint = format!("{}/api/generate", base_url.trim_end_matches('/'));
        Ok(Self {
            model,
            endpoint,
            client,
        })
    }
}

impl LlmProvider for OllamaProvider {
    fn answer(&self, request: &ProviderRequest) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: request.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .with_context(|| format!("failed to call Ollama at {}", self.endpoint))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("Ollama returned {}: {}", status, text);
        }
        let parsed: GenerateResponse = resp.json().context("failed to parse Ollama response")?;
        if let Some(error) = parsed.error {
            bail!("Ollama reported an error: {}", error);
        }
        Ok(parsed.response)
    }

    fn describe(&self) -> String {
        format!("ollama:{}", self.model)
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}
