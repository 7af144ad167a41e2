//! Chat completion providers and the generation gateway.

use anyhow::Result;
use tracing::debug;

use crate::error::PipelineError;

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::{AnthropicProvider, ANTHROPIC_DEFAULT_URL};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Trait implemented by concrete LLM providers.
pub trait LlmProvider: Send + Sync {
    /// Sends one prompt and returns the completion text.
    fn answer(&self, request: &ProviderRequest) -> Result<String>;

    /// Human-readable backend label used in logs.
    fn describe(&self) -> String;
}

impl<T: LlmProvider + ?Sized> LlmProvider for Box<T> {
    fn answer(&self, request: &ProviderRequest) -> Result<String> {
        (**self).answer(request)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Request envelope shared by the various providers.
pub struct ProviderRequest<'a> {
    /// Fully rendered prompt.
    pub prompt: &'a str,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: usize,
}

/// Sampling knobs fixed when the gateway is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

/// Wraps an [`LlmProvider`] with the generation failure contract.
pub struct GenerationGateway {
    provider: Box<dyn LlmProvider>,
    params: GenerationParams,
}

impl GenerationGateway {
    /// Creates a gateway that sends every prompt with `params`.
    pub fn new(provider: Box<dyn LlmProvider>, params: GenerationParams) -> Self {
        Self { provider, params }
    }

    /// Backend label.
    pub fn describe(&self) -> String {
        self.provider.describe()
    }

    /// Generates a completion; backend errors and empty completions are `GenerationFailed`.
    pub fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        let request = ProviderRequest {
            prompt,
            temperature: self.params.temperature,
            max_tokens: self.params.max_tokens,
        };
        debug!(
            backend = %self.provider.describe(),
            prompt_chars = prompt.chars().count(),
            "requesting completion"
        );
        let answer = self
            .provider
            .answer(&request)
            .map_err(|cause| PipelineError::GenerationFailed { cause })?;
        if answer.trim().is_empty() {
            return Err(PipelineError::GenerationFailed {
                cause: anyhow::anyhow!("{} returned an empty completion", self.describe()),
            });
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::{Arc, Mutex};

    struct Recording {
        seen: Arc<Mutex<Vec<(String, f32, usize)>>>,
        reply: &'static str,
    }

    impl LlmProvider for Recording {
        fn answer(&self, request: &ProviderRequest) -> Result<String> {
            self.seen.lock().unwrap().push((
                request.prompt.to_string(),
                request.temperature,
                request.max_tokens,
            ));
            Ok(self.reply.to_string())
        }

        fn describe(&self) -> String {
            "recording".to_string()
        }
    }

    struct Down;

    impl LlmProvider for Down {
        fn answer(&self, _request: &ProviderRequest) -> Result<String> {
            bail!("connection refused")
        }

        fn describe(&self) -> String {
            "down".to_string()
        }
    }

    #[test]
    fn forwards_prompt_and_params() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let provider = Recording {
            seen: seen.clone(),
            reply: "an answer",
        };
        let params = GenerationParams {
            temperature: 0.7,
            max_tokens: 64,
        };
        let gateway = GenerationGateway::new(Box::new(provider), params);
        assert_eq!(gateway.generate("prompt text").unwrap(), "an answer");
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[("prompt text".to_string(), 0.7, 64)]
        );
    }

    #[test]
    fn provider_errors_become_generation_failed() {
        let gateway = GenerationGateway::new(Box::new(Down), GenerationParams::default());
        let err = gateway.generate("hi").unwrap_err();
        assert!(matches!(err, PipelineError::GenerationFailed { .. }));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn blank_completion_is_a_failure() {
        let provider = Recording {
            seen: Arc::new(Mutex::new(Vec::new())),
            reply: "  \n",
        };
        let gateway = GenerationGateway::new(Box::new(provider), GenerationParams::default());
        let err = gateway.generate("hi").unwrap_err();
        assert!(err.to_string().contains("empty completion"));
    }
}
