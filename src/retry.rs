//! Opt-in bounded retries for chat and embedding backends.
//!
//! The pipeline itself never retries. Wrapping a backend in [`Retrying`] is an
//! explicit operator choice made when the gateways are built.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::embedder::Embedder;
use crate::llm::{LlmProvider, ProviderRequest};

/// Attempt budget plus capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts the first call; values below 1 are raised to 1.
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Single attempt, no retries.
    pub fn disabled() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Whether more than one attempt is allowed.
    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        self.base_delay.saturating_mul(1 << capped)
    }

    fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0usize;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(
                        what,
                        attempt,
                        max_attempts = self.max_attempts,
                        ?delay,
                        error = %format!("{err:#}"),
                        "retrying backend call"
                    );
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Backend decorator applying a [`RetryPolicy`] to every call.
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> Retrying<T> {
    /// Wraps `inner` with `policy`.
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<T: Embedder> Embedder for Retrying<T> {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.policy.run("embedding", || self.inner.embed(text))
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

impl<T: LlmProvider> LlmProvider for Retrying<T> {
    fn answer(&self, request: &ProviderRequest) -> Result<String> {
        self.policy.run("completion", || self.inner.answer(request))
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}
