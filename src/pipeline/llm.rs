//! Generation service: the backend seam, the live LLM implementation and
//! the retry policy.
//!
//! The generator never talks to a provider directly. It holds an
//! `Arc<dyn GenerationBackend>`, so tests drive it with scripted in-process
//! backends and production wires [`LlmBackend`] over an `edgequake-llm`
//! provider. Prompt wording lives in [`crate::prompts`].
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient and frequent under load. The wait
//! before retry `n` is `retry_backoff_ms * 2^(n-1)`, capped at
//! `max_backoff_ms`: with 500 ms base the sequence is 500 ms → 1 s → 2 s.
//! A server-sent retry-after hint replaces the computed wait.

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One request to the generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
}

/// Anything that can turn a request into response text.
pub trait GenerationBackend: Send + Sync {
    /// Short name for logs and audit records.
    fn name(&self) -> &str;

    fn complete<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<String, GenerationError>>;
}

// ── Live backend ─────────────────────────────────────────────────────────

/// [`GenerationBackend`] over an `edgequake-llm` chat provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    name: String,
    options: CompletionOptions,
    timeout: Duration,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &GenerationConfig) -> Self {
        let name = match config.model.as_deref() {
            Some(model) => format!("llm:{model}"),
            None => "llm".to_string(),
        };
        Self {
            provider,
            name,
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

impl GenerationBackend for LlmBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<String, GenerationError>> {
        Box::pin(async move {
            let messages = vec![
                ChatMessage::system(request.system.as_str()),
                ChatMessage::user(request.user.as_str()),
            ];
            let start = Instant::now();
            let call = self.provider.chat(&messages, Some(&self.options));
            match tokio::time::timeout(self.timeout, call).await {
                Err(_) => Err(GenerationError::Timeout {
                    secs: self.timeout.as_secs(),
                }),
                Ok(Err(e)) => Err(classify_provider_error(&e.to_string(), self.timeout.as_secs())),
                Ok(Ok(response)) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        self.name,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    Ok(response.content)
                }
            }
        })
    }
}

/// Build `CompletionOptions` from the generation config.
fn build_options(config: &GenerationConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

static RE_RETRY_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)retry[- _]?after\D{0,12}?(\d+(?:\.\d+)?)\s*(ms|milliseconds?|s|sec|seconds?)?")
        .unwrap()
});

/// Map a provider error message onto a [`GenerationError`] kind.
///
/// Providers surface HTTP failures as text, so classification is by status
/// code and well-known phrases. Unknown failures count as server errors and
/// are retried.
pub fn classify_provider_error(message: &str, timeout_secs: u64) -> GenerationError {
    let m = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| m.contains(n));

    if has(&["429", "rate limit", "rate_limit", "too many requests", "quota"]) {
        return GenerationError::RateLimited {
            retry_after: parse_retry_after(message),
        };
    }
    if has(&["timed out", "timeout", "deadline exceeded"]) {
        return GenerationError::Timeout { secs: timeout_secs };
    }
    if has(&[
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "api key",
        "api_key",
        "authentication",
        "permission denied",
    ]) {
        return GenerationError::Auth {
            detail: message.to_string(),
        };
    }
    if has(&["400", "bad request", "invalid request", "invalid_request", "context length"]) {
        return GenerationError::Malformed {
            detail: message.to_string(),
        };
    }
    GenerationError::Server {
        detail: message.to_string(),
    }
}

fn parse_retry_after(message: &str) -> Option<Duration> {
    let caps = RE_RETRY_AFTER.captures(message)?;
    let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
    let millis = match caps.get(2).map(|u| u.as_str().to_ascii_lowercase()) {
        Some(unit) if unit.starts_with("ms") || unit.starts_with("milli") => amount,
        _ => amount * 1000.0,
    };
    Some(Duration::from_millis(millis.round() as u64))
}

// ── Retry policy ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_attempts: config.max_retries + 1,
            base_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Wait before attempt `attempt` (1-indexed retry number).
    pub fn backoff_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Resolve the live backend, or `None` when the live tier is off.
///
/// Resolution order:
/// 1. `enable_generation = false` → no live tier.
/// 2. **Explicit provider** in the config.
/// 3. **Provider name + model** via `ProviderFactory::create_llm_provider`.
/// 4. **`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`** when both are set.
/// 5. **`OPENAI_API_KEY`** present → OpenAI with the configured model.
/// 6. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// Failure at any step disables the live tier with a warning rather than
/// failing the job; recorded and deterministic content still resolve every
/// slot.
pub fn resolve_backend(config: &GenerationConfig) -> Option<Arc<dyn GenerationBackend>> {
    if !config.enable_generation {
        info!("Live generation disabled; using recorded/deterministic content");
        return None;
    }
    match resolve_provider(config) {
        Ok(provider) => Some(Arc::new(LlmBackend::new(provider, config))),
        Err(e) => {
            warn!("No LLM provider available, live tier disabled: {}", e);
            None
        }
    }
}

fn resolve_provider(config: &GenerationConfig) -> Result<Arc<dyn LLMProvider>, String> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env()
        .map_err(|e| format!("auto-detection failed (set OPENAI_API_KEY or ANTHROPIC_API_KEY): {e}"))?;
    Ok(llm_provider)
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, String> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| format!("{name}/{model}: {e}"))
}
