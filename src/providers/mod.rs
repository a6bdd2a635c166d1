/*!
 * Provider implementations for different translation backends.
 *
 * This module contains client implementations for the supported backends:
 * - Ollama: Local LLM server (`/api/generate`)
 * - MLX: OpenAI-compatible local server (`/v1/chat/completions`)
 * - Mock: in-process backend, used as the `echo` backend and in tests
 */

use async_trait::async_trait;
use log::warn;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::app_config::{Config, TranslationProvider};
use crate::errors::ProviderError;

pub mod mlx;
pub mod mock;
pub mod ollama;

/// A chunk of protected text to translate
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRequest {
    /// Text with placeholder tokens
    pub text: String,
    /// Source language name
    pub source_language: String,
    /// Target language name
    pub target_language: String,
    /// Tail of the previous translated chunk
    pub context: Option<String>,
}

/// Source and translation handed to the terminology review pass
#[derive(Debug, Clone, PartialEq)]
pub struct TermReviewRequest {
    pub source: String,
    pub translated: String,
    pub source_language: String,
    pub target_language: String,
}

/// Generation settings shared by the HTTP backends
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// System prompt template with `{source_language}` / `{target_language}`
    pub system_prompt: String,
    pub temperature: f32,
    pub num_predict: u32,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub timeout: Duration,
}

impl GenerationSettings {
    pub fn from_config(config: &Config) -> Self {
        let common = &config.translation.common;
        Self {
            system_prompt: common.system_prompt.clone(),
            temperature: common.temperature,
            num_predict: common.num_predict,
            max_retries: common.retry_count,
            backoff_base_ms: common.retry_backoff_ms,
            timeout: Duration::from_secs(config.translation.get_timeout_secs()),
        }
    }
}

/// Common trait for all translation backends
///
/// Backends only move text. Placeholder protection, noise filtering and
/// restoration happen around the call.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Translate one chunk of protected text
    async fn translate(&self, request: &TranslationRequest) -> Result<String, ProviderError>;

    /// Ask the backend which source terms leaked into the translation.
    ///
    /// The answer is free text with one `fragment => term` pair per line.
    async fn review_terms(&self, request: &TermReviewRequest) -> Result<String, ProviderError>;

    /// Test the connection to the backend
    async fn test_connection(&self) -> Result<(), ProviderError>;
}

/// Build the backend selected in the configuration
pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>, ProviderError> {
    let settings = GenerationSettings::from_config(config);
    let model = config.translation.get_model();
    let endpoint = config.translation.get_endpoint();

    let provider: Arc<dyn Provider> = match config.translation.provider {
        TranslationProvider::Ollama => Arc::new(ollama::Ollama::new(&endpoint, &model, settings)?),
        TranslationProvider::Mlx => Arc::new(mlx::Mlx::new(&endpoint, &model, settings)?),
        TranslationProvider::Echo => Arc::new(mock::MockProvider::echo()),
    };
    Ok(provider)
}

/// Resolve a path relative to a configured endpoint
pub(crate) fn endpoint_url(endpoint: &str, path: &str) -> Result<Url, ProviderError> {
    let mut base = Url::parse(endpoint)
        .map_err(|e| ProviderError::ConnectionError(format!("Invalid endpoint {:?}: {}", endpoint, e)))?;
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
        .map_err(|e| ProviderError::ConnectionError(format!("Invalid endpoint path {:?}: {}", path, e)))
}

/// Whether another attempt may succeed
fn is_retryable(error: &ProviderError) -> bool {
    match error {
        ProviderError::RequestFailed(_) | ProviderError::ConnectionError(_) => true,
        ProviderError::ApiError { status_code, .. } => *status_code >= 500 || *status_code == 429,
        ProviderError::ParseError(_) | ProviderError::ModelUnavailable(_) => false,
    }
}

/// Run a request with exponential backoff between attempts
pub(crate) async fn with_retries<T, F, Fut>(
    backend: &str,
    max_retries: u32,
    backoff_base_ms: u64,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries && is_retryable(&e) => {
                attempt += 1;
                let backoff_ms = backoff_base_ms.saturating_mul(1u64 << (attempt - 1).min(16));
                warn!(
                    "{} request failed: {} - retrying in {} ms (attempt {}/{})",
                    backend,
                    e,
                    backoff_ms,
                    attempt + 1,
                    max_retries + 1
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Map a reqwest transport error onto the provider taxonomy
pub(crate) fn transport_error(backend: &str, error: reqwest::Error) -> ProviderError {
    if error.is_connect() || error.is_timeout() {
        ProviderError::ConnectionError(format!("{} unreachable: {}", backend, error))
    } else {
        ProviderError::RequestFailed(format!("{} request failed: {}", backend, error))
    }
}

/// Turn a non-success HTTP response into an `ApiError`
pub(crate) async fn api_error(response: reqwest::Response) -> ProviderError {
    let status_code = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to get error response text".to_string());
    ProviderError::ApiError {
        status_code,
        message: message.chars().take(500).collect(),
    }
}
