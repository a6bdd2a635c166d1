/*!
 * In-process backends.
 *
 * `MockProvider::echo()` is the `echo` backend offered by the CLI: it returns
 * the text unchanged, which makes dry runs possible without a model. The
 * other behaviors simulate backend failures and sloppy models in tests:
 * - `MockProvider::working()` - Always succeeds with a tagged "translation"
 * - `MockProvider::failing()` - Always fails with an error
 * - `MockProvider::fail_after(n)` - Succeeds n times, then fails
 * - `MockProvider::mangling()` - Rewrites placeholder tokens the way models do
 */

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{Provider, TermReviewRequest, TranslationRequest};

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"⟦P(\d+)⟧").expect("valid token pattern"));

/// Behavior mode for the mock provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockBehavior {
    /// Returns the text unchanged
    Echo,
    /// Prefixes the text with the target language
    Working,
    /// Always fails with a connection error
    Failing,
    /// Succeeds for the first `successes` requests, then fails
    FailAfter { successes: usize },
    /// Rewrites `⟦P3⟧` as `[P3]`
    ManglePlaceholders,
    /// Removes every placeholder token
    DropPlaceholders,
    /// Echoes after a delay
    Slow { delay_ms: u64 },
}

/// Mock provider for dry runs and tests
#[derive(Debug, Clone)]
pub struct MockProvider {
    /// Behavior mode
    behavior: MockBehavior,
    /// Request counter shared between clones
    request_count: Arc<AtomicUsize>,
    /// Every translation request received, in order
    requests: Arc<Mutex<Vec<TranslationRequest>>>,
    /// Fixed answer of the terminology review
    review_answer: Option<String>,
}

impl MockProvider {
    /// Create a new mock provider with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            review_answer: None,
        }
    }

    /// Identity backend
    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    /// Create a working mock provider that always succeeds
    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    /// Create a failing mock provider that always errors
    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    /// Create a mock that fails once `successes` requests have been served
    pub fn fail_after(successes: usize) -> Self {
        Self::new(MockBehavior::FailAfter { successes })
    }

    /// Create a mock that alters placeholder tokens
    pub fn mangling() -> Self {
        Self::new(MockBehavior::ManglePlaceholders)
    }

    /// Set the answer returned by the terminology review
    pub fn with_review_answer(mut self, answer: &str) -> Self {
        self.review_answer = Some(answer.to_string());
        self
    }

    /// Number of translation requests served or refused so far
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Snapshot of the translation requests received
    pub fn requests(&self) -> Vec<TranslationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn unavailable(&self) -> ProviderError {
        ProviderError::ConnectionError("mock backend is unavailable".to_string())
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        match self.behavior {
            MockBehavior::Echo => "echo",
            _ => "mock",
        }
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<String, ProviderError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        match self.behavior {
            MockBehavior::Echo => Ok(request.text.clone()),
            MockBehavior::Working => Ok(format!("[{}] {}", request.target_language, request.text)),
            MockBehavior::Failing => Err(self.unavailable()),
            MockBehavior::FailAfter { successes } => {
                if count < successes {
                    Ok(request.text.clone())
                } else {
                    Err(self.unavailable())
                }
            }
            MockBehavior::ManglePlaceholders => Ok(TOKEN.replace_all(&request.text, "[P$1]").into_owned()),
            MockBehavior::DropPlaceholders => Ok(TOKEN.replace_all(&request.text, "").into_owned()),
            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(request.text.clone())
            }
        }
    }

    async fn review_terms(&self, _request: &TermReviewRequest) -> Result<String, ProviderError> {
        match (self.behavior, &self.review_answer) {
            (MockBehavior::Failing, _) => Err(self.unavailable()),
            (_, Some(answer)) => Ok(answer.clone()),
            (_, None) => Ok("NONE".to_string()),
        }
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        match self.behavior {
            MockBehavior::Failing => Err(self.unavailable()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> TranslationRequest {
        TranslationRequest {
            text: text.to_string(),
            source_language: "English".to_string(),
            target_language: "Ukrainian".to_string(),
            context: None,
        }
    }

    #[tokio::test]
    async fn test_echoProvider_shouldReturnTextUnchanged() {
        let provider = MockProvider::echo();
        assert_eq!(provider.translate(&request("Use ⟦P0⟧")).await.unwrap(), "Use ⟦P0⟧");
        assert_eq!(provider.name(), "echo");
    }

    #[tokio::test]
    async fn test_failAfter_shouldFailOnceExhausted() {
        let provider = MockProvider::fail_after(2);
        assert!(provider.translate(&request("a")).await.is_ok());
        assert!(provider.translate(&request("b")).await.is_ok());
        assert!(provider.translate(&request("c")).await.is_err());
        assert_eq!(provider.request_count(), 3);
    }

    #[tokio::test]
    async fn test_manglingProvider_shouldRewriteTokens() {
        let provider = MockProvider::mangling();
        assert_eq!(provider.translate(&request("⟦P0⟧ і ⟦P12⟧")).await.unwrap(), "[P0] і [P12]");
    }

    #[tokio::test]
    async fn test_clones_shouldShareRequestLog() {
        let provider = MockProvider::working();
        let clone = provider.clone();
        clone.translate(&request("x")).await.unwrap();

        assert_eq!(provider.requests().len(), 1);
        assert_eq!(provider.requests()[0].text, "x");
    }
}
