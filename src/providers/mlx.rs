use async_trait::async_trait;
use log::{error, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::ProviderError;
use crate::providers::{
    api_error, endpoint_url, transport_error, with_retries, GenerationSettings, Provider,
    TermReviewRequest, TranslationRequest,
};
use crate::translation::prompts;

/// Client for an MLX server speaking the OpenAI chat completions protocol
#[derive(Debug)]
pub struct Mlx {
    /// `chat/completions` endpoint
    completions_url: Url,
    /// `models` endpoint
    models_url: Url,
    model: String,
    client: Client,
    settings: GenerationSettings,
}

/// Chat completion request
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    /// The model to use
    model: String,
    /// The messages for the conversation
    messages: Vec<ChatMessage>,
    /// Temperature for generation
    temperature: f32,
    /// Top probability mass to consider (nucleus sampling)
    top_p: f32,
    /// Maximum number of tokens to generate
    max_tokens: u32,
    stream: bool,
}

/// Message format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender (system, user, assistant)
    pub role: String,
    /// Content of the message
    pub content: String,
}

/// Chat completion response
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

/// Individual choice in a response
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl Mlx {
    /// Create a client for an endpoint such as `http://localhost:8080/v1`
    pub fn new(endpoint: &str, model: &str, settings: GenerationSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProviderError::ConnectionError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            completions_url: endpoint_url(endpoint, "chat/completions")?,
            models_url: endpoint_url(endpoint, "models")?,
            model: model.to_string(),
            client,
            settings,
        })
    }

    /// Send a chat completion request with retry logic
    pub async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, ProviderError> {
        with_retries(
            "MLX",
            self.settings.max_retries,
            self.settings.backoff_base_ms,
            || self.complete_once(request),
        )
        .await
    }

    async fn complete_once(&self, request: &ChatCompletionRequest) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(self.completions_url.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error("MLX", e))?;

        if !response.status().is_success() {
            let err = api_error(response).await;
            error!("MLX API error: {}", err);
            return Err(err);
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("Invalid MLX response: {}", e)))?;

        extract_text(parsed)
    }

    fn request(&self, system: String, prompt: String, temperature: f32, max_tokens: u32) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            temperature,
            top_p: 0.9,
            max_tokens,
            stream: false,
        }
    }
}

/// Extract text from the first choice of a response
fn extract_text(response: ChatCompletionResponse) -> Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| ProviderError::ParseError("MLX response has no choices".to_string()))
}

#[async_trait]
impl Provider for Mlx {
    fn name(&self) -> &str {
        "mlx"
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<String, ProviderError> {
        let system = prompts::render_system_prompt(
            &self.settings.system_prompt,
            &request.source_language,
            &request.target_language,
        );
        let chat = self.request(
            system,
            prompts::translation_prompt(request),
            self.settings.temperature,
            self.settings.num_predict,
        );
        self.complete(&chat).await
    }

    async fn review_terms(&self, request: &TermReviewRequest) -> Result<String, ProviderError> {
        let chat = self.request(
            prompts::review_system_prompt(request),
            prompts::review_prompt(request),
            0.1,
            self.settings.num_predict / 2,
        );
        self.complete(&chat).await
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(self.models_url.clone())
            .send()
            .await
            .map_err(|e| transport_error("MLX", e))?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        // mlx_lm.server loads the requested model lazily, so an absent id is only a hint
        if let Ok(list) = response.json::<ModelList>().await {
            if !list.data.is_empty() && !list.data.iter().any(|m| m.id == self.model) {
                warn!("MLX server does not list {}, it will be loaded on first use", self.model);
            }
        }
        Ok(())
    }
}
