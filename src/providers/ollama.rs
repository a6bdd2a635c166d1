use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::ProviderError;
use crate::providers::{
    api_error, endpoint_url, transport_error, with_retries, GenerationSettings, Provider,
    TermReviewRequest, TranslationRequest,
};
use crate::translation::prompts;

// Nucleus sampling used for every request
const TOP_P: f32 = 0.9;

/// Ollama client for interacting with Ollama API
#[derive(Debug)]
pub struct Ollama {
    /// `/api/generate` endpoint
    generate_url: Url,
    /// `/api/tags` endpoint
    tags_url: Url,
    /// Model name
    model: String,
    /// HTTP client for making requests
    client: Client,
    settings: GenerationSettings,
}

/// Generate request for the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model name to use for generation
    model: String,
    /// Prompt to generate from
    prompt: String,
    /// System message to guide the model
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    /// Additional model parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerationOptions>,
    /// Whether to stream the response
    stream: bool,
}

/// Generation options for the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Temperature for generation
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    /// Top-p sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Generation response from the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Model name
    #[serde(default)]
    pub model: String,
    /// Generated text
    pub response: String,
    /// Whether the generation is complete
    #[serde(default)]
    pub done: bool,
    /// Number of prompt tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    /// Number of generated tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

impl GenerationRequest {
    /// Create a new non-streaming generation request
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            options: None,
            stream: false,
        }
    }

    /// Set the system prompt
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set sampling options
    pub fn options(mut self, temperature: f32, num_predict: u32) -> Self {
        self.options = Some(GenerationOptions {
            temperature: Some(temperature),
            top_p: Some(TOP_P),
            num_predict: Some(num_predict),
        });
        self
    }
}

impl Ollama {
    /// Create a new Ollama client for an endpoint such as `http://localhost:11434`
    pub fn new(endpoint: &str, model: &str, settings: GenerationSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            // Ollama speaks HTTP/1.1
            .http1_only()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| ProviderError::ConnectionError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            generate_url: endpoint_url(endpoint, "api/generate")?,
            tags_url: endpoint_url(endpoint, "api/tags")?,
            model: model.to_string(),
            client,
            settings,
        })
    }

    /// Generate text from the Ollama API with retry logic
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        with_retries(
            "Ollama",
            self.settings.max_retries,
            self.settings.backoff_base_ms,
            || self.generate_once(request),
        )
        .await
    }

    async fn generate_once(&self, request: &GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        let response = self
            .client
            .post(self.generate_url.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error("Ollama", e))?;

        if !response.status().is_success() {
            let err = api_error(response).await;
            error!("Ollama API error: {}", err);
            return Err(err);
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("Failed to read Ollama response: {}", e)))?;

        parse_generation(&response_text)
    }

    async fn run(&self, system: String, prompt: String, temperature: f32, num_predict: u32) -> Result<String, ProviderError> {
        let request = GenerationRequest::new(&self.model, prompt)
            .system(system)
            .options(temperature, num_predict);

        let response = self.generate(&request).await?;
        debug!(
            "Ollama generated {} tokens for {} prompt tokens",
            response.eval_count.unwrap_or(0),
            response.prompt_eval_count.unwrap_or(0)
        );
        Ok(response.response)
    }
}

/// Parse a generate response, tolerating a JSONL stream of partial objects
fn parse_generation(response_text: &str) -> Result<GenerationResponse, ProviderError> {
    if let Ok(parsed) = serde_json::from_str::<GenerationResponse>(response_text) {
        return Ok(parsed);
    }

    let mut text = String::new();
    let mut model = String::new();
    let mut seen = false;
    for line in response_text.lines().filter(|l| !l.trim().is_empty()) {
        let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
            let preview: String = response_text.chars().take(500).collect();
            ProviderError::ParseError(format!("Invalid Ollama response ({}): {}", e, preview))
        })?;
        if let Some(part) = value.get("response").and_then(|v| v.as_str()) {
            text.push_str(part);
            seen = true;
        }
        if let Some(name) = value.get("model").and_then(|v| v.as_str()) {
            model = name.to_string();
        }
    }

    if !seen {
        return Err(ProviderError::ParseError("Ollama response has no text".to_string()));
    }

    Ok(GenerationResponse {
        model,
        response: text,
        done: true,
        prompt_eval_count: None,
        eval_count: None,
    })
}

#[async_trait]
impl Provider for Ollama {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<String, ProviderError> {
        let system = prompts::render_system_prompt(
            &self.settings.system_prompt,
            &request.source_language,
            &request.target_language,
        );
        let prompt = prompts::translation_prompt(request);
        self.run(system, prompt, self.settings.temperature, self.settings.num_predict).await
    }

    async fn review_terms(&self, request: &TermReviewRequest) -> Result<String, ProviderError> {
        let system = prompts::review_system_prompt(request);
        let prompt = prompts::review_prompt(request);
        // Review answers are short and should be as deterministic as possible
        self.run(system, prompt, 0.1, self.settings.num_predict / 2).await
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(self.tags_url.clone())
            .send()
            .await
            .map_err(|e| transport_error("Ollama", e))?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("Invalid Ollama tags response: {}", e)))?;

        if tags.models.iter().any(|m| m.name.contains(&self.model)) {
            Ok(())
        } else {
            Err(ProviderError::ModelUnavailable(format!(
                "{} is not installed, run `ollama pull {}`",
                self.model, self.model
            )))
        }
    }
}
