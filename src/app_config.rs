use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::{Path, PathBuf};

use crate::file_utils::FileManager;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Source language code (ISO)
    pub source_language: String,

    /// Target language code (ISO)
    pub target_language: String,

    /// Translation config
    pub translation: TranslationConfig,

    /// Chunking config
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Glossary and term handling config
    #[serde(default)]
    pub glossary: GlossaryConfig,

    /// Job controller config
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Translation backend type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslationProvider {
    // @provider: Ollama
    #[default]
    Ollama,
    // @provider: MLX server (OpenAI-compatible local server)
    Mlx,
    // @provider: Identity backend, returns text unchanged
    Echo,
}

impl TranslationProvider {
    // @returns: Capitalized provider name
    pub fn display_name(&self) -> &str {
        match self {
            Self::Ollama => "Ollama",
            Self::Mlx => "MLX",
            Self::Echo => "Echo",
        }
    }

    // @returns: Lowercase provider identifier
    pub fn to_lowercase_string(&self) -> String {
        match self {
            Self::Ollama => "ollama".to_string(),
            Self::Mlx => "mlx".to_string(),
            Self::Echo => "echo".to_string(),
        }
    }
}

impl std::fmt::Display for TranslationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_lowercase_string())
    }
}

impl std::str::FromStr for TranslationProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "mlx" => Ok(Self::Mlx),
            "echo" => Ok(Self::Echo),
            _ => Err(anyhow!("Invalid provider type: {}", s)),
        }
    }
}

/// Provider configuration wrapper
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    // @field: Provider type identifier
    #[serde(rename = "type")]
    pub provider_type: String,

    // @field: Model name
    #[serde(default = "String::new")]
    pub model: String,

    // @field: Service URL
    #[serde(default = "String::new")]
    pub endpoint: String,

    // @field: Timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    // @param provider_type: Provider enum
    // @returns: Provider config with defaults
    pub fn new(provider_type: TranslationProvider) -> Self {
        match provider_type {
            TranslationProvider::Ollama => Self {
                provider_type: "ollama".to_string(),
                model: default_ollama_model(),
                endpoint: default_ollama_endpoint(),
                timeout_secs: default_timeout_secs(),
            },
            TranslationProvider::Mlx => Self {
                provider_type: "mlx".to_string(),
                model: default_mlx_model(),
                endpoint: default_mlx_endpoint(),
                timeout_secs: default_timeout_secs(),
            },
            TranslationProvider::Echo => Self {
                provider_type: "echo".to_string(),
                model: "echo".to_string(),
                endpoint: String::new(),
                timeout_secs: default_timeout_secs(),
            },
        }
    }
}

/// Translation service configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationConfig {
    /// Translation provider to use
    #[serde(default)]
    pub provider: TranslationProvider,

    /// Available translation providers
    #[serde(default)]
    pub available_providers: Vec<ProviderConfig>,

    /// Common translation settings
    #[serde(default)]
    pub common: TranslationCommonConfig,
}

/// Common translation settings applicable to all providers
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationCommonConfig {
    /// System prompt template for translation
    /// Placeholders: {source_language}, {target_language}
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Retry count for failed requests
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Backoff multiplier for retries (in milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Temperature parameter for text generation (0.0 to 1.0)
    /// Lower values make output more deterministic, higher values more creative
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum number of tokens the backend may generate per chunk
    #[serde(default = "default_num_predict")]
    pub num_predict: u32,

    /// Characters of the previous translated chunk passed as context
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
}

impl Default for TranslationCommonConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            temperature: default_temperature(),
            num_predict: default_num_predict(),
            context_chars: default_context_chars(),
        }
    }
}

/// Chunking configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target number of words per translation unit
    #[serde(default = "default_word_budget")]
    pub word_budget: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            word_budget: default_word_budget(),
        }
    }
}

/// A target-language pattern that must be rewritten back to a source-language term
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ForcedTerm {
    /// Case-insensitive regex matching the translated phrase
    pub pattern: String,
    /// Source-language term to put back
    pub term: String,
}

impl ForcedTerm {
    pub fn new(pattern: &str, term: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            term: term.to_string(),
        }
    }
}

/// Glossary and term-handling configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GlossaryConfig {
    /// Rewrites applied after restoration, keyed by target language
    #[serde(default = "default_force_source_terms")]
    pub force_source_terms: Vec<ForcedTermSet>,

    /// Single-word terms that are always protected as-is
    #[serde(default = "default_keep_terms")]
    pub keep_terms: Vec<String>,

    /// Annotate the first use of each glossary term with the source term
    #[serde(default = "default_true")]
    pub annotate_first_use: bool,
}

/// Forced source terms for one target language
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ForcedTermSet {
    /// Target language code these patterns apply to
    pub language: String,
    /// Patterns and their source-language replacements
    pub terms: Vec<ForcedTerm>,
}

impl Default for GlossaryConfig {
    fn default() -> Self {
        Self {
            force_source_terms: default_force_source_terms(),
            keep_terms: default_keep_terms(),
            annotate_first_use: true,
        }
    }
}

impl GlossaryConfig {
    /// Forced terms applicable to the given target language
    pub fn forced_terms_for(&self, target_language: &str) -> Vec<ForcedTerm> {
        self.force_source_terms
            .iter()
            .filter(|set| crate::language_utils::language_codes_match(&set.language, target_language))
            .flat_map(|set| set.terms.iter().cloned())
            .collect()
    }
}

/// Job controller configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControllerConfig {
    /// Directory holding the registry and per-job directories
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Grace period between the termination request and the forced kill
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Default number of log characters returned by the log tail
    #[serde(default = "default_log_tail_chars")]
    pub log_tail_chars: usize,

    /// Externally reachable prefix under which job outputs are served
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            grace_period_ms: default_grace_period_ms(),
            log_tail_chars: default_log_tail_chars(),
            url_prefix: default_url_prefix(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    3000
}

fn default_temperature() -> f32 {
    0.2
}

fn default_num_predict() -> u32 {
    4096
}

fn default_context_chars() -> usize {
    400
}

fn default_word_budget() -> usize {
    600
}

fn default_true() -> bool {
    true
}

fn default_grace_period_ms() -> u64 {
    3000
}

fn default_log_tail_chars() -> usize {
    4000
}

fn default_url_prefix() -> String {
    "/data/jobs".to_string()
}

fn default_root_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("booktrans")
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_mlx_endpoint() -> String {
    // mlx_lm.server speaks the OpenAI chat completions protocol under /v1
    "http://localhost:8080/v1".to_string()
}

fn default_ollama_model() -> String {
    "aya-expanse:8b".to_string()
}

fn default_mlx_model() -> String {
    "mlx-community/aya-expanse-8b-4bit".to_string()
}

fn default_system_prompt() -> String {
    "You are a professional translator of technical literature. Translate the text from \
     {source_language} to {target_language}.\n\
     Rules:\n\
     1. Reply with the translation only, no comments or introductions.\n\
     2. Keep Markdown structure: headings, emphasis, lists and rule lines.\n\
     3. Never translate code, identifiers, product names, acronyms, numbers, URLs or emails.\n\
     4. Keep paragraph structure of the original.\n\
     5. Use a clear academic register."
        .to_string()
}

fn default_keep_terms() -> Vec<String> {
    [
        "API", "REST", "GraphQL", "gRPC", "HTTP", "HTTPS", "TCP", "UDP", "Docker",
        "Kubernetes", "DevOps", "GitOps", "SQL", "NoSQL", "MongoDB", "PostgreSQL", "Redis",
        "Kafka", "AWS", "GCP", "Azure", "SaaS", "PaaS", "IaaS", "SOLID", "DDD", "TDD", "BDD",
        "ADR", "SLA", "SLO", "SLI", "RTO", "RPO",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_force_source_terms() -> Vec<ForcedTermSet> {
    vec![ForcedTermSet {
        language: "uk".to_string(),
        terms: vec![
            ForcedTerm::new(r"архітектор[аиуові]?\s+програмного\s+забезпечення", "software architect"),
            ForcedTerm::new(r"архітектор[аиуові]?\s+програмне\s+забезпечення", "software architect"),
            ForcedTerm::new(r"архітектур[аиуові]+\s+програмного\s+забезпечення", "software architecture"),
            ForcedTerm::new(r"програмн[аиоу]+\s+архітектур[аиуові]*", "software architecture"),
            ForcedTerm::new(r"програмн[аиоу]+\s+архітектор[аиуові]*", "software architect"),
            ForcedTerm::new(r"інженерія\s+програмного\s+забезпечення", "software engineering"),
            ForcedTerm::new(r"розробк[аи]\s+програмного\s+забезпечення", "software development"),
        ],
    }]
}

impl Config {
    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        let _source_name = crate::language_utils::get_language_name(&self.source_language)?;
        let _target_name = crate::language_utils::get_language_name(&self.target_language)?;

        if self.chunking.word_budget == 0 {
            return Err(anyhow!("Word budget must be greater than zero"));
        }

        if self.translation.provider != TranslationProvider::Echo
            && self.translation.get_endpoint().is_empty()
        {
            return Err(anyhow!(
                "Endpoint is required for the {} provider",
                self.translation.provider.display_name()
            ));
        }

        for set in &self.glossary.force_source_terms {
            for term in &set.terms {
                regex::Regex::new(&term.pattern)
                    .with_context(|| format!("Invalid forced term pattern: {}", term.pattern))?;
            }
        }

        Ok(())
    }

    /// Load the configuration file, creating a default one when it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = FileManager::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            Ok(config)
        } else {
            warn!("Config file not found at {:?}, creating default config.", path);
            let config = Config::default();
            let config_json = serde_json::to_string_pretty(&config)
                .context("Failed to serialize default config to JSON")?;
            FileManager::write_to_file(path, &config_json)?;
            Ok(config)
        }
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: "en".to_string(),
            target_language: "uk".to_string(),
            translation: TranslationConfig::default(),
            chunking: ChunkingConfig::default(),
            glossary: GlossaryConfig::default(),
            controller: ControllerConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl TranslationConfig {
    /// Get the active provider configuration from the available_providers array
    pub fn get_active_provider_config(&self) -> Option<&ProviderConfig> {
        self.get_provider_config(&self.provider)
    }

    /// Get a specific provider configuration by type
    pub fn get_provider_config(&self, provider_type: &TranslationProvider) -> Option<&ProviderConfig> {
        let provider_str = provider_type.to_lowercase_string();
        self.available_providers
            .iter()
            .find(|p| p.provider_type == provider_str)
    }

    /// Get the model for the active provider
    pub fn get_model(&self) -> String {
        if let Some(provider_config) = self.get_active_provider_config() {
            if !provider_config.model.is_empty() {
                return provider_config.model.clone();
            }
        }

        match self.provider {
            TranslationProvider::Ollama => default_ollama_model(),
            TranslationProvider::Mlx => default_mlx_model(),
            TranslationProvider::Echo => "echo".to_string(),
        }
    }

    /// Get the endpoint for the active provider
    pub fn get_endpoint(&self) -> String {
        if let Some(provider_config) = self.get_active_provider_config() {
            if !provider_config.endpoint.is_empty() {
                return provider_config.endpoint.clone();
            }
        }

        match self.provider {
            TranslationProvider::Ollama => default_ollama_endpoint(),
            TranslationProvider::Mlx => default_mlx_endpoint(),
            TranslationProvider::Echo => String::new(),
        }
    }

    /// Get the request timeout for the active provider
    pub fn get_timeout_secs(&self) -> u64 {
        self.get_active_provider_config()
            .map(|p| p.timeout_secs)
            .filter(|t| *t > 0)
            .unwrap_or_else(default_timeout_secs)
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: TranslationProvider::default(),
            available_providers: vec![
                ProviderConfig::new(TranslationProvider::Ollama),
                ProviderConfig::new(TranslationProvider::Mlx),
                ProviderConfig::new(TranslationProvider::Echo),
            ],
            common: TranslationCommonConfig::default(),
        }
    }
}
