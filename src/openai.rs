//! OpenAI provider implementation
//!
//! Talks to the Chat Completions API (<https://platform.openai.com/docs/api-reference/chat>)
//! with bearer-token authentication.

use crate::config::{self, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT_SECS};
use crate::error::{FilterError, Result};
use crate::prompt::{build_prompt, interpret_reply};
use crate::provider::{LlmProvider, ProviderOptions, ProviderRegistry};
use crate::transport;
use crate::types::{ColumnMetadata, FilterCondition, ParseResult};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Registry name.
pub const PROVIDER_NAME: &str = "openai";

/// Environment fallback for the API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Default Chat Completions endpoint.
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Default model.
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<Choice>>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ReplyMessage>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// Configuration for the OpenAI provider.
#[derive(Clone)]
pub struct OpenAiConfig {
    /// API key; `None` leaves the provider unconfigured.
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl OpenAiConfig {
    pub fn builder() -> OpenAiConfigBuilder {
        OpenAiConfigBuilder::default()
    }

    /// Build from generic options, falling back to `OPENAI_API_KEY`
    pub fn from_options(options: &ProviderOptions) -> Self {
        Self::from_options_with_env(options, config::env_value(API_KEY_ENV))
    }

    /// Build from generic options with an explicit environment value
    pub fn from_options_with_env(options: &ProviderOptions, env_key: Option<String>) -> Self {
        let mut builder = Self::builder();
        if let Some(key) = config::resolve(options.api_key.as_deref(), env_key) {
            builder = builder.api_key(key);
        }
        if let Some(endpoint) = config::non_empty(options.endpoint.clone()) {
            builder = builder.endpoint(endpoint);
        }
        if let Some(model) = config::non_empty(options.model.clone()) {
            builder = builder.model(model);
        }
        if let Some(temperature) = options.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        if let Some(timeout_secs) = options.timeout_secs {
            builder = builder.timeout_secs(timeout_secs);
        }
        builder.build()
    }
}

/// Builder for [`OpenAiConfig`].
#[derive(Default)]
pub struct OpenAiConfigBuilder {
    api_key: Option<String>,
    endpoint: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
}

impl OpenAiConfigBuilder {
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn build(self) -> OpenAiConfig {
        OpenAiConfig {
            api_key: config::non_empty(self.api_key),
            endpoint: self.endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            timeout_secs: self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// OpenAI provider
///
/// # Example
///
/// ```rust,no_run
/// use table_ai_filter::{LlmProvider, OpenAiConfig, OpenAiProvider};
///
/// # async fn example() -> Result<(), table_ai_filter::FilterError> {
/// let config = OpenAiConfig::builder().api_key("sk-...").model("gpt-4o-mini").build();
/// let provider = OpenAiProvider::with_config(config)?;
/// let result = provider.parse_query("shirts under 20", &[], &[]).await;
/// # Ok(())
/// # }
/// ```
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    /// Create from generic options (API key falls back to `OPENAI_API_KEY`)
    pub fn new(options: &ProviderOptions) -> Result<Self> {
        Self::with_config(OpenAiConfig::from_options(options))
    }

    pub fn with_config(config: OpenAiConfig) -> Result<Self> {
        let client = transport::build_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    async fn call_api(&self, api_key: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| FilterError::Client(format!("invalid API key header: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);

        let response: ChatResponse =
            transport::post_json(&self.client, "OpenAI", &self.config.endpoint, headers, &request)
                .await?;

        response
            .choices
            .and_then(|choices| choices.into_iter().next())
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or(FilterError::EmptyResponse("OpenAI"))
    }

    async fn try_parse(
        &self,
        query: &str,
        columns: &[ColumnMetadata],
        current_filters: &[FilterCondition],
    ) -> Result<ParseResult> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(FilterError::MissingApiKey {
                vendor: "OpenAI",
                env_var: API_KEY_ENV,
            })?;

        let prompt = build_prompt(query, columns, current_filters);
        let content = self.call_api(api_key, &prompt).await?;
        Ok(interpret_reply(&content, columns))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn parse_query(
        &self,
        query: &str,
        columns: &[ColumnMetadata],
        current_filters: &[FilterCondition],
    ) -> ParseResult {
        match self.try_parse(query, columns, current_filters).await {
            Ok(result) => {
                info!(
                    provider = PROVIDER_NAME,
                    success = result.success,
                    filters = result.filters.len(),
                    "query translated"
                );
                result
            }
            Err(err) => {
                warn!(provider = PROVIDER_NAME, code = err.error_code(), "{}", err);
                ParseResult::from_error(&err)
            }
        }
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn model(&self) -> Option<&str> {
        Some(&self.config.model)
    }
}

pub(crate) fn register(registry: &ProviderRegistry) {
    registry.register(PROVIDER_NAME, |options: &ProviderOptions| {
        let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(options)?);
        Ok(provider)
    });
}
