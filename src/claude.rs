//! Anthropic Claude provider
//!
//! Uses the Messages API (`x-api-key` + `anthropic-version` headers) to
//! translate queries into filters.

use crate::config::{self, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT_SECS};
use crate::error::{FilterError, Result};
use crate::prompt::{SYSTEM_PROMPT, build_prompt, interpret_reply};
use crate::provider::{LlmProvider, ProviderOptions, ProviderRegistry};
use crate::transport;
use crate::types::{ColumnMetadata, FilterCondition, ParseResult};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Registry name
pub const PROVIDER_NAME: &str = "claude";

/// Environment fallback for the API key
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Key in [`ProviderOptions::extra`] overriding the protocol version
pub const ANTHROPIC_VERSION_OPTION: &str = "anthropic_version";

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    system: &'a str,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Claude provider settings
#[derive(Clone)]
pub struct ClaudeConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub anthropic_version: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ClaudeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("anthropic_version", &self.anthropic_version)
            .finish_non_exhaustive()
    }
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClaudeConfig {
    pub fn builder() -> ClaudeConfigBuilder {
        ClaudeConfigBuilder::default()
    }

    /// Build from generic options, falling back to `ANTHROPIC_API_KEY`
    pub fn from_options(options: &ProviderOptions) -> Self {
        Self::from_options_with_env(options, config::env_value(API_KEY_ENV))
    }

    pub fn from_options_with_env(options: &ProviderOptions, env_key: Option<String>) -> Self {
        ClaudeConfigBuilder {
            api_key: config::resolve(options.api_key.as_deref(), env_key),
            endpoint: config::non_empty(options.endpoint.clone()),
            model: config::non_empty(options.model.clone()),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            anthropic_version: options
                .extra_str(ANTHROPIC_VERSION_OPTION)
                .map(str::to_string),
            timeout_secs: options.timeout_secs,
        }
        .build()
    }
}

#[derive(Default)]
pub struct ClaudeConfigBuilder {
    api_key: Option<String>,
    endpoint: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    anthropic_version: Option<String>,
    timeout_secs: Option<u64>,
}

impl ClaudeConfigBuilder {
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

    pub fn anthropic_version(mut self, version: impl Into<String>) -> Self {
        self.anthropic_version = Some(version.into());
        self
    }

    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn build(self) -> ClaudeConfig {
        ClaudeConfig {
            api_key: config::non_empty(self.api_key),
            endpoint: self.endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            anthropic_version: self
                .anthropic_version
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_VERSION.to_string()),
            timeout_secs: self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Claude HTTP provider
pub struct ClaudeProvider {
    config: ClaudeConfig,
    client: Client,
}

impl ClaudeProvider {
    /// Create from generic options (API key falls back to `ANTHROPIC_API_KEY`)
    pub fn new(options: &ProviderOptions) -> Result<Self> {
        Self::with_config(ClaudeConfig::from_options(options))
    }

    pub fn with_config(config: ClaudeConfig) -> Result<Self> {
        let client = transport::build_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ClaudeConfig {
        &self.config
    }

    fn headers(&self, api_key: &str) -> Result<HeaderMap> {
        let value = |v: &str| {
            HeaderValue::from_str(v).map_err(|e| FilterError::Client(format!("invalid header: {}", e)))
        };
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-api-key"), value(api_key)?);
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            value(&self.config.anthropic_version)?,
        );
        Ok(headers)
    }

    async fn call_api(&self, api_key: &str, prompt: &str) -> Result<String> {
        let request = MessagesRequest {
            model: &self.config.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            system: SYSTEM_PROMPT,
        };

        let response: MessagesResponse = transport::post_json(
            &self.client,
            "Anthropic",
            &self.config.endpoint,
            self.headers(api_key)?,
            &request,
        )
        .await?;

        // A missing text block decodes as empty and fails as malformed output
        Ok(response
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .unwrap_or_default())
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
                vendor: "Anthropic",
                env_var: API_KEY_ENV,
            })?;

        let prompt = build_prompt(query, columns, current_filters);
        let content = self.call_api(api_key, &prompt).await?;
        Ok(interpret_reply(&content, columns))
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
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
                    model = %self.config.model,
                    success = result.success,
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
        let provider: Arc<dyn LlmProvider> = Arc::new(ClaudeProvider::new(options)?);
        Ok(provider)
    });
}
