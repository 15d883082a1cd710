//! LLM Provider Trait and Registry
//!
//! Defines the interface every LLM backend implements, the options they are
//! built from, and the process-wide name → factory registry used to pick one.

use crate::error::{FilterError, Result};
use crate::types::{ColumnMetadata, FilterCondition, ParseResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// LLM provider trait for query translation
///
/// Implement this trait to add support for a new LLM vendor, then register
/// a factory for it with [`register_provider`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Translate a natural-language query into filter conditions
    ///
    /// Never fails past this boundary: missing credentials, transport
    /// errors and malformed replies all come back as a failed
    /// [`ParseResult`]. Successful replies have already been validated
    /// against `columns`.
    ///
    /// # Arguments
    ///
    /// * `query` - The user's text
    /// * `columns` - Filterable columns of the table
    /// * `current_filters` - Filters active right now, so the model can refine them
    async fn parse_query(
        &self,
        query: &str,
        columns: &[ColumnMetadata],
        current_filters: &[FilterCondition],
    ) -> ParseResult;

    /// Registry name (e.g., "openai")
    fn name(&self) -> &str;

    /// Whether the required credentials are present
    fn is_configured(&self) -> bool;

    /// Model identifier, if the provider exposes one
    fn model(&self) -> Option<&str> {
        None
    }
}

/// Caller-supplied replacement for provider dispatch
///
/// Used for deterministic shortcuts before, or instead of, an LLM call.
#[async_trait]
pub trait QueryParser: Send + Sync {
    async fn parse(&self, query: &str, columns: &[ColumnMetadata]) -> ParseResult;
}

/// [`QueryParser`] backed by an async closure
pub struct FnParser<F>(F);

#[async_trait]
impl<F, Fut> QueryParser for FnParser<F>
where
    F: Fn(String, Vec<ColumnMetadata>) -> Fut + Send + Sync,
    Fut: Future<Output = ParseResult> + Send,
{
    async fn parse(&self, query: &str, columns: &[ColumnMetadata]) -> ParseResult {
        (self.0)(query.to_string(), columns.to_vec()).await
    }
}

/// Wrap an async closure as a shareable [`QueryParser`]
pub fn parser_fn<F, Fut>(f: F) -> Arc<dyn QueryParser>
where
    F: Fn(String, Vec<ColumnMetadata>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ParseResult> + Send + 'static,
{
    Arc::new(FnParser(f))
}

/// Options a provider is built from
///
/// `extra` holds vendor-specific fields such as `anthropic_version`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderOptions {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl fmt::Debug for ProviderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderOptions")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("extra", &self.extra)
            .finish()
    }
}

impl ProviderOptions {
    pub fn new() -> Self {
        Self::default()
    }

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

    /// Set a vendor-specific field
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Vendor-specific string field
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// Overlay the legacy flat fields; each one that is set wins
    pub fn with_overrides(
        mut self,
        api_key: Option<&str>,
        endpoint: Option<&str>,
        model: Option<&str>,
    ) -> Self {
        if let Some(api_key) = api_key {
            self.api_key = Some(api_key.to_string());
        }
        if let Some(endpoint) = endpoint {
            self.endpoint = Some(endpoint.to_string());
        }
        if let Some(model) = model {
            self.model = Some(model.to_string());
        }
        self
    }
}

/// Builds a provider from options
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderOptions) -> Result<Arc<dyn LlmProvider>> + Send + Sync>;

/// Name → factory mapping
///
/// Registering a name twice replaces the earlier factory.
pub struct ProviderRegistry {
    factories: RwLock<HashMap<String, ProviderFactory>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Registry holding every provider compiled into the crate
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::openai::register(&registry);
        crate::claude::register(&registry);
        #[cfg(feature = "claude-cli")]
        crate::claude_cli::register(&registry);
        registry
    }

    /// The process-wide registry, populated with the built-ins on first use
    pub fn global() -> &'static ProviderRegistry {
        &GLOBAL_REGISTRY
    }

    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ProviderOptions) -> Result<Arc<dyn LlmProvider>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(provider = %name, "registering LLM provider");
        self.factories.write().insert(name, Arc::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<ProviderFactory> {
        self.factories.read().get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the named provider
    ///
    /// # Errors
    ///
    /// [`FilterError::UnknownProvider`] listing the registered names, or
    /// whatever the factory itself fails with.
    pub fn create(&self, name: &str, options: &ProviderOptions) -> Result<Arc<dyn LlmProvider>> {
        let factory = self.get(name).ok_or_else(|| FilterError::UnknownProvider {
            name: name.to_string(),
            available: self.names().join(", "),
        })?;
        factory(options)
    }
}

static GLOBAL_REGISTRY: Lazy<ProviderRegistry> = Lazy::new(ProviderRegistry::with_builtins);

/// Register a provider in the process-wide registry
pub fn register_provider<F>(name: impl Into<String>, factory: F)
where
    F: Fn(&ProviderOptions) -> Result<Arc<dyn LlmProvider>> + Send + Sync + 'static,
{
    ProviderRegistry::global().register(name, factory);
}

/// Create a provider from the process-wide registry
pub fn create_provider(name: &str, options: &ProviderOptions) -> Result<Arc<dyn LlmProvider>> {
    ProviderRegistry::global().create(name, options)
}

/// Names in the process-wide registry
pub fn available_providers() -> Vec<String> {
    ProviderRegistry::global().names()
}
