//! Natural-language table filtering
//!
//! Translates queries like "jeans and shirts over $50" into structured
//! column filters through pluggable LLM providers, validates what the model
//! returns, and applies the result to a table through an adapter.
//!
//! # Example
//!
//! ```no_run
//! use table_ai_filter::{ColumnMetadata, FilterType, ParseOptions, parse_natural_language};
//!
//! # async fn example() {
//! let columns = vec![
//!     ColumnMetadata::new("category", FilterType::Multi).with_values(["Jeans", "Shirts"]),
//!     ColumnMetadata::new("price", FilterType::Range),
//! ];
//! let options = ParseOptions {
//!     provider: Some("claude".to_string()),
//!     ..Default::default()
//! };
//! let result = parse_natural_language("jeans over $50", &columns, &[], Some(options)).await;
//! if result.success {
//!     println!("{:?}", result.filters);
//! } else {
//!     println!("{}", result.error.unwrap_or_default());
//! }
//! # }
//! ```

mod adapter;
mod claude;
#[cfg(feature = "claude-cli")]
mod claude_cli;
pub mod config;
mod debounce;
mod error;
mod memory;
mod openai;
pub mod prompt;
mod provider;
mod rules;
mod session;
mod transport;
mod types;

pub use adapter::TableAdapter;
pub use claude::{ClaudeConfig, ClaudeConfigBuilder, ClaudeProvider};
#[cfg(feature = "claude-cli")]
pub use claude_cli::ClaudeCliProvider;
pub use debounce::{DEFAULT_DELAY, Debouncer};
pub use error::{FilterError, MALFORMED_RESPONSE_MESSAGE, Result};
pub use memory::{ColumnFilter, ColumnFilterValue, MemoryTable, Row, TextMatch, infer_columns};
pub use openai::{OpenAiConfig, OpenAiConfigBuilder, OpenAiProvider};
pub use prompt::{build_prompt, validate, validate_parse_result};
pub use provider::{
    FnParser, LlmProvider, ProviderFactory, ProviderOptions, ProviderRegistry, QueryParser,
    available_providers, create_provider, parser_fn, register_provider,
};
pub use rules::{NO_RULE_MESSAGE, RuleParser};
pub use session::{
    AiFilter, DEFAULT_ERROR_MESSAGE, ErrorCallback, FALLBACK_EXPLANATION, FilterState,
    QueryOutcome, SuccessCallback,
};
pub use types::{
    ColumnMetadata, FilterCondition, FilterType, Operator, ParseResult, RawParseResult,
};

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Column id used by [`create_generic_text_search`]
pub const GLOBAL_COLUMN_ID: &str = "global";

/// How a query is translated
///
/// The flat `api_key`, `endpoint` and `model` fields are kept for callers
/// that only ever use one vendor; when set they win over the same fields in
/// `provider_options`.
#[derive(Clone, Default)]
pub struct ParseOptions {
    /// Registry name; falls back to `AI_FILTER_PROVIDER`, then `openai`
    pub provider: Option<String>,
    pub provider_options: ProviderOptions,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    /// Replaces provider dispatch entirely
    pub parser: Option<Arc<dyn QueryParser>>,
    /// Try [`RuleParser`] before calling a provider
    pub rules_first: bool,
}

impl fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseOptions")
            .field("provider", &self.provider)
            .field("provider_options", &self.provider_options)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("parser", &self.parser.as_ref().map(|_| "custom"))
            .field("rules_first", &self.rules_first)
            .finish()
    }
}

impl ParseOptions {
    /// Provider options with the flat fields laid over them
    pub fn merged_provider_options(&self) -> ProviderOptions {
        self.provider_options.clone().with_overrides(
            self.api_key.as_deref(),
            self.endpoint.as_deref(),
            self.model.as_deref(),
        )
    }
}

/// Translate a query using the process-wide provider registry
///
/// Always yields a [`ParseResult`]; every failure, including an unknown
/// provider name, comes back as `success: false` with a message.
///
/// # Arguments
///
/// * `query` - The user's text
/// * `columns` - Filterable columns of the table
/// * `current_filters` - Filters active right now
/// * `options` - Provider selection and hooks (defaults when `None`)
pub async fn parse_natural_language(
    query: &str,
    columns: &[ColumnMetadata],
    current_filters: &[FilterCondition],
    options: Option<ParseOptions>,
) -> ParseResult {
    parse_with_registry(
        ProviderRegistry::global(),
        query,
        columns,
        current_filters,
        options,
    )
    .await
}

/// Translate a query, resolving providers from `registry`
pub async fn parse_with_registry(
    registry: &ProviderRegistry,
    query: &str,
    columns: &[ColumnMetadata],
    current_filters: &[FilterCondition],
    options: Option<ParseOptions>,
) -> ParseResult {
    let opts = options.unwrap_or_default();

    if let Some(parser) = &opts.parser {
        debug!("using custom query parser");
        let result = guarded("custom parser", parser.parse(query, columns)).await;
        return validate(result, columns);
    }

    if opts.rules_first {
        let result = validate(RuleParser::new().parse_query(query, columns), columns);
        if result.success {
            debug!(filters = result.filters.len(), "query handled by rules");
            return result;
        }
    }

    let name = config::provider_name(opts.provider.as_deref());
    let provider = match registry.create(&name, &opts.merged_provider_options()) {
        Ok(provider) => provider,
        Err(err) => {
            warn!(provider = %name, code = err.error_code(), "{}", err);
            return ParseResult::from_error(&err);
        }
    };

    if !provider.is_configured() {
        debug!(provider = %name, "provider is not configured");
    }

    let result = guarded(&name, provider.parse_query(query, columns, current_filters)).await;
    validate(result, columns)
}

fn panic_detail(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Await a parser future, turning a panic into a failed result
async fn guarded<F>(source: &str, translation: F) -> ParseResult
where
    F: Future<Output = ParseResult>,
{
    match AssertUnwindSafe(translation).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let detail = panic_detail(panic.as_ref());
            warn!(source, %detail, "query translation panicked");
            ParseResult::failure(format!("Query translation failed: {}", detail))
        }
    }
}

/// Filter matching `query` as a substring anywhere in the row
pub fn create_generic_text_search(query: &str) -> Vec<FilterCondition> {
    vec![FilterCondition::new(
        GLOBAL_COLUMN_ID,
        Operator::Contains,
        query,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Canned {
        result: ParseResult,
        calls: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl LlmProvider for Canned {
        async fn parse_query(
            &self,
            _query: &str,
            _columns: &[ColumnMetadata],
            _current_filters: &[FilterCondition],
        ) -> ParseResult {
            *self.calls.lock() += 1;
            self.result.clone()
        }

        fn name(&self) -> &str {
            "canned"
        }

        fn is_configured(&self) -> bool {
            true
        }
    }

    fn columns() -> Vec<ColumnMetadata> {
        vec![
            ColumnMetadata::new("category", FilterType::Multi).with_values(["Jeans", "Shirts"]),
            ColumnMetadata::new("price", FilterType::Range),
        ]
    }

    fn registry_with(result: ParseResult) -> (ProviderRegistry, Arc<Mutex<usize>>) {
        let registry = ProviderRegistry::new();
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        registry.register("canned", move |_: &ProviderOptions| {
            let provider: Arc<dyn LlmProvider> = Arc::new(Canned {
                result: result.clone(),
                calls: Arc::clone(&counter),
            });
            Ok(provider)
        });
        (registry, calls)
    }

    fn canned() -> Option<ParseOptions> {
        Some(ParseOptions {
            provider: Some("canned".to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn test_generic_text_search() {
        assert_eq!(
            create_generic_text_search("blue"),
            vec![FilterCondition::new("global", Operator::Contains, "blue")]
        );
    }

    #[tokio::test]
    async fn test_dispatch_validates_provider_output() {
        let (registry, calls) = registry_with(ParseResult::success(
            vec![
                FilterCondition::new("category", Operator::In, json!(["Jeans"])),
                FilterCondition::new("colour", Operator::Equals, "blue"),
            ],
            None,
        ));
        let result = parse_with_registry(&registry, "jeans", &columns(), &[], canned()).await;
        assert!(result.success);
        assert_eq!(
            result.filters,
            vec![FilterCondition::new("category", Operator::In, json!(["Jeans"]))]
        );
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_unknown_provider_becomes_failure() {
        let (registry, _) = registry_with(ParseResult::default());
        let options = ParseOptions {
            provider: Some("nope".to_string()),
            ..Default::default()
        };
        let result = parse_with_registry(&registry, "x", &columns(), &[], Some(options)).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("'nope'"));
        assert!(error.contains("canned"));
    }

    #[tokio::test]
    async fn test_custom_parser_replaces_dispatch() {
        let (registry, calls) = registry_with(ParseResult::failure("provider"));
        let options = ParseOptions {
            provider: Some("canned".to_string()),
            parser: Some(parser_fn(|_, _| async {
                ParseResult::success(vec![FilterCondition::new("price", Operator::Lt, 20)], None)
            })),
            ..Default::default()
        };
        let result = parse_with_registry(&registry, "cheap", &columns(), &[], Some(options)).await;
        assert!(result.success);
        assert_eq!(*calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_rules_first_skips_provider_when_matched() {
        let (registry, calls) = registry_with(ParseResult::failure("provider"));
        let options = ParseOptions {
            rules_first: true,
            ..canned().unwrap_or_default()
        };

        let result =
            parse_with_registry(&registry, "shirts under 30", &columns(), &[], Some(options.clone()))
                .await;
        assert!(result.success);
        assert_eq!(*calls.lock(), 0);

        let result = parse_with_registry(&registry, "something vague", &columns(), &[], Some(options)).await;
        assert_eq!(result.error.as_deref(), Some("provider"));
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_flat_options_win() {
        let registry = ProviderRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        registry.register("capture", move |options: &ProviderOptions| {
            *sink.lock() = Some(options.clone());
            let provider: Arc<dyn LlmProvider> = Arc::new(Canned {
                result: ParseResult::failure("x"),
                calls: Arc::new(Mutex::new(0)),
            });
            Ok(provider)
        });

        let options = ParseOptions {
            provider: Some("capture".to_string()),
            provider_options: ProviderOptions::new().api_key("structured").model("m1"),
            api_key: Some("flat".to_string()),
            ..Default::default()
        };
        parse_with_registry(&registry, "q", &columns(), &[], Some(options)).await;

        let captured = seen.lock().clone().unwrap();
        assert_eq!(captured.api_key.as_deref(), Some("flat"));
        assert_eq!(captured.model.as_deref(), Some("m1"));
    }

    struct Exploding;

    #[async_trait]
    impl QueryParser for Exploding {
        async fn parse(&self, _query: &str, _columns: &[ColumnMetadata]) -> ParseResult {
            panic!("parser exploded")
        }
    }

    #[tokio::test]
    async fn test_panicking_parser_becomes_failure() {
        let registry = ProviderRegistry::new();
        let options = ParseOptions {
            parser: Some(Arc::new(Exploding)),
            ..Default::default()
        };
        let result = parse_with_registry(&registry, "x", &columns(), &[], Some(options)).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Query translation failed: parser exploded"));
    }

    #[tokio::test]
    async fn test_panicking_provider_becomes_failure() {
        struct Faulty;

        #[async_trait]
        impl LlmProvider for Faulty {
            async fn parse_query(
                &self,
                _query: &str,
                _columns: &[ColumnMetadata],
                _current_filters: &[FilterCondition],
            ) -> ParseResult {
                panic!("{} broke", "vendor")
            }

            fn name(&self) -> &str {
                "faulty"
            }

            fn is_configured(&self) -> bool {
                true
            }
        }

        let registry = ProviderRegistry::new();
        registry.register("faulty", |_: &ProviderOptions| {
            let provider: Arc<dyn LlmProvider> = Arc::new(Faulty);
            Ok(provider)
        });
        let options = ParseOptions {
            provider: Some("faulty".to_string()),
            ..Default::default()
        };
        let result = parse_with_registry(&registry, "x", &columns(), &[], Some(options)).await;
        assert_eq!(result.error.as_deref(), Some("Query translation failed: vendor broke"));
    }

    #[test]
    fn test_options_debug_redacts() {
        let options = ParseOptions {
            api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        let printed = format!("{:?}", options);
        assert!(!printed.contains("sk-secret"));
    }
}
