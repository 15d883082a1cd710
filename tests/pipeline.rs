//! End-to-end pipeline tests
//!
//! Drives the orchestrator and the filter session through the process-wide
//! registry with stub providers, and applies results to an in-memory table.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use table_ai_filter::{
    AiFilter, ColumnMetadata, FALLBACK_EXPLANATION, FilterCondition, FilterType, LlmProvider,
    MemoryTable, Operator, ParseOptions, ParseResult, ProviderOptions, Row, TableAdapter,
    available_providers, create_provider, parse_natural_language, register_provider,
};

struct Stub {
    result: ParseResult,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl LlmProvider for Stub {
    async fn parse_query(
        &self,
        _query: &str,
        _columns: &[ColumnMetadata],
        _current_filters: &[FilterCondition],
    ) -> ParseResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }

    fn name(&self) -> &str {
        "stub"
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Register a stub under `name` in the global registry
fn register_stub(name: &str, result: ParseResult) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    register_provider(name, move |_: &ProviderOptions| {
        let provider: Arc<dyn LlmProvider> = Arc::new(Stub {
            result: result.clone(),
            calls: Arc::clone(&counter),
        });
        Ok(provider)
    });
    calls
}

fn using(name: &str) -> Option<ParseOptions> {
    Some(ParseOptions {
        provider: Some(name.to_string()),
        ..Default::default()
    })
}

fn products() -> MemoryTable {
    let rows: Vec<Row> = serde_json::from_value(json!([
        {"name": "Slim Jeans", "category": "Jeans", "price": 650},
        {"name": "Oxford Shirt", "category": "Shirts", "price": 540},
        {"name": "Denim Jacket", "category": "Jackets", "price": 900},
        {"name": "Straight Jeans", "category": "Jeans", "price": 320},
        {"name": "Linen Shirt", "category": "Shirts", "price": 210},
        {"name": "Rain Jacket", "category": "Jackets", "price": 480}
    ]))
    .unwrap();
    MemoryTable::from_rows(rows)
}

fn names(session: &AiFilter<MemoryTable>) -> Vec<String> {
    session.with_adapter(|table| {
        table
            .visible_rows()
            .iter()
            .map(|row| row["name"].as_str().unwrap_or_default().to_string())
            .collect()
    })
}

#[test]
fn test_builtin_providers_available() {
    let names = available_providers();
    assert!(names.contains(&"openai".to_string()));
    assert!(names.contains(&"claude".to_string()));

    let provider = create_provider("claude", &ProviderOptions::new().api_key("x")).unwrap();
    assert_eq!(provider.name(), "claude");
    assert!(provider.is_configured());
}

#[test]
fn test_unknown_provider_lists_available() {
    let err = create_provider("does-not-exist", &ProviderOptions::default())
        .err()
        .unwrap();
    let message = err.to_string();
    assert!(message.contains("does-not-exist"));
    assert!(message.contains("openai"));
    assert!(message.contains("claude"));
}

#[tokio::test]
async fn test_orchestrator_with_registered_stub() {
    let calls = register_stub(
        "pipeline-stub-success",
        ParseResult::success(
            vec![
                FilterCondition::new("category", Operator::In, json!(["Jeans", "Shirts"])),
                FilterCondition::new("price", Operator::Gt, 500),
            ],
            Some("Jeans and shirts over 500".to_string()),
        ),
    );

    let table = products();
    let result = parse_natural_language(
        "jeans and shirts over 500",
        &table.column_metadata(),
        &[],
        using("pipeline-stub-success"),
    )
    .await;

    assert!(result.success);
    assert_eq!(result.filters.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_session_applies_stub_result() {
    register_stub(
        "pipeline-stub-apply",
        ParseResult::success(
            vec![
                FilterCondition::new("category", Operator::In, json!(["Jeans", "Shirts"])),
                FilterCondition::new("price", Operator::Gt, 500),
            ],
            None,
        ),
    );

    let session = AiFilter::new(products()).with_options(ParseOptions {
        provider: Some("pipeline-stub-apply".to_string()),
        ..Default::default()
    });
    let outcome = session.process_query(Some("jeans and shirts over 500")).await;

    assert!(outcome.applied);
    assert_eq!(names(&session), vec!["Slim Jeans", "Oxford Shirt"]);

    session.clear_filters();
    assert_eq!(names(&session).len(), 6);
}

#[tokio::test]
async fn test_session_fallback_keeps_error() {
    register_stub("pipeline-stub-failure", ParseResult::failure("Model overloaded"));

    let reported = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    let session = AiFilter::new(products())
        .with_options(ParseOptions {
            provider: Some("pipeline-stub-failure".to_string()),
            ..Default::default()
        })
        .on_error(move |error| sink.lock().push(error.to_string()));

    let outcome = session.process_query(Some("denim")).await;

    assert!(outcome.fallback_applied);
    assert_eq!(names(&session), vec!["Denim Jacket"]);
    let state = session.state();
    assert_eq!(state.error.as_deref(), Some("Model overloaded"));
    assert_eq!(state.explanation.as_deref(), Some(FALLBACK_EXPLANATION));
    assert_eq!(*reported.lock(), vec!["Model overloaded".to_string()]);
}

#[tokio::test]
async fn test_success_after_fallback_lifts_text_search() {
    register_stub("pipeline-stub-late-failure", ParseResult::failure("nope"));
    register_stub(
        "pipeline-stub-late-success",
        ParseResult::success(
            vec![FilterCondition::new("category", Operator::In, json!(["Jackets"]))],
            None,
        ),
    );

    let failing = AiFilter::new(products()).with_options(ParseOptions {
        provider: Some("pipeline-stub-late-failure".to_string()),
        ..Default::default()
    });
    failing.process_query(Some("denim")).await;
    assert_eq!(names(&failing), vec!["Denim Jacket"]);

    let succeeding = failing.clone().with_options(ParseOptions {
        provider: Some("pipeline-stub-late-success".to_string()),
        ..Default::default()
    });
    succeeding.process_query(Some("jackets")).await;
    assert_eq!(names(&succeeding), vec!["Denim Jacket", "Rain Jacket"]);
    assert!(succeeding.with_adapter(|table| table.global_filter().is_none()));
}

#[tokio::test]
async fn test_rules_first_without_provider() {
    let session = AiFilter::new(products()).with_options(ParseOptions {
        provider: Some("pipeline-unregistered".to_string()),
        rules_first: true,
        ..Default::default()
    });

    let outcome = session.process_query(Some("jackets under 600")).await;
    assert!(outcome.applied);
    assert_eq!(names(&session), vec!["Rain Jacket"]);
    assert_eq!(
        session.active_filters(),
        vec![
            FilterCondition::new("category", Operator::In, json!(["Jackets"])),
            FilterCondition::new("price", Operator::Lt, 600),
        ]
    );
}

#[test]
fn test_inferred_columns_feed_the_prompt() {
    let table = products();
    let columns = table.column_metadata();
    let category = columns.iter().find(|c| c.id == "category").unwrap();
    assert_eq!(category.filter_type, FilterType::Multi);

    let prompt = table_ai_filter::build_prompt("cheap shirts", &columns, &[]);
    assert!(prompt.contains("category"));
    assert!(prompt.contains("Jackets"));
}
