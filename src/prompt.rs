//! Prompt construction and reply validation shared by every provider
//!
//! Providers only own their transport. The text they send is built by
//! [`build_prompt`], and the text they get back goes through
//! [`parse_reply`] and [`validate_parse_result`] before anything reaches
//! the caller.

use crate::error::{FilterError, Result};
use crate::types::{ColumnMetadata, FilterCondition, Operator, ParseResult, RawParseResult};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Error used when a successful reply names no filters.
pub const NO_FILTERS_MESSAGE: &str = "No filters were identified in the query.";

/// Error used when every filter referenced an unknown column.
pub const UNMAPPED_COLUMNS_MESSAGE: &str =
    "Could not map query to any table columns. Please try different terms.";

/// System message for vendors that take one separately
pub const SYSTEM_PROMPT: &str = "You help convert natural language table filter queries into structured filter objects. Respond only with valid JSON.";

/// Worked examples anchoring the output format - rendered once
static EXAMPLES: Lazy<String> = Lazy::new(|| {
    let examples = [
        (
            "Jeans and shirts more than 500",
            json!({
                "success": true,
                "filters": [
                    { "id": "category", "operator": "in", "value": ["Jeans", "Shirts"] },
                    { "id": "price", "operator": ">", "value": 500 }
                ],
                "explanation": "Filtered for product categories 'Jeans' and 'Shirts' with a minimum price of 500."
            }),
        ),
        (
            "active items",
            json!({
                "success": true,
                "filters": [
                    { "id": "status", "operator": "equals", "value": "Active" }
                ],
                "explanation": "Filtered for items with 'Active' status."
            }),
        ),
        (
            "ID starting with P",
            json!({
                "success": true,
                "filters": [
                    { "id": "id", "operator": "startsWith", "value": "P" }
                ],
                "explanation": "Filtered for product IDs starting with 'P'."
            }),
        ),
    ];

    let mut output = String::new();
    for (query, expected) in examples {
        output.push_str(&format!("\nQuery: \"{}\"\n{}\n", query, pretty(&expected)));
    }
    output
});

/// Operator list as it appears in the response format section
static OPERATOR_LIST: Lazy<String> = Lazy::new(|| {
    Operator::ALL
        .iter()
        .map(|op| format!("\"{}\"", op.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
});

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

/// Build the instruction sent to the model
///
/// Deterministic: identical inputs always give identical text.
pub fn build_prompt(
    query: &str,
    columns: &[ColumnMetadata],
    current_filters: &[FilterCondition],
) -> String {
    let quoted_query = serde_json::to_string(query).unwrap_or_else(|_| format!("\"{}\"", query));

    format!(
        r#"You are an AI assistant that converts natural language table filter queries into structured filters.

TABLE STRUCTURE:
{columns}

CURRENT FILTERS:
{current}

USER QUERY: {query}

TASK:
Analyze the query and convert it to appropriate filter operations based on the table structure.

Identify which columns are being referenced and what filter values should be applied.
Handle column references even if they are indirect or use synonyms.
Decide whether the query refines the current filters or replaces them.

RESPONSE FORMAT:
Return a JSON object with these fields:
- success: true if you were able to parse the query, false otherwise
- filters: array of filter objects, each with:
  - id: the column id to filter
  - operator: one of {operators}
  - value: the value to filter by (appropriate for the filter type; a two-element array for "between", an array for "in")
- explanation: brief explanation of how you interpreted the query
- error: error message if parsing failed

Example queries and expected outputs:
{examples}"#,
        columns = pretty(columns),
        current = pretty(current_filters),
        query = quoted_query,
        operators = OPERATOR_LIST.as_str(),
        examples = EXAMPLES.as_str(),
    )
}

/// Find the first balanced `{...}` span in `text`
///
/// Braces inside JSON strings are ignored. Returns `None` when no opening
/// brace is ever closed.
pub fn extract_json(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();

    for (start, _) in text.match_indices('{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &byte) in bytes[start..].iter().enumerate() {
            if in_string {
                match byte {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match byte {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..=start + offset]);
                    }
                }
                _ => {}
            }
        }
    }

    None
}

/// Decode a model's text reply into an untrusted result
///
/// Tolerates prose around the JSON object.
pub fn parse_reply(content: &str) -> Result<RawParseResult> {
    let candidate = extract_json(content).unwrap_or(content);
    serde_json::from_str(candidate).map_err(|e| FilterError::MalformedResponse {
        detail: format!("{} in reply: {}", e, content),
    })
}

/// Decode every entry that is a well-formed filter object
fn decode_filters(items: &[Value]) -> Vec<FilterCondition> {
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<FilterCondition>(item.clone()) {
            Ok(filter) => Some(filter),
            Err(e) => {
                debug!(entry = %item, error = %e, "dropping undecodable filter");
                None
            }
        })
        .collect()
}

/// Check a provider reply against the table's columns
///
/// 1. failures pass through;
/// 2. a success without filters becomes a failure;
/// 3. filters on unknown columns, undecodable entries and values whose
///    shape contradicts the operator are dropped;
/// 4. nothing left means failure;
/// 5. otherwise success with the surviving filters, in order.
pub fn validate_parse_result(raw: RawParseResult, columns: &[ColumnMetadata]) -> ParseResult {
    if !raw.success {
        let filters = match &raw.filters {
            Some(Value::Array(items)) => decode_filters(items),
            _ => Vec::new(),
        };
        return ParseResult {
            success: false,
            filters,
            explanation: raw.explanation,
            error: raw.error,
        };
    }

    let items = match &raw.filters {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => return ParseResult::failure(NO_FILTERS_MESSAGE),
    };

    let known: HashSet<&str> = columns
        .iter()
        .map(|c| c.id.as_str())
        .filter(|id| !id.is_empty())
        .collect();

    let valid: Vec<FilterCondition> = decode_filters(items)
        .into_iter()
        .filter(|filter| {
            if !known.contains(filter.id.as_str()) {
                debug!(column = %filter.id, "dropping filter on unknown column");
                return false;
            }
            if !filter.has_consistent_value() {
                debug!(
                    column = %filter.id,
                    operator = %filter.operator,
                    value = %filter.value,
                    "dropping filter with inconsistent value"
                );
                return false;
            }
            let column = columns.iter().find(|c| c.id == filter.id);
            if let Some(column) = column.filter(|c| !c.filter_type.supports(filter.operator)) {
                debug!(
                    column = %filter.id,
                    operator = %filter.operator,
                    filter_type = %column.filter_type,
                    "operator unusual for column type"
                );
            }
            true
        })
        .collect();

    if valid.is_empty() {
        return ParseResult::failure(UNMAPPED_COLUMNS_MESSAGE);
    }

    ParseResult {
        success: true,
        filters: valid,
        explanation: raw.explanation,
        error: raw.error,
    }
}

/// Validate an already typed result (idempotent)
pub fn validate(result: ParseResult, columns: &[ColumnMetadata]) -> ParseResult {
    validate_parse_result(result.into(), columns)
}

/// Extract, decode and validate a model reply in one step
///
/// Malformed text becomes a failed result with the fixed user-facing
/// message; the parse diagnostic is only logged.
pub fn interpret_reply(content: &str, columns: &[ColumnMetadata]) -> ParseResult {
    match parse_reply(content) {
        Ok(raw) => validate_parse_result(raw, columns),
        Err(err) => {
            if let FilterError::MalformedResponse { detail } = &err {
                warn!(%detail, "failed to parse LLM response");
            }
            ParseResult::from_error(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MALFORMED_RESPONSE_MESSAGE;
    use crate::types::FilterType;
    use pretty_assertions::assert_eq;

    fn columns() -> Vec<ColumnMetadata> {
        vec![
            ColumnMetadata::new("category", FilterType::Multi).with_values(["Jeans", "Shirts"]),
            ColumnMetadata::new("price", FilterType::Range),
        ]
    }

    fn raw(value: Value) -> RawParseResult {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_prompt_contains_sections() {
        let current = vec![FilterCondition::new("price", Operator::Lt, 100)];
        let prompt = build_prompt("Jeans over $50", &columns(), &current);

        assert!(prompt.contains("TABLE STRUCTURE"));
        assert!(prompt.contains("\"filterType\": \"multi\""));
        assert!(prompt.contains("CURRENT FILTERS"));
        assert!(prompt.contains("\"operator\": \"<\""));
        assert!(prompt.contains("USER QUERY: \"Jeans over $50\""));
        assert!(prompt.contains("\"startsWith\""));
        assert!(prompt.contains("\"in\""));
        assert!(prompt.contains("Query: \"active items\""));
        assert!(prompt.contains("Query: \"ID starting with P\""));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let a = build_prompt("shirts", &columns(), &[]);
        let b = build_prompt("shirts", &columns(), &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_prompt_escapes_query_quotes() {
        let prompt = build_prompt(r#"name is "Bob""#, &columns(), &[]);
        assert!(prompt.contains(r#"USER QUERY: "name is \"Bob\"""#));
    }

    #[test]
    fn test_extract_json_with_prose() {
        let text = r#"Here is the result: {"success":true,"filters":[{"id":"price","operator":">","value":5}]} Hope that helps!"#;
        assert_eq!(
            extract_json(text),
            Some(r#"{"success":true,"filters":[{"id":"price","operator":">","value":5}]}"#)
        );
    }

    #[test]
    fn test_extract_json_first_balanced_span() {
        let text = r#"{"a": 1} and later {"b": 2}"#;
        assert_eq!(extract_json(text), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn test_extract_json_ignores_braces_in_strings() {
        let text = r#"ok {"explanation": "uses } and { inside", "success": false} done"#;
        assert_eq!(
            extract_json(text),
            Some(r#"{"explanation": "uses } and { inside", "success": false}"#)
        );
    }

    #[test]
    fn test_extract_json_unbalanced() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("{\"success\": true"), None);
        assert_eq!(extract_json("{ {\"a\":1}"), Some("{\"a\":1}"));
    }

    #[test]
    fn test_parse_reply_malformed() {
        let err = parse_reply("I could not do that").unwrap_err();
        assert_eq!(err.to_string(), MALFORMED_RESPONSE_MESSAGE);

        let result = interpret_reply("{not json}", &columns());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(MALFORMED_RESPONSE_MESSAGE));
    }

    #[test]
    fn test_unknown_column_stripped() {
        let result = validate_parse_result(
            raw(json!({
                "success": true,
                "filters": [
                    {"id": "price", "operator": ">", "value": 500},
                    {"id": "ghost", "operator": "equals", "value": "boo"}
                ],
                "explanation": "price over 500"
            })),
            &columns(),
        );
        assert!(result.success);
        assert_eq!(result.filters, vec![FilterCondition::new("price", Operator::Gt, 500)]);
        assert_eq!(result.explanation.as_deref(), Some("price over 500"));
    }

    #[test]
    fn test_all_unknown_is_failure() {
        let result = validate_parse_result(
            raw(json!({
                "success": true,
                "filters": [{"id": "ghost", "operator": "equals", "value": "boo"}]
            })),
            &columns(),
        );
        assert!(!result.success);
        assert!(result.filters.is_empty());
        assert_eq!(result.error.as_deref(), Some(UNMAPPED_COLUMNS_MESSAGE));
    }

    #[test]
    fn test_success_without_filters() {
        for value in [
            json!({"success": true}),
            json!({"success": true, "filters": []}),
            json!({"success": true, "filters": {"id": "price"}}),
        ] {
            let result = validate_parse_result(raw(value), &columns());
            assert!(!result.success);
            assert_eq!(result.error.as_deref(), Some(NO_FILTERS_MESSAGE));
        }
    }

    #[test]
    fn test_failure_passes_through() {
        let result = validate_parse_result(
            raw(json!({"success": false, "filters": [], "error": "Query is about weather"})),
            &columns(),
        );
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Query is about weather"));
    }

    #[test]
    fn test_inconsistent_values_dropped() {
        let result = validate_parse_result(
            raw(json!({
                "success": true,
                "filters": [
                    {"id": "price", "operator": "between", "value": [10]},
                    {"id": "price", "operator": "like", "value": "x"},
                    {"id": "category", "operator": "in", "value": ["Jeans"]}
                ]
            })),
            &columns(),
        );
        assert!(result.success);
        assert_eq!(result.filters.len(), 1);
        assert_eq!(result.filters[0].id, "category");
    }

    #[test]
    fn test_validation_is_idempotent() {
        let cases = [
            json!({"success": true, "filters": [
                {"id": "price", "operator": ">", "value": 1},
                {"id": "ghost", "operator": ">", "value": 1}
            ], "explanation": "x"}),
            json!({"success": true, "filters": [{"id": "ghost", "operator": ">", "value": 1}]}),
            json!({"success": true}),
            json!({"success": false, "error": "nope"}),
        ];
        for case in cases {
            let once = validate_parse_result(raw(case), &columns());
            let twice = validate(once.clone(), &columns());
            assert_eq!(once, twice);
        }
    }
}
