//! Deterministic rule parser
//!
//! Handles the easy queries without an LLM: candidate values named in the
//! query become membership filters, and comparison phrases ("over 50",
//! "between 10 and 20") become range filters. Use it as a custom parser, or
//! in front of the LLM via `ParseOptions::rules_first`.

use crate::provider::QueryParser;
use crate::types::{ColumnMetadata, FilterCondition, FilterType, Operator, ParseResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};
use std::ops::Range;

/// Error returned when no rule applies.
pub const NO_RULE_MESSAGE: &str = "No rule matched the query.";

const NUM: &str = r"\$?\s*(\d[\d,]*(?:\.\d+)?)";

static BETWEEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\bbetween\s+{NUM}\s+(?:and|to|-)\s+{NUM}")).expect("valid regex")
});

/// Comparison phrases, most specific first ("no more than" before "more than")
static COMPARISONS: Lazy<Vec<(Regex, Operator)>> = Lazy::new(|| {
    [
        (r"at least|no less than|minimum of|min|>=", Operator::Gte),
        (r"at most|no more than|maximum of|max|up to|<=", Operator::Lte),
        (r"over|more than|above|greater than|higher than|>", Operator::Gt),
        (r"under|less than|below|cheaper than|lower than|<", Operator::Lt),
    ]
    .into_iter()
    .map(|(phrases, op)| {
        let pattern = format!(r"(?i)(?:^|[^\w])(?:{phrases})\s*{NUM}");
        (Regex::new(&pattern).expect("valid regex"), op)
    })
    .collect()
});

/// Rule-based [`QueryParser`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleParser;

impl RuleParser {
    pub fn new() -> Self {
        Self
    }

    /// Apply the rules synchronously
    pub fn parse_query(&self, query: &str, columns: &[ColumnMetadata]) -> ParseResult {
        let mut filters = value_filters(query, columns);
        filters.extend(range_filters(query, columns));

        if filters.is_empty() {
            return ParseResult::failure(NO_RULE_MESSAGE);
        }

        let explanation = filters
            .iter()
            .map(|f| format!("{} {} {}", f.id, f.operator, f.value))
            .collect::<Vec<_>>()
            .join("; ");
        ParseResult::success(filters, Some(format!("Matched by rules: {}", explanation)))
    }
}

#[async_trait]
impl QueryParser for RuleParser {
    async fn parse(&self, query: &str, columns: &[ColumnMetadata]) -> ParseResult {
        self.parse_query(query, columns)
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whole-word, case-insensitive match tolerating a plural "s"
fn mentions(query: &str, term: &str) -> bool {
    let term = term.trim();
    if term.is_empty() {
        return false;
    }
    let stem = term.strip_suffix(['s', 'S']).filter(|s| !s.is_empty()).unwrap_or(term);
    let pattern = format!(r"(?i)(?:^|[^\w]){}s?(?:$|[^\w])", regex::escape(stem));
    Regex::new(&pattern).map(|re| re.is_match(query)).unwrap_or(false)
}

fn value_filters(query: &str, columns: &[ColumnMetadata]) -> Vec<FilterCondition> {
    let mut filters = Vec::new();

    for column in columns.iter().filter(|c| c.filter_type != FilterType::Range) {
        let matched: Vec<Value> = column
            .possible_values
            .iter()
            .filter(|v| mentions(query, &value_text(v)))
            .cloned()
            .collect();

        match (column.filter_type, matched.len()) {
            (_, 0) => {}
            (FilterType::Multi, _) => {
                filters.push(FilterCondition::new(&column.id, Operator::In, matched));
            }
            (_, 1) => {
                let value = matched.into_iter().next().unwrap_or(Value::Null);
                filters.push(FilterCondition::new(&column.id, Operator::Equals, value));
            }
            _ => filters.push(FilterCondition::new(&column.id, Operator::In, matched)),
        }
    }

    filters
}

fn number(text: &str) -> Option<Value> {
    let cleaned = text.replace(',', "");
    if let Ok(int) = cleaned.parse::<i64>() {
        return Some(Value::from(int));
    }
    cleaned
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// The range column a comparison applies to
fn range_target<'a>(query: &str, columns: &'a [ColumnMetadata]) -> Option<&'a ColumnMetadata> {
    let ranges: Vec<&ColumnMetadata> = columns
        .iter()
        .filter(|c| c.filter_type == FilterType::Range)
        .collect();

    match ranges.as_slice() {
        [] => None,
        [only] => Some(*only),
        many => many
            .iter()
            .find(|c| mentions(query, &c.id) || c.header.as_deref().is_some_and(|h| mentions(query, h)))
            .copied(),
    }
}

fn overlaps(taken: &[Range<usize>], span: &Range<usize>) -> bool {
    taken.iter().any(|t| t.start < span.end && span.start < t.end)
}

fn range_filters(query: &str, columns: &[ColumnMetadata]) -> Vec<FilterCondition> {
    let Some(column) = range_target(query, columns) else {
        return Vec::new();
    };

    let mut filters = Vec::new();
    let mut taken: Vec<Range<usize>> = Vec::new();

    for caps in BETWEEN.captures_iter(query) {
        let (Some(whole), Some(low), Some(high)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if let (Some(low), Some(high)) = (number(low.as_str()), number(high.as_str())) {
            taken.push(whole.range());
            filters.push(FilterCondition::new(
                &column.id,
                Operator::Between,
                Value::Array(vec![low, high]),
            ));
        }
    }

    for (regex, operator) in COMPARISONS.iter() {
        for caps in regex.captures_iter(query) {
            let (Some(whole), Some(amount)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if overlaps(&taken, &whole.range()) {
                continue;
            }
            if let Some(value) = number(amount.as_str()) {
                taken.push(whole.range());
                filters.push(FilterCondition::new(&column.id, *operator, value));
            }
        }
    }

    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn columns() -> Vec<ColumnMetadata> {
        vec![
            ColumnMetadata::new("category", FilterType::Multi)
                .with_values(["Jeans", "Shirts", "Jackets"]),
            ColumnMetadata::new("status", FilterType::Select).with_values(["Active", "Archived"]),
            ColumnMetadata::new("price", FilterType::Range).with_header("Price"),
        ]
    }

    #[test]
    fn test_categories_and_price() {
        let result = RuleParser::new().parse_query("jeans and shirts over $50", &columns());
        assert!(result.success);
        assert_eq!(
            result.filters,
            vec![
                FilterCondition::new("category", Operator::In, json!(["Jeans", "Shirts"])),
                FilterCondition::new("price", Operator::Gt, 50),
            ]
        );
        assert!(result.explanation.unwrap().starts_with("Matched by rules"));
    }

    #[test]
    fn test_singular_matches_plural_value() {
        let result = RuleParser::new().parse_query("any shirt", &columns());
        assert_eq!(
            result.filters,
            vec![FilterCondition::new("category", Operator::In, json!(["Shirts"]))]
        );
    }

    #[test]
    fn test_select_equals() {
        let result = RuleParser::new().parse_query("active items", &columns());
        assert_eq!(
            result.filters,
            vec![FilterCondition::new("status", Operator::Equals, "Active")]
        );
    }

    #[test]
    fn test_between_wins_over_comparisons() {
        let result = RuleParser::new().parse_query("price between 10 and 1,000", &columns());
        assert_eq!(
            result.filters,
            vec![FilterCondition::new("price", Operator::Between, json!([10, 1000]))]
        );
    }

    #[test]
    fn test_no_more_than_is_lte() {
        let result = RuleParser::new().parse_query("no more than 20.5", &columns());
        assert_eq!(
            result.filters,
            vec![FilterCondition::new("price", Operator::Lte, 20.5)]
        );
    }

    #[test]
    fn test_no_rule() {
        let result = RuleParser::new().parse_query("something vague", &columns());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(NO_RULE_MESSAGE));
    }

    #[test]
    fn test_ambiguous_range_column_needs_mention() {
        let cols = vec![
            ColumnMetadata::new("price", FilterType::Range),
            ColumnMetadata::new("stock", FilterType::Range).with_header("Stock"),
        ];
        let result = RuleParser::new().parse_query("over 5", &cols);
        assert!(!result.success);

        let result = RuleParser::new().parse_query("stock over 5", &cols);
        assert_eq!(result.filters, vec![FilterCondition::new("stock", Operator::Gt, 5)]);
    }

    #[test]
    fn test_words_inside_other_words_ignored() {
        assert!(!mentions("superactive", "Active"));
        assert!(mentions("Active.", "Active"));
    }
}
