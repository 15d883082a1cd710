//! Core data model
//!
//! Column metadata handed to the pipeline by a table adapter, the filter
//! conditions the LLM produces, and the result of one translation attempt.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// How a column can be filtered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    /// Free text
    Text,
    /// Numeric range
    Range,
    /// Single choice out of the candidate values
    Select,
    /// Any number of the candidate values
    Multi,
}

impl FilterType {
    /// Operators that make sense for this kind of column
    pub fn supports(self, operator: Operator) -> bool {
        use Operator::*;
        match self {
            FilterType::Text => matches!(operator, Contains | Equals | StartsWith | In),
            FilterType::Range => matches!(operator, Equals | Gt | Lt | Gte | Lte | Between),
            FilterType::Select => matches!(operator, Equals | In),
            FilterType::Multi => matches!(operator, In | Equals | Contains),
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterType::Text => "text",
            FilterType::Range => "range",
            FilterType::Select => "select",
            FilterType::Multi => "multi",
        };
        f.write_str(name)
    }
}

/// One filterable column
///
/// Serialized in camelCase because the JSON form is embedded verbatim in the
/// prompt and mirrors what browser-side table libraries expose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    /// Column id, unique within a table
    pub id: String,
    /// Display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Key used to read the column out of a row, when it differs from `id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessor_key: Option<String>,
    pub filter_type: FilterType,
    /// Candidate values for select/multi columns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub possible_values: Vec<Value>,
}

impl ColumnMetadata {
    pub fn new(id: impl Into<String>, filter_type: FilterType) -> Self {
        Self {
            id: id.into(),
            header: None,
            accessor_key: None,
            filter_type,
            possible_values: Vec::new(),
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn with_accessor_key(mut self, key: impl Into<String>) -> Self {
        self.accessor_key = Some(key.into());
        self
    }

    pub fn with_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.possible_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Label shown to users, falling back to the id
    pub fn label(&self) -> &str {
        self.header.as_deref().unwrap_or(&self.id)
    }

    /// Key to read from a row
    pub fn key(&self) -> &str {
        self.accessor_key.as_deref().unwrap_or(&self.id)
    }
}

/// Comparison applied by a filter condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "equals")]
    Equals,
    #[serde(rename = "startsWith")]
    StartsWith,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "in")]
    In,
}

impl Operator {
    pub const ALL: [Operator; 9] = [
        Operator::Contains,
        Operator::Equals,
        Operator::StartsWith,
        Operator::Gt,
        Operator::Lt,
        Operator::Gte,
        Operator::Lte,
        Operator::Between,
        Operator::In,
    ];

    /// Wire spelling, as used in prompts and JSON
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Contains => "contains",
            Operator::Equals => "equals",
            Operator::StartsWith => "startsWith",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Between => "between",
            Operator::In => "in",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One atomic filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Id of the column to filter
    pub id: String,
    pub operator: Operator,
    /// Scalar, `[low, high]` for `between`, or a list for `in`
    pub value: Value,
}

impl FilterCondition {
    pub fn new(id: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            operator,
            value: value.into(),
        }
    }

    /// Whether the value has the shape the operator needs
    pub fn has_consistent_value(&self) -> bool {
        let scalar = |v: &Value| matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_));
        match self.operator {
            Operator::Between => matches!(&self.value, Value::Array(a) if a.len() == 2 && a.iter().all(scalar)),
            Operator::In => match &self.value {
                Value::Array(items) => !items.is_empty() && items.iter().all(scalar),
                other => scalar(other),
            },
            _ => scalar(&self.value),
        }
    }
}

/// Outcome of one translation attempt
///
/// A successful result always carries at least one filter; the validator
/// turns an empty success into a failure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParseResult {
    pub success: bool,
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ParseResult {
    pub fn success(filters: Vec<FilterCondition>, explanation: Option<String>) -> Self {
        Self {
            success: true,
            filters,
            explanation,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            filters: Vec::new(),
            explanation: None,
            error: Some(error.into()),
        }
    }
}

/// A provider reply exactly as decoded from the model's JSON
///
/// Nothing here is trusted: `filters` may be missing, not an array, or hold
/// entries that are not filter objects at all. Only the validator turns this
/// into a [`ParseResult`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawParseResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<ParseResult> for RawParseResult {
    fn from(result: ParseResult) -> Self {
        let filters = result
            .filters
            .into_iter()
            .map(|f| serde_json::to_value(f).unwrap_or(Value::Null))
            .collect();
        Self {
            success: result.success,
            filters: Some(Value::Array(filters)),
            explanation: result.explanation,
            error: result.error,
        }
    }
}
