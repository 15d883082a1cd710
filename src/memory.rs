//! In-memory table adapter
//!
//! Holds rows as JSON objects and evaluates filters itself. The CLI uses it
//! to filter JSON files; it also serves as the reference implementation of
//! [`TableAdapter`].

use crate::adapter::TableAdapter;
use crate::types::{ColumnMetadata, FilterCondition, FilterType, Operator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::debug;

/// One table row
pub type Row = Map<String, Value>;

/// Columns with at most this many distinct strings are treated as categorical.
const MAX_CANDIDATE_VALUES: usize = 20;

/// How a text filter matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMatch {
    Contains,
    Prefix,
    Exact,
}

/// Native filter value, shaped by the column's filter type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ColumnFilterValue {
    Text {
        needle: String,
        mode: TextMatch,
    },
    Range {
        min: Option<f64>,
        max: Option<f64>,
        min_inclusive: bool,
        max_inclusive: bool,
    },
    Equals {
        value: Value,
    },
    AnyOf {
        values: Vec<Value>,
    },
}

/// Native filter on one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub id: String,
    pub value: ColumnFilterValue,
}

/// Table over JSON rows
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    columns: Vec<ColumnMetadata>,
    rows: Vec<Row>,
    column_filters: Vec<ColumnFilter>,
    global_filter: Option<String>,
}

impl MemoryTable {
    pub fn new(columns: Vec<ColumnMetadata>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            column_filters: Vec::new(),
            global_filter: None,
        }
    }

    /// Build a table whose columns are inferred from the rows
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = infer_columns(&rows);
        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn global_filter(&self) -> Option<&str> {
        self.global_filter.as_deref()
    }

    /// Rows passing every column filter and the global filter
    pub fn visible_rows(&self) -> Vec<&Row> {
        self.rows
            .iter()
            .filter(|row| {
                self.column_filters.iter().all(|f| self.row_matches(row, f))
                    && self
                        .global_filter
                        .as_deref()
                        .is_none_or(|q| row_contains(row, q))
            })
            .collect()
    }

    fn column(&self, id: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.id == id)
    }

    fn row_matches(&self, row: &Row, filter: &ColumnFilter) -> bool {
        let key = self.column(&filter.id).map_or(filter.id.as_str(), ColumnMetadata::key);
        let Some(cell) = row.get(key).filter(|v| !v.is_null()) else {
            return false;
        };

        match &filter.value {
            ColumnFilterValue::Text { needle, mode } => {
                let text = cell_text(cell).to_lowercase();
                let needle = needle.to_lowercase();
                match mode {
                    TextMatch::Contains => text.contains(&needle),
                    TextMatch::Prefix => text.starts_with(&needle),
                    TextMatch::Exact => text == needle,
                }
            }
            ColumnFilterValue::Range {
                min,
                max,
                min_inclusive,
                max_inclusive,
            } => {
                let Some(n) = as_number(cell) else {
                    return false;
                };
                let above = min.is_none_or(|m| if *min_inclusive { n >= m } else { n > m });
                let below = max.is_none_or(|m| if *max_inclusive { n <= m } else { n < m });
                above && below
            }
            ColumnFilterValue::Equals { value } => loose_eq(cell, value),
            ColumnFilterValue::AnyOf { values } => values.iter().any(|v| loose_eq(cell, v)),
        }
    }

    fn convert(&self, condition: &FilterCondition) -> Option<ColumnFilter> {
        let column = self.column(&condition.id)?;
        let value = &condition.value;

        let bound = |min: Option<f64>, max: Option<f64>, inclusive: bool| ColumnFilterValue::Range {
            min,
            max,
            min_inclusive: inclusive,
            max_inclusive: inclusive,
        };

        let native = match condition.operator {
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                let n = as_number(value)?;
                let inclusive = matches!(condition.operator, Operator::Gte | Operator::Lte);
                if matches!(condition.operator, Operator::Gt | Operator::Gte) {
                    bound(Some(n), None, inclusive)
                } else {
                    bound(None, Some(n), inclusive)
                }
            }
            Operator::Between => {
                let items = value.as_array()?;
                let (low, high) = (as_number(items.first()?)?, as_number(items.get(1)?)?);
                bound(Some(low.min(high)), Some(low.max(high)), true)
            }
            Operator::In => ColumnFilterValue::AnyOf {
                values: as_list(value),
            },
            Operator::Equals if column.filter_type == FilterType::Multi => {
                ColumnFilterValue::AnyOf {
                    values: as_list(value),
                }
            }
            Operator::Equals if column.filter_type == FilterType::Text => ColumnFilterValue::Text {
                needle: cell_text(value),
                mode: TextMatch::Exact,
            },
            Operator::Equals => ColumnFilterValue::Equals {
                value: value.clone(),
            },
            Operator::Contains if column.filter_type == FilterType::Multi => {
                ColumnFilterValue::AnyOf {
                    values: as_list(value),
                }
            }
            Operator::Contains => ColumnFilterValue::Text {
                needle: cell_text(value),
                mode: TextMatch::Contains,
            },
            Operator::StartsWith => ColumnFilterValue::Text {
                needle: cell_text(value),
                mode: TextMatch::Prefix,
            },
        };

        Some(ColumnFilter {
            id: condition.id.clone(),
            value: native,
        })
    }
}

impl TableAdapter for MemoryTable {
    type Filters = Vec<ColumnFilter>;

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        self.columns.clone()
    }

    fn filters(&self) -> Vec<ColumnFilter> {
        self.column_filters.clone()
    }

    fn apply_filters(&mut self, filters: Vec<ColumnFilter>) {
        self.column_filters = filters;
    }

    fn supports_global_filter(&self) -> bool {
        true
    }

    fn apply_global_filter(&mut self, query: &str) {
        self.global_filter = Some(query.trim().to_string()).filter(|q| !q.is_empty());
    }

    fn clear_filters(&mut self) {
        self.column_filters.clear();
        self.global_filter = None;
    }

    fn convert_to_library_filters(&self, conditions: &[FilterCondition]) -> Vec<ColumnFilter> {
        conditions
            .iter()
            .filter_map(|c| {
                let converted = self.convert(c);
                if converted.is_none() {
                    debug!(column = %c.id, operator = %c.operator, "skipping unconvertible filter");
                }
                converted
            })
            .collect()
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn loose_eq(cell: &Value, expected: &Value) -> bool {
    match (as_number(cell), as_number(expected)) {
        (Some(a), Some(b)) if cell.is_number() || expected.is_number() => a == b,
        _ => cell_text(cell).eq_ignore_ascii_case(&cell_text(expected)),
    }
}

fn row_contains(row: &Row, query: &str) -> bool {
    let needle = query.to_lowercase();
    row.values()
        .filter(|v| !v.is_null())
        .any(|v| cell_text(v).to_lowercase().contains(&needle))
}

/// Infer filterable columns from row contents
///
/// Numbers become ranges, booleans selects, repeated low-cardinality
/// strings multi-selects with their values as candidates, the rest text.
/// Columns keep the order in which their keys first appear.
pub fn infer_columns(rows: &[Row]) -> Vec<ColumnMetadata> {
    let mut keys: Vec<&String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    keys.into_iter()
        .map(|key| {
            let values: Vec<&Value> = rows
                .iter()
                .filter_map(|row| row.get(key))
                .filter(|v| !v.is_null())
                .collect();
            let column = ColumnMetadata::new(key.clone(), FilterType::Text).with_header(key.clone());

            if !values.is_empty() && values.iter().all(|v| v.is_number()) {
                return ColumnMetadata {
                    filter_type: FilterType::Range,
                    ..column
                };
            }
            if !values.is_empty() && values.iter().all(|v| v.is_boolean()) {
                return ColumnMetadata {
                    filter_type: FilterType::Select,
                    ..column
                }
                .with_values([false, true]);
            }

            let distinct: BTreeSet<String> = values.iter().map(|v| cell_text(v)).collect();
            if !distinct.is_empty()
                && distinct.len() <= MAX_CANDIDATE_VALUES
                && distinct.len() < values.len()
            {
                return ColumnMetadata {
                    filter_type: FilterType::Multi,
                    ..column
                }
                .with_values(distinct);
            }
            column
        })
        .collect()
}
