//! Boundary with the table-rendering layer
//!
//! An adapter exposes a table's columns to the pipeline and applies the
//! resulting filters in whatever form the table library uses natively.

use crate::types::{ColumnMetadata, FilterCondition};

/// Table library integration
///
/// `Filters` is the library's native filter state.
pub trait TableAdapter {
    type Filters;

    /// Filterable columns of the table
    fn column_metadata(&self) -> Vec<ColumnMetadata>;

    /// Current native filter state
    fn filters(&self) -> Self::Filters;

    /// Replace the table's column filters
    fn apply_filters(&mut self, filters: Self::Filters);

    /// Whether [`apply_global_filter`](Self::apply_global_filter) does anything
    fn supports_global_filter(&self) -> bool {
        false
    }

    /// Filter every column by a plain substring (optional capability)
    fn apply_global_filter(&mut self, _query: &str) {}

    /// Remove column and global filters
    fn clear_filters(&mut self);

    /// Turn generic conditions into native filter state
    fn convert_to_library_filters(&self, conditions: &[FilterCondition]) -> Self::Filters;
}
