//! Schema probing.
//!
//! Two distinct responsibilities live here: deriving the logical type each
//! column is expected to hold from the catalog's `Type*` rules (an advisory
//! hand-off for external loaders, see [`extract_column_types`]), and
//! introspecting the columns actually present in a loaded table at runtime
//! (`TableColumns`, populated by the engine adapter from
//! `information_schema.columns`).

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::catalog::{Requirement, Rule};

/// The logical type a column is declared to hold, per the catalog's `Type*`
/// rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogicalType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "float64")]
    Decimal,
    #[serde(rename = "datetime-utc")]
    DateTime
}

/// Column name → declared logical type, derived once per catalog. This is
/// advisory only: the engine itself never skips a rule because of it, it
/// exists purely as a hand-off for external loaders that need to coerce
/// input data before it reaches the table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ColumnTypeMap(pub IndexMap<String, LogicalType>);

impl ColumnTypeMap {
    pub fn get(&self, column: &str) -> Option<LogicalType> {
        self.0.get(column).copied()
    }
}

/// Walk every rule in the working set and record the logical type implied
/// by `TypeString`/`TypeDecimal`/`TypeDateTime` requirements. Later rules
/// win if two rules disagree on the same column.
pub fn extract_column_types(rules: &IndexMap<String, Rule>) -> ColumnTypeMap {
    let mut map = IndexMap::new();

    for rule in rules.values() {
        let (column, logical_type) = match &rule.validation_criteria.requirement {
            Requirement::TypeString { column_name } => (column_name, LogicalType::String),
            Requirement::TypeDecimal { column_name } => (column_name, LogicalType::Decimal),
            Requirement::TypeDateTime { column_name } => (column_name, LogicalType::DateTime),
            _ => continue
        };
        map.insert(column.clone(), logical_type);
    }

    ColumnTypeMap(map)
}

/// The set of column names actually present in the loaded table, as probed
/// via `information_schema.columns` by the engine adapter.
#[derive(Debug, Clone, Default)]
pub struct TableColumns(pub IndexSet<String>);

impl TableColumns {
    pub fn contains(&self, column: &str) -> bool {
        self.0.contains(column)
    }
}
