//! Rule catalog loading.
//!
//! A catalog document describes every conformance rule known to the engine,
//! grouped into datasets, plus the applicability tags and check-function
//! descriptions carried through for reporters. This module turns the raw
//! document into typed, validated [`Rule`] records; it never touches the
//! filesystem itself, that is [`RuleSource`]'s job.

use std::{collections::HashMap, fs, path::Path};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, catalog_error};

/// Keyword strength attached to a rule's validation criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Keyword {
    Must,
    #[serde(rename = "MUST NOT")]
    MustNot,
    Should,
    #[serde(rename = "SHOULD NOT")]
    ShouldNot,
    Recommended,
    #[serde(rename = "NOT RECOMMENDED")]
    NotRecommended,
    May,
    Optional
}

impl Keyword {
    /// Keywords that never fail a run outright; their check still executes.
    pub fn is_optional(self) -> bool {
        matches!(self, Keyword::May | Keyword::Optional)
    }
}

/// What a rule's `reference` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    Dataset,
    Column,
    Attribute
}

/// A single requirement or condition clause. Tagged on `CheckFunction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "CheckFunction")]
pub enum Requirement {
    CheckValue {
        #[serde(rename = "ColumnName")]
        column_name: String,
        #[serde(rename = "Value")]
        value:       Option<serde_json::Value>
    },
    CheckNotValue {
        #[serde(rename = "ColumnName")]
        column_name: String,
        #[serde(rename = "Value")]
        value:       Option<serde_json::Value>
    },
    CheckSameValue {
        #[serde(rename = "ColumnAName")]
        column_a_name: String,
        #[serde(rename = "ColumnBName")]
        column_b_name: String
    },
    CheckNotSameValue {
        #[serde(rename = "ColumnAName")]
        column_a_name: String,
        #[serde(rename = "ColumnBName")]
        column_b_name: String
    },
    CheckGreaterOrEqualThanValue {
        #[serde(rename = "ColumnName")]
        column_name: String,
        #[serde(rename = "Value")]
        value:       serde_json::Value
    },
    CheckValueIn {
        #[serde(rename = "ColumnName")]
        column_name: String,
        #[serde(rename = "Values")]
        values:      Vec<serde_json::Value>
    },
    ColumnPresent {
        #[serde(rename = "ColumnName")]
        column_name: String
    },
    ColumnByColumnEqualsColumnValue {
        #[serde(rename = "ResultColumnName")]
        result_column_name: String,
        #[serde(rename = "ColumnAName")]
        column_a_name:      String,
        #[serde(rename = "ColumnBName")]
        column_b_name:      String
    },
    CheckDistinctCount {
        #[serde(rename = "ColumnAName")]
        column_a_name:  String,
        #[serde(rename = "ColumnBName")]
        column_b_name:  String,
        #[serde(rename = "ExpectedCount")]
        expected_count: i64
    },
    TypeString {
        #[serde(rename = "ColumnName")]
        column_name: String
    },
    TypeDecimal {
        #[serde(rename = "ColumnName")]
        column_name: String
    },
    TypeDateTime {
        #[serde(rename = "ColumnName")]
        column_name: String
    },
    FormatNumeric {
        #[serde(rename = "ColumnName")]
        column_name: String
    },
    FormatDateTime {
        #[serde(rename = "ColumnName")]
        column_name: String
    },
    FormatString {
        #[serde(rename = "ColumnName")]
        column_name: String
    },
    FormatUnit {
        #[serde(rename = "ColumnName")]
        column_name: String
    },
    FormatKeyValue {
        #[serde(rename = "ColumnName")]
        column_name: String
    },
    FormatBillingCurrencyCode {
        #[serde(rename = "ColumnName")]
        column_name: String
    },
    CheckNationalCurrency {
        #[serde(rename = "ColumnName")]
        column_name: String
    },
    #[serde(rename = "AND")]
    And {
        #[serde(rename = "Items")]
        items: Vec<Requirement>
    },
    #[serde(rename = "OR")]
    Or {
        #[serde(rename = "Items")]
        items: Vec<Requirement>
    },
    CheckConformanceRule {
        #[serde(rename = "ConformanceRuleId")]
        conformance_rule_id: String
    }
}

impl Requirement {
    /// Human-readable check-function name, used in verdict `check_type`.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Requirement::CheckValue { .. } => "CheckValue",
            Requirement::CheckNotValue { .. } => "CheckNotValue",
            Requirement::CheckSameValue { .. } => "CheckSameValue",
            Requirement::CheckNotSameValue { .. } => "CheckNotSameValue",
            Requirement::CheckGreaterOrEqualThanValue { .. } => "CheckGreaterOrEqualThanValue",
            Requirement::CheckValueIn { .. } => "CheckValueIn",
            Requirement::ColumnPresent { .. } => "ColumnPresent",
            Requirement::ColumnByColumnEqualsColumnValue { .. } => {
                "ColumnByColumnEqualsColumnValue"
            }
            Requirement::CheckDistinctCount { .. } => "CheckDistinctCount",
            Requirement::TypeString { .. } => "TypeString",
            Requirement::TypeDecimal { .. } => "TypeDecimal",
            Requirement::TypeDateTime { .. } => "TypeDateTime",
            Requirement::FormatNumeric { .. } => "FormatNumeric",
            Requirement::FormatDateTime { .. } => "FormatDateTime",
            Requirement::FormatString { .. } => "FormatString",
            Requirement::FormatUnit { .. } => "FormatUnit",
            Requirement::FormatKeyValue { .. } => "FormatKeyValue",
            Requirement::FormatBillingCurrencyCode { .. } => "FormatBillingCurrencyCode",
            Requirement::CheckNationalCurrency { .. } => "CheckNationalCurrency",
            Requirement::And { .. } => "AND",
            Requirement::Or { .. } => "OR",
            Requirement::CheckConformanceRule { .. } => "CheckConformanceRule"
        }
    }

    /// `CheckConformanceRule` ids referenced directly by this requirement
    /// (one level, not recursive into nested AND/OR items' own children).
    pub fn referenced_rule_ids(&self) -> Vec<&str> {
        match self {
            Requirement::And { items } | Requirement::Or { items } => items
                .iter()
                .filter_map(|item| match item {
                    Requirement::CheckConformanceRule {
                        conformance_rule_id
                    } => Some(conformance_rule_id.as_str()),
                    _ => None
                })
                .collect(),
            Requirement::CheckConformanceRule {
                conformance_rule_id
            } => vec![conformance_rule_id.as_str()],
            _ => Vec::new()
        }
    }
}

/// Validation criteria block of a rule document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCriteria {
    #[serde(rename = "MustSatisfy")]
    pub must_satisfy: String,
    #[serde(rename = "Keyword")]
    pub keyword:      Keyword,
    #[serde(rename = "Requirement")]
    pub requirement:  Requirement,
    #[serde(rename = "Condition", default)]
    pub condition:    Option<Requirement>,
    #[serde(rename = "Dependencies", default)]
    pub dependencies: IndexSet<String>
}

/// A single conformance rule, as declared in the catalog document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(skip)]
    pub rule_id: String,
    #[serde(rename = "Function")]
    pub function: String,
    #[serde(rename = "Reference")]
    pub reference: String,
    #[serde(rename = "EntityType")]
    pub entity_type: EntityType,
    #[serde(rename = "Status", default = "default_status")]
    pub status: String,
    #[serde(rename = "Type", default = "default_rule_type")]
    pub rule_type: String,
    #[serde(rename = "ApplicabilityCriteria", default)]
    pub applicability_criteria: IndexSet<String>,
    #[serde(rename = "ValidationCriteria")]
    pub validation_criteria: ValidationCriteria,
    #[serde(rename = "Notes", default)]
    pub notes: Option<String>,
    /// Set exactly once, by the resolver, when an ancestor composite's
    /// condition must gate this rule too. A second attempt is a programming
    /// error (see [`crate::error::PlanError::PreconditionAlreadySet`]).
    #[serde(skip)]
    pub inherited_precondition: Option<Requirement>
}

fn default_status() -> String {
    "Active".to_string()
}

fn default_rule_type() -> String {
    "Static".to_string()
}

impl Rule {
    pub fn is_composite(&self) -> bool {
        self.function == "Composite"
    }

    /// The condition that actually governs execution: the rule's own
    /// condition if present, otherwise one inherited from an ancestor
    /// composite.
    pub fn effective_condition(&self) -> Option<&Requirement> {
        self.validation_criteria
            .condition
            .as_ref()
            .or(self.inherited_precondition.as_ref())
    }

    /// Set the inherited precondition, failing if it was already set by an
    /// earlier pass over the catalog.
    pub fn set_inherited_precondition(&mut self, condition: Requirement) -> AppResult<()> {
        if self.inherited_precondition.is_some() {
            return Err(catalog_error(format!(
                "rule '{}' already has an inherited precondition",
                self.rule_id
            )));
        }
        self.inherited_precondition = Some(condition);
        Ok(())
    }
}

/// A dataset entry: the ordered list of rules that apply to it.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetEntry {
    #[serde(rename = "ConformanceRules")]
    pub conformance_rules: Vec<String>
}

/// The parsed, validated catalog: every rule, keyed by id, plus the dataset
/// and applicability-tag tables carried through for reporters.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub rules:                 IndexMap<String, Rule>,
    pub datasets:               IndexMap<String, DatasetEntry>,
    pub applicability_criteria: IndexMap<String, String>,
    pub check_functions:        HashMap<String, serde_json::Value>
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(rename = "ConformanceDatasets", default)]
    conformance_datasets: IndexMap<String, DatasetEntry>,
    #[serde(rename = "ConformanceRules", default)]
    conformance_rules:    IndexMap<String, Rule>,
    #[serde(rename = "CheckFunctions", default)]
    check_functions:      HashMap<String, serde_json::Value>,
    #[serde(rename = "ApplicabilityCriteria", default)]
    applicability_criteria: IndexMap<String, String>
}

impl Catalog {
    /// Parse a catalog from an already-loaded JSON document.
    pub fn from_json(value: serde_json::Value) -> AppResult<Self> {
        let raw: RawCatalog = serde_json::from_value(value)
            .map_err(|e| catalog_error(format!("invalid catalog document: {e}")))?;

        let mut rules = IndexMap::with_capacity(raw.conformance_rules.len());
        for (rule_id, mut rule) in raw.conformance_rules {
            rule.rule_id = rule_id.clone();
            rules.insert(rule_id, rule);
        }

        let catalog = Catalog {
            rules,
            datasets: raw.conformance_datasets,
            applicability_criteria: raw.applicability_criteria,
            check_functions: raw.check_functions
        };

        catalog.validate()?;
        Ok(catalog)
    }

    /// Load a catalog from a [`RuleSource`].
    pub fn load(source: &dyn RuleSource) -> AppResult<Self> {
        Self::from_json(source.load()?)
    }

    fn validate(&self) -> AppResult<()> {
        for (dataset_name, entry) in &self.datasets {
            for rule_id in &entry.conformance_rules {
                if !self.rules.contains_key(rule_id) {
                    return Err(catalog_error(format!(
                        "dataset '{dataset_name}' names unknown rule '{rule_id}'"
                    )));
                }
            }
        }

        for (rule_id, rule) in &self.rules {
            for dep in &rule.validation_criteria.dependencies {
                if !self.rules.contains_key(dep) {
                    return Err(catalog_error(format!(
                        "rule '{rule_id}' depends on unknown rule '{dep}'"
                    )));
                }
            }
            if rule.is_composite() {
                for referenced in rule.validation_criteria.requirement.referenced_rule_ids() {
                    if !self.rules.contains_key(referenced) {
                        return Err(catalog_error(format!(
                            "composite rule '{rule_id}' references unknown rule '{referenced}'"
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn dataset(&self, name: &str) -> AppResult<&DatasetEntry> {
        self.datasets
            .get(name)
            .ok_or_else(|| catalog_error(format!("unknown dataset '{name}'")))
    }
}

/// Where catalog bytes come from. Keeps file I/O at the edge, the way the
/// teacher isolates `read_to_string` calls in its CLI layer rather than
/// inside the parsing logic itself.
pub trait RuleSource {
    fn load(&self) -> AppResult<serde_json::Value>;
}

/// Read a catalog document from a local JSON file.
pub struct FileRuleSource {
    pub path: std::path::PathBuf
}

impl FileRuleSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf()
        }
    }
}

impl RuleSource for FileRuleSource {
    fn load(&self) -> AppResult<serde_json::Value> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            catalog_error(format!(
                "failed to read catalog '{}': {e}",
                self.path.display()
            ))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| catalog_error(format!("catalog is not valid JSON: {e}")))
    }
}

/// Hold an already-parsed document in memory, useful for tests and for
/// embedding a catalog at compile time.
pub struct InMemoryRuleSource {
    pub document: serde_json::Value
}

impl RuleSource for InMemoryRuleSource {
    fn load(&self) -> AppResult<serde_json::Value> {
        Ok(self.document.clone())
    }
}

/// Placeholder for fetching a catalog from a remote registry (e.g. a
/// versioned GitHub release). Downloading rule catalogs is out of scope for
/// this engine; this variant exists only to keep the `RuleSource` interface
/// complete for callers that want to plug in their own fetch logic.
pub struct RemoteRuleSource {
    pub url: String
}

impl RuleSource for RemoteRuleSource {
    fn load(&self) -> AppResult<serde_json::Value> {
        Err(catalog_error(format!(
            "remote catalog fetching is not supported by this engine (requested '{}')",
            self.url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_document() -> serde_json::Value {
        serde_json::json!({
            "ConformanceDatasets": {
                "BillingAccount": { "ConformanceRules": ["Rule-001-M"] }
            },
            "ConformanceRules": {
                "Rule-001-M": {
                    "Function": "Presence",
                    "Reference": "BilledCost",
                    "EntityType": "Column",
                    "ValidationCriteria": {
                        "MustSatisfy": "BilledCost must be present",
                        "Keyword": "MUST",
                        "Requirement": { "CheckFunction": "ColumnPresent", "ColumnName": "BilledCost" }
                    }
                }
            }
        })
    }

    #[test]
    fn loads_minimal_catalog() {
        let catalog = Catalog::from_json(minimal_document()).unwrap();
        assert_eq!(catalog.rules.len(), 1);
        assert!(catalog.rules.contains_key("Rule-001-M"));
        assert_eq!(catalog.rules["Rule-001-M"].rule_id, "Rule-001-M");
    }

    #[test]
    fn rejects_dataset_naming_unknown_rule() {
        let mut doc = minimal_document();
        doc["ConformanceDatasets"]["BillingAccount"]["ConformanceRules"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!("Rule-999-M"));
        assert!(Catalog::from_json(doc).is_err());
    }

    #[test]
    fn rejects_dependency_on_unknown_rule() {
        let mut doc = minimal_document();
        doc["ConformanceRules"]["Rule-001-M"]["ValidationCriteria"]["Dependencies"] =
            serde_json::json!(["Rule-404-M"]);
        assert!(Catalog::from_json(doc).is_err());
    }
}
