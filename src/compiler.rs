//! Check compilation: turning a single rule into either a requirement-mode
//! SQL query, a condition-mode boolean predicate, a schema probe, or a
//! composite reduction over already-computed child verdicts.

use indexmap::IndexSet;
use serde_json::Value;

use crate::{
    catalog::{Requirement, Rule},
    error::CheckCompileError
};

/// AND/OR reduction operator for a composite rule whose items reference
/// other rules by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeOp {
    And,
    Or
}

/// The outcome of compiling one rule.
pub enum CompiledCheck {
    /// A full query; `{table_name}` is the only interpolation point. Binding
    /// it and executing it yields a single row with a `violations` column.
    RequirementSql {
        sql:        String,
        check_type: &'static str
    },
    /// Execute as a schema probe rather than a row query.
    SchemaProbe { column_name: String },
    /// Reduce over the verdicts of the referenced rules; no SQL involved.
    Composite {
        op:              CompositeOp,
        child_rule_ids:  Vec<String>
    },
    /// Gated out before compilation; `ok=true, skipped=true`.
    Skip { reason: String },
    /// Could not be compiled; localizes to this rule's verdict.
    Errored { error: CheckCompileError }
}

/// Compile `rule` against the currently active applicability tags.
pub fn compile_rule(rule: &Rule, active_tags: &IndexSet<String>) -> CompiledCheck {
    if !rule.applicability_criteria.is_empty()
        && !rule.applicability_criteria.iter().any(|tag| active_tags.contains(tag))
    {
        return CompiledCheck::Skip {
            reason: "Rule skipped - not applicable to current dataset or configuration"
                .to_string()
        };
    }

    if rule.validation_criteria.keyword.is_optional() {
        return CompiledCheck::Skip {
            reason: "Rule skipped - keyword is MAY/OPTIONAL".to_string()
        };
    }

    match &rule.validation_criteria.requirement {
        Requirement::And { items } | Requirement::Or { items } => {
            compile_composite(rule, items)
        }
        Requirement::ColumnPresent { column_name } => CompiledCheck::SchemaProbe {
            column_name: column_name.clone()
        },
        Requirement::CheckConformanceRule {
            conformance_rule_id
        } => CompiledCheck::Composite {
            op:             CompositeOp::And,
            child_rule_ids: vec![conformance_rule_id.clone()]
        },
        _ => match compile_requirement_sql(rule) {
            Ok(check) => check,
            Err(error) => CompiledCheck::Errored { error }
        }
    }
}

fn compile_composite(rule: &Rule, items: &[Requirement]) -> CompiledCheck {
    let op = match &rule.validation_criteria.requirement {
        Requirement::And { .. } => CompositeOp::And,
        _ => CompositeOp::Or
    };

    let all_references = items
        .iter()
        .all(|item| matches!(item, Requirement::CheckConformanceRule { .. }));

    if all_references {
        let child_rule_ids = items
            .iter()
            .filter_map(|item| match item {
                Requirement::CheckConformanceRule {
                    conformance_rule_id
                } => Some(conformance_rule_id.clone()),
                _ => None
            })
            .collect();
        return CompiledCheck::Composite {
            op,
            child_rule_ids
        };
    }

    match compile_inline_composite_sql(rule, op, items) {
        Ok(check) => check,
        Err(error) => CompiledCheck::Errored { error }
    }
}

/// Compile an AND/OR composite whose items are inline checks rather than
/// references to other rules, by combining each item's own violation
/// predicate with the boolean dual of the composite operator: a row fails
/// an OR-composite only if it fails every item, and fails an AND-composite
/// if it fails any item.
fn compile_inline_composite_sql(
    rule: &Rule,
    op: CompositeOp,
    items: &[Requirement]
) -> Result<CompiledCheck, CheckCompileError> {
    let mut clauses = Vec::with_capacity(items.len());
    for item in items {
        if matches!(item, Requirement::CheckConformanceRule { .. }) {
            return Err(CheckCompileError::UnknownCheckFunction(
                "CheckConformanceRule cannot be mixed with inline checks in a composite"
                    .to_string()
            ));
        }
        clauses.push(format!("({})", violation_predicate_for(item)?));
    }

    let joiner = match op {
        CompositeOp::Or => " AND ",
        CompositeOp::And => " OR "
    };
    let violation_predicate = clauses.join(joiner);

    let full_predicate = match rule.effective_condition() {
        Some(condition) => {
            let condition_predicate = condition_predicate_for(condition)?;
            format!("({condition_predicate}) AND ({violation_predicate})")
        }
        None => violation_predicate
    };

    let sql = format!(
        "WITH invalid AS (SELECT 1 FROM {{table_name}} WHERE {full_predicate}) SELECT COUNT(*) AS violations FROM invalid"
    );

    Ok(CompiledCheck::RequirementSql {
        sql,
        check_type: rule.validation_criteria.requirement.kind_name()
    })
}

fn compile_requirement_sql(rule: &Rule) -> Result<CompiledCheck, CheckCompileError> {
    let requirement = &rule.validation_criteria.requirement;

    if let Requirement::CheckDistinctCount {
        column_a_name,
        column_b_name,
        expected_count
    } = requirement
    {
        if rule.effective_condition().is_some() {
            return Err(CheckCompileError::ConditionUnsupported {
                rule_id: rule.rule_id.clone()
            });
        }
        let sql = format!(
            "WITH invalid AS (SELECT {a} FROM {{table_name}} GROUP BY {a} HAVING COUNT(DISTINCT {b}) <> {n}) SELECT COUNT(*) AS violations FROM invalid",
            a = column_a_name,
            b = column_b_name,
            n = expected_count
        );
        return Ok(CompiledCheck::RequirementSql {
            sql,
            check_type: "CheckDistinctCount"
        });
    }

    let violation_predicate = violation_predicate_for(requirement)?;

    let full_predicate = match rule.effective_condition() {
        Some(condition) => {
            let condition_predicate = condition_predicate_for(condition)?;
            format!("({condition_predicate}) AND ({violation_predicate})")
        }
        None => violation_predicate
    };

    let sql = format!(
        "WITH invalid AS (SELECT 1 FROM {{table_name}} WHERE {full_predicate}) SELECT COUNT(*) AS violations FROM invalid"
    );

    Ok(CompiledCheck::RequirementSql {
        sql,
        check_type: requirement.kind_name()
    })
}

/// Escape a JSON scalar for inclusion as a SQL literal: a single quote is
/// doubled, never backslash-escaped.
fn sql_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "NULL".to_string(),
        other => format!("'{}'", other.to_string().replace('\'', "''"))
    }
}

const FORMAT_STRING_PATTERN: &str = r"^(x_)?[A-Z][a-zA-Z0-9]*$";
const FORMAT_DATETIME_PATTERN: &str = r"^\d{4}-[01]\d-[0-3]\dT[0-2]\d:[0-5]\d:[0-5]\dZ$";
const FORMAT_NUMERIC_PATTERN: &str = r"^[+-]?([0-9]*[.])?[0-9]+$";
const ISO_DATETIME_STRING_PATTERN: &str = r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z$";
const CURRENCY_CODE_PATTERN: &str = r"^([A-Z]{3}|x_[A-Za-z][A-Za-z0-9]*)$";
const KEY_VALUE_PATTERN: &str = r"^\{.*\}$";

/// The predicate identifying non-conforming rows, for use in requirement
/// mode. Not every kind can also be expressed as a condition-mode
/// predicate; see [`condition_predicate_for`].
fn violation_predicate_for(requirement: &Requirement) -> Result<String, CheckCompileError> {
    let predicate = match requirement {
        Requirement::CheckValue { column_name, value } => match value {
            None | Some(Value::Null) => format!("{column_name} IS NOT NULL"),
            Some(v) => format!("{column_name} != {}", sql_literal(v))
        },
        Requirement::CheckNotValue { column_name, value } => match value {
            None | Some(Value::Null) => format!("{column_name} IS NULL"),
            Some(v) => format!("{column_name} IS NOT NULL AND {column_name} = {}", sql_literal(v))
        },
        Requirement::CheckSameValue {
            column_a_name,
            column_b_name
        } => format!(
            "{column_a_name} IS NULL OR {column_b_name} IS NULL OR {column_a_name} <> {column_b_name}"
        ),
        Requirement::CheckNotSameValue {
            column_a_name,
            column_b_name
        } => format!(
            "{column_a_name} IS NULL OR {column_b_name} IS NULL OR {column_a_name} = {column_b_name}"
        ),
        Requirement::CheckGreaterOrEqualThanValue { column_name, value } => {
            format!("{column_name} < {}", sql_literal(value))
        }
        Requirement::CheckValueIn { column_name, values } => {
            let list = values.iter().map(sql_literal).collect::<Vec<_>>().join(", ");
            format!("{column_name} IS NULL OR {column_name} NOT IN ({list})")
        }
        Requirement::ColumnByColumnEqualsColumnValue {
            result_column_name,
            column_a_name,
            column_b_name
        } => format!(
            "{result_column_name} IS NULL OR {column_a_name} IS NULL OR {column_b_name} IS NULL OR ({column_a_name} * {column_b_name}) <> {result_column_name}"
        ),
        Requirement::TypeDecimal { column_name } => format!(
            "{column_name} IS NOT NULL AND typeof({column_name}) NOT IN ('DECIMAL', 'DOUBLE', 'FLOAT')"
        ),
        Requirement::TypeString { column_name } => {
            format!("{column_name} IS NOT NULL AND typeof({column_name}) <> 'VARCHAR'")
        }
        Requirement::TypeDateTime { column_name } => format!(
            "{column_name} IS NOT NULL AND typeof({column_name}) NOT IN ('TIMESTAMP', 'TIMESTAMP WITH TIME ZONE', 'DATE') AND NOT ({column_name}::TEXT ~ '{ISO_DATETIME_STRING_PATTERN}')"
        ),
        Requirement::FormatNumeric { column_name } => format!(
            "{column_name} IS NOT NULL AND NOT ({column_name}::TEXT ~ '{FORMAT_NUMERIC_PATTERN}')"
        ),
        Requirement::FormatDateTime { column_name } => format!(
            "{column_name} IS NOT NULL AND NOT ({column_name}::TEXT ~ '{FORMAT_DATETIME_PATTERN}')"
        ),
        Requirement::FormatString { column_name } | Requirement::FormatUnit { column_name } => format!(
            "{column_name} IS NOT NULL AND (NOT ({column_name}::TEXT ~ '{FORMAT_STRING_PATTERN}') OR LENGTH({column_name}::TEXT) > 50)"
        ),
        Requirement::FormatKeyValue { column_name } => format!(
            "{column_name} IS NOT NULL AND NOT ({column_name}::TEXT ~ '{KEY_VALUE_PATTERN}')"
        ),
        Requirement::FormatBillingCurrencyCode { column_name }
        | Requirement::CheckNationalCurrency { column_name } => format!(
            "{column_name} IS NOT NULL AND NOT ({column_name}::TEXT ~ '{CURRENCY_CODE_PATTERN}')"
        ),
        Requirement::And { items } => {
            let clauses: Result<Vec<String>, _> = items
                .iter()
                .map(|item| violation_predicate_for(item).map(|p| format!("({p})")))
                .collect();
            clauses?.join(" OR ")
        }
        Requirement::Or { items } => {
            let clauses: Result<Vec<String>, _> = items
                .iter()
                .map(|item| violation_predicate_for(item).map(|p| format!("({p})")))
                .collect();
            clauses?.join(" AND ")
        }
        Requirement::ColumnPresent { .. }
        | Requirement::CheckDistinctCount { .. }
        | Requirement::CheckConformanceRule { .. } => {
            return Err(CheckCompileError::UnknownCheckFunction(
                requirement.kind_name().to_string()
            ));
        }
    };
    Ok(predicate)
}

/// The boolean predicate selecting rows to which the rule's requirement
/// applies. Only kinds that invert cleanly into a row-level predicate
/// support this; everything else is a compile error.
fn condition_predicate_for(requirement: &Requirement) -> Result<String, CheckCompileError> {
    let predicate = match requirement {
        Requirement::CheckValue { column_name, value } => match value {
            None | Some(Value::Null) => format!("{column_name} IS NULL"),
            Some(v) => format!("{column_name} = {}", sql_literal(v))
        },
        Requirement::CheckNotValue { column_name, value } => match value {
            None | Some(Value::Null) => format!("{column_name} IS NOT NULL"),
            Some(v) => format!("{column_name} IS NULL OR {column_name} != {}", sql_literal(v))
        },
        Requirement::CheckSameValue {
            column_a_name,
            column_b_name
        } => format!(
            "{column_a_name} IS NOT NULL AND {column_b_name} IS NOT NULL AND {column_a_name} = {column_b_name}"
        ),
        Requirement::CheckNotSameValue {
            column_a_name,
            column_b_name
        } => format!(
            "{column_a_name} IS NOT NULL AND {column_b_name} IS NOT NULL AND {column_a_name} <> {column_b_name}"
        ),
        Requirement::CheckGreaterOrEqualThanValue { column_name, value } => {
            format!("{column_name} IS NOT NULL AND {column_name} >= {}", sql_literal(value))
        }
        Requirement::CheckValueIn { column_name, values } => {
            let list = values.iter().map(sql_literal).collect::<Vec<_>>().join(", ");
            format!("{column_name} IS NOT NULL AND {column_name} IN ({list})")
        }
        _ => {
            return Err(CheckCompileError::UnknownCheckFunction(format!(
                "{} unsupported in condition mode",
                requirement.kind_name()
            )));
        }
    };
    Ok(predicate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityType, Keyword, ValidationCriteria};

    fn rule_with(requirement: Requirement, condition: Option<Requirement>) -> Rule {
        Rule {
            rule_id: "Test-001-M".to_string(),
            function: "Validation".to_string(),
            reference: "Col".to_string(),
            entity_type: EntityType::Column,
            status: "Active".to_string(),
            rule_type: "Static".to_string(),
            applicability_criteria: IndexSet::new(),
            validation_criteria: ValidationCriteria {
                must_satisfy: "must".to_string(),
                keyword: Keyword::Must,
                requirement,
                condition,
                dependencies: IndexSet::new()
            },
            notes: None,
            inherited_precondition: None
        }
    }

    #[test]
    fn check_value_with_null_uses_is_not_null() {
        let rule = rule_with(
            Requirement::CheckValue {
                column_name: "BilledCost".to_string(),
                value:       None
            },
            None
        );
        match compile_rule(&rule, &IndexSet::new()) {
            CompiledCheck::RequirementSql { sql, .. } => {
                assert!(sql.contains("BilledCost IS NOT NULL"));
            }
            _ => panic!("expected requirement sql")
        }
    }

    #[test]
    fn literal_escapes_single_quote() {
        let rule = rule_with(
            Requirement::CheckValue {
                column_name: "ProviderName".to_string(),
                value:       Some(Value::String("O'Brien".to_string()))
            },
            None
        );
        match compile_rule(&rule, &IndexSet::new()) {
            CompiledCheck::RequirementSql { sql, .. } => {
                assert!(sql.contains("'O''Brien'"));
            }
            _ => panic!("expected requirement sql")
        }
    }

    #[test]
    fn condition_wraps_violation_predicate() {
        let rule = rule_with(
            Requirement::CheckValue {
                column_name: "BilledCost".to_string(),
                value:       Some(Value::Number(0.into()))
            },
            Some(Requirement::CheckNotSameValue {
                column_a_name: "ProviderName".to_string(),
                column_b_name: "InvoiceIssuerName".to_string()
            })
        );
        match compile_rule(&rule, &IndexSet::new()) {
            CompiledCheck::RequirementSql { sql, .. } => {
                assert!(sql.contains("ProviderName IS NOT NULL AND InvoiceIssuerName IS NOT NULL"));
                assert!(sql.contains("BilledCost != 0"));
            }
            _ => panic!("expected requirement sql")
        }
    }

    #[test]
    fn may_keyword_skips() {
        let mut rule = rule_with(
            Requirement::ColumnPresent {
                column_name: "ListUnitPrice".to_string()
            },
            None
        );
        rule.validation_criteria.keyword = Keyword::May;
        match compile_rule(&rule, &IndexSet::new()) {
            CompiledCheck::Skip { .. } => {}
            _ => panic!("expected skip")
        }
    }

    #[test]
    fn applicability_gating_takes_precedence_over_keyword() {
        let mut rule = rule_with(
            Requirement::ColumnPresent {
                column_name: "ListUnitPrice".to_string()
            },
            None
        );
        rule.applicability_criteria.insert("SupportsPublicPriceList".to_string());
        rule.validation_criteria.keyword = Keyword::May;
        match compile_rule(&rule, &IndexSet::new()) {
            CompiledCheck::Skip { reason } => {
                assert!(reason.contains("not applicable"));
            }
            _ => panic!("expected skip")
        }
    }

    #[test]
    fn inline_or_composite_combines_with_and() {
        let rule = rule_with(
            Requirement::Or {
                items: vec![
                    Requirement::CheckValue {
                        column_name: "ChargeCategory".to_string(),
                        value:       Some(Value::String("Usage".to_string()))
                    },
                    Requirement::CheckValue {
                        column_name: "ChargeCategory".to_string(),
                        value:       Some(Value::String("Adjustment".to_string()))
                    },
                ]
            },
            None
        );
        match compile_rule(&rule, &IndexSet::new()) {
            CompiledCheck::RequirementSql { sql, .. } => {
                assert!(sql.contains("AND"));
                assert!(sql.contains("ChargeCategory != 'Usage'"));
            }
            _ => panic!("expected requirement sql")
        }
    }
}
