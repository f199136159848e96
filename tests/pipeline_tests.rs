// SPDX-FileCopyrightText: 2025 RAprogramm
// SPDX-License-Identifier: MIT

use focus_conformance_engine::{
    catalog::{Catalog, InMemoryRuleSource},
    compiler::{CompiledCheck, compile_rule},
    plan::{ExecContext, PlanBuilder, compile_validation_plan}
};
use indexmap::IndexSet;

fn load(doc: serde_json::Value) -> Catalog {
    Catalog::load(&InMemoryRuleSource { document: doc }).unwrap()
}

#[test]
fn or_composite_allowed_values_compiles_to_conjunctive_violation_predicate() {
    let catalog = load(serde_json::json!({
        "ConformanceDatasets": { "BillingAccount": { "ConformanceRules": ["ChargeCategory-C-001-M"] } },
        "ConformanceRules": {
            "ChargeCategory-C-001-M": {
                "Function": "Validation",
                "Reference": "ChargeCategory",
                "EntityType": "Column",
                "ValidationCriteria": {
                    "MustSatisfy": "ChargeCategory must be one of the allowed values",
                    "Keyword": "MUST",
                    "Requirement": {
                        "CheckFunction": "OR",
                        "Items": [
                            { "CheckFunction": "CheckValue", "ColumnName": "ChargeCategory", "Value": "Usage" },
                            { "CheckFunction": "CheckValue", "ColumnName": "ChargeCategory", "Value": "Purchase" },
                            { "CheckFunction": "CheckValue", "ColumnName": "ChargeCategory", "Value": "Tax" },
                            { "CheckFunction": "CheckValue", "ColumnName": "ChargeCategory", "Value": "Credit" },
                            { "CheckFunction": "CheckValue", "ColumnName": "ChargeCategory", "Value": "Adjustment" }
                        ]
                    }
                }
            }
        }
    }));

    let resolved = focus_conformance_engine::resolver::resolve(&catalog, "BillingAccount", None).unwrap();
    let rule = &resolved.rules["ChargeCategory-C-001-M"];

    match compile_rule(rule, &IndexSet::new()) {
        CompiledCheck::RequirementSql { sql, .. } => {
            assert!(sql.contains("ChargeCategory != 'Usage'"));
            assert!(sql.contains("ChargeCategory != 'Adjustment'"));
            assert_eq!(sql.matches(" AND ").count(), 4);
        }
        _ => panic!("expected requirement sql")
    }
}

#[test]
fn conditional_rule_wraps_violation_predicate_with_condition() {
    let catalog = load(serde_json::json!({
        "ConformanceDatasets": { "BillingAccount": { "ConformanceRules": ["BilledCost-C-005-C"] } },
        "ConformanceRules": {
            "BilledCost-C-005-C": {
                "Function": "Validation",
                "Reference": "BilledCost",
                "EntityType": "Column",
                "ValidationCriteria": {
                    "MustSatisfy": "BilledCost must be zero for marketplace resale",
                    "Keyword": "MUST",
                    "Requirement": { "CheckFunction": "CheckValue", "ColumnName": "BilledCost", "Value": 0 },
                    "Condition": {
                        "CheckFunction": "CheckNotSameValue",
                        "ColumnAName": "ProviderName",
                        "ColumnBName": "InvoiceIssuerName"
                    }
                }
            }
        }
    }));

    let resolved = focus_conformance_engine::resolver::resolve(&catalog, "BillingAccount", None).unwrap();
    let rule = &resolved.rules["BilledCost-C-005-C"];

    match compile_rule(rule, &IndexSet::new()) {
        CompiledCheck::RequirementSql { sql, .. } => {
            assert!(sql.contains("ProviderName IS NOT NULL AND InvoiceIssuerName IS NOT NULL"));
            assert!(sql.contains("ProviderName <> InvoiceIssuerName"));
            assert!(sql.contains("BilledCost != 0"));
        }
        _ => panic!("expected requirement sql")
    }
}

#[test]
fn composite_rule_referencing_other_rules_defers_to_reduction() {
    let catalog = load(serde_json::json!({
        "ConformanceDatasets": { "BillingAccount": { "ConformanceRules": ["Composite-C-001-M"] } },
        "ConformanceRules": {
            "Composite-C-001-M": {
                "Function": "Composite",
                "Reference": "BillingAccount",
                "EntityType": "Dataset",
                "ValidationCriteria": {
                    "MustSatisfy": "either check must pass",
                    "Keyword": "MUST",
                    "Requirement": {
                        "CheckFunction": "OR",
                        "Items": [
                            { "CheckFunction": "CheckConformanceRule", "ConformanceRuleId": "A-001-M" },
                            { "CheckFunction": "CheckConformanceRule", "ConformanceRuleId": "B-002-M" }
                        ]
                    }
                }
            },
            "A-001-M": {
                "Function": "Presence",
                "Reference": "A",
                "EntityType": "Column",
                "ValidationCriteria": {
                    "MustSatisfy": "A must be present",
                    "Keyword": "MUST",
                    "Requirement": { "CheckFunction": "ColumnPresent", "ColumnName": "A" }
                }
            },
            "B-002-M": {
                "Function": "Presence",
                "Reference": "B",
                "EntityType": "Column",
                "ValidationCriteria": {
                    "MustSatisfy": "B must be present",
                    "Keyword": "MUST",
                    "Requirement": { "CheckFunction": "ColumnPresent", "ColumnName": "B" }
                }
            }
        }
    }));

    let resolved = focus_conformance_engine::resolver::resolve(&catalog, "BillingAccount", None).unwrap();
    assert_eq!(resolved.rules.len(), 3);

    let graph = PlanBuilder::new(&resolved.rules)
        .build(resolved.roots.iter().cloned())
        .unwrap();
    let plan = compile_validation_plan(graph, &resolved.rules, &ExecContext::default()).unwrap();

    let composite_idx = plan.id_to_idx["Composite-C-001-M"];
    let a_idx = plan.id_to_idx["A-001-M"];
    let b_idx = plan.id_to_idx["B-002-M"];
    assert!(a_idx < composite_idx);
    assert!(b_idx < composite_idx);

    let composite_rule = &resolved.rules["Composite-C-001-M"];
    match compile_rule(composite_rule, &IndexSet::new()) {
        CompiledCheck::Composite { child_rule_ids, .. } => {
            assert_eq!(child_rule_ids, vec!["A-001-M".to_string(), "B-002-M".to_string()]);
        }
        _ => panic!("expected composite reduction")
    }
}
