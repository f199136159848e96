//! Aggregates executor output into the view reporters consume.

use indexmap::IndexMap;

use crate::{
    catalog::{Keyword, Rule},
    verdict::Verdict
};

/// Verdicts plus the rule records they refer to, indexed two ways so
/// reporters can walk either by execution order or by rule id.
pub struct ValidationResults {
    pub by_idx:     Vec<Verdict>,
    pub by_rule_id: IndexMap<String, usize>,
    pub rules:      IndexMap<String, Rule>
}

impl ValidationResults {
    pub fn new(by_idx: Vec<Verdict>, rules: IndexMap<String, Rule>) -> Self {
        let by_rule_id = by_idx
            .iter()
            .enumerate()
            .map(|(i, v)| (v.rule_id.clone(), i))
            .collect();
        Self {
            by_idx,
            by_rule_id,
            rules
        }
    }

    pub fn verdict(&self, rule_id: &str) -> Option<&Verdict> {
        self.by_rule_id.get(rule_id).map(|&i| &self.by_idx[i])
    }

    pub fn passed_count(&self) -> usize {
        self.by_idx.iter().filter(|v| v.ok && !v.skipped).count()
    }

    pub fn failed_count(&self) -> usize {
        self.by_idx.iter().filter(|v| !v.ok).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.by_idx.iter().filter(|v| v.skipped).count()
    }

    pub fn errored_count(&self) -> usize {
        self.by_idx.iter().filter(|v| v.error.is_some()).count()
    }

    /// `2` if any `MUST`/`MUST NOT` rule failed, `1` if any
    /// `SHOULD`/`SHOULD NOT`/`RECOMMENDED`/`NOT RECOMMENDED` rule failed,
    /// else `0`. Mirrors the severity-ranked exit-code logic the rule
    /// runner this engine is grounded on uses for its own Error/Warning
    /// split.
    pub fn exit_code(&self) -> i32 {
        let mut worst = 0;
        for verdict in &self.by_idx {
            if verdict.ok {
                continue;
            }
            let Some(rule) = self.rules.get(&verdict.rule_id) else {
                continue;
            };
            let severity = match rule.validation_criteria.keyword {
                Keyword::Must | Keyword::MustNot => 2,
                Keyword::Should | Keyword::ShouldNot | Keyword::Recommended | Keyword::NotRecommended => 1,
                Keyword::May | Keyword::Optional => 0
            };
            worst = worst.max(severity);
        }
        worst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityType, Requirement, ValidationCriteria};
    use indexmap::IndexSet;

    fn must_rule(rule_id: &str) -> Rule {
        Rule {
            rule_id: rule_id.to_string(),
            function: "Presence".to_string(),
            reference: "Col".to_string(),
            entity_type: EntityType::Column,
            status: "Active".to_string(),
            rule_type: "Static".to_string(),
            applicability_criteria: IndexSet::new(),
            validation_criteria: ValidationCriteria {
                must_satisfy: "must".to_string(),
                keyword: Keyword::Must,
                requirement: Requirement::ColumnPresent {
                    column_name: "Col".to_string()
                },
                condition: None,
                dependencies: IndexSet::new()
            },
            notes: None,
            inherited_precondition: None
        }
    }

    #[test]
    fn exit_code_reflects_worst_failure() {
        let mut rules = IndexMap::new();
        rules.insert("A".to_string(), must_rule("A"));

        let verdicts = vec![Verdict::passed("A", "ColumnPresent", 1)];
        let results = ValidationResults::new(verdicts, rules);
        assert_eq!(results.exit_code(), 2);
    }

    #[test]
    fn exit_code_zero_when_all_pass() {
        let mut rules = IndexMap::new();
        rules.insert("A".to_string(), must_rule("A"));

        let verdicts = vec![Verdict::passed("A", "ColumnPresent", 0)];
        let results = ValidationResults::new(verdicts, rules);
        assert_eq!(results.exit_code(), 0);
    }
}
