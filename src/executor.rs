//! Layer-by-layer plan execution.
//!
//! Each layer's nodes run concurrently via a `rayon` parallel iterator over
//! a `Mutex`-serialized DuckDB session (the "serialized access to a shared
//! connection" option the concurrency model allows), mirroring the
//! `par_iter().enumerate()` pattern the rule runner this module is grounded
//! on uses to analyze queries in parallel. A whole layer's verdicts are
//! collected into a pre-sized slice before the next layer starts, so a
//! child never observes a partial write from its own layer.

use indexmap::IndexSet;
use rayon::prelude::*;

use crate::{
    catalog::Rule,
    compiler::{CompiledCheck, CompositeOp, compile_rule},
    engine::DuckDbEngine,
    error::{AppResult, IntegrityError},
    plan::ValidationPlan,
    verdict::Verdict
};

pub struct Executor<'a> {
    plan:                &'a ValidationPlan,
    rules:                &'a indexmap::IndexMap<String, Rule>,
    engine:               &'a DuckDbEngine,
    active_tags:          &'a IndexSet<String>,
    stop_on_first_error:  bool
}

impl<'a> Executor<'a> {
    pub fn new(
        plan: &'a ValidationPlan,
        rules: &'a indexmap::IndexMap<String, Rule>,
        engine: &'a DuckDbEngine,
        active_tags: &'a IndexSet<String>,
        stop_on_first_error: bool
    ) -> Self {
        Self {
            plan,
            rules,
            engine,
            active_tags,
            stop_on_first_error
        }
    }

    /// Execute every layer in order, publishing each layer's verdicts
    /// before the next layer begins.
    pub fn run(&self) -> AppResult<Vec<Verdict>> {
        let mut verdicts: Vec<Option<Verdict>> = (0..self.plan.nodes.len()).map(|_| None).collect();
        let mut cancelled = false;

        for layer in &self.plan.layers {
            if cancelled {
                break;
            }

            let results: Vec<AppResult<Verdict>> = layer
                .par_iter()
                .map(|&idx| self.execute_node(idx, &verdicts))
                .collect();

            for (&idx, result) in layer.iter().zip(results.into_iter()) {
                let verdict = result?;
                if self.stop_on_first_error && verdict.error.is_some() {
                    cancelled = true;
                }
                verdicts[idx] = Some(verdict);
            }
        }

        Ok(verdicts
            .into_iter()
            .enumerate()
            .map(|(idx, verdict)| {
                verdict.unwrap_or_else(|| {
                    Verdict::skip(
                        self.plan.nodes[idx].rule_id.clone(),
                        String::new(),
                        "not executed: run cancelled after an earlier error"
                    )
                })
            })
            .collect())
    }

    fn execute_node(&self, idx: usize, verdicts: &[Option<Verdict>]) -> AppResult<Verdict> {
        let node = &self.plan.nodes[idx];
        let rule = &self.rules[&node.rule_id];
        let check_type = rule.validation_criteria.requirement.kind_name().to_string();

        let compiled = compile_rule(rule, self.active_tags);

        let verdict = match compiled {
            CompiledCheck::Skip { reason } => Verdict::skip(&node.rule_id, check_type, reason),
            CompiledCheck::Errored { error } => Verdict::errored(&node.rule_id, check_type, error),
            CompiledCheck::SchemaProbe { column_name } => {
                self.execute_schema_probe(&node.rule_id, &column_name)
            }
            CompiledCheck::Composite { op, child_rule_ids } => {
                self.evaluate_composite(&node.rule_id, op, &child_rule_ids, verdicts)
            }
            CompiledCheck::RequirementSql { sql, check_type } => {
                match self.engine.execute_violations(&node.rule_id, &sql) {
                    Ok(violations) if violations < 0 => {
                        return Err(IntegrityError::MalformedViolationCount {
                            rule_id: node.rule_id.clone(),
                            detail:  format!("negative violations count: {violations}")
                        }
                        .into());
                    }
                    Ok(violations) => Verdict::passed(&node.rule_id, check_type, violations),
                    Err(error) => Verdict::errored(&node.rule_id, check_type, error)
                }
            }
        };

        Ok(verdict)
    }

    fn execute_schema_probe(&self, rule_id: &str, column_name: &str) -> Verdict {
        match self.engine.probe_columns(rule_id) {
            Ok(columns) => {
                let present = columns.contains(column_name);
                Verdict {
                    rule_id:    rule_id.to_string(),
                    ok:         present,
                    skipped:    false,
                    violations: Some(if present { 0 } else { 1 }),
                    check_type: "column_presence".to_string(),
                    message: if present {
                        format!("column '{column_name}' is present")
                    } else {
                        format!("column '{column_name}' is not present")
                    },
                    reason: None,
                    error:  None
                }
            }
            Err(error) => Verdict::errored(rule_id, "column_presence", error)
        }
    }

    fn evaluate_composite(
        &self,
        rule_id: &str,
        op: CompositeOp,
        child_rule_ids: &[String],
        verdicts: &[Option<Verdict>]
    ) -> Verdict {
        let outcomes: Vec<(String, bool, bool)> = child_rule_ids
            .iter()
            .map(|child_id| {
                let child_verdict = self
                    .plan
                    .id_to_idx
                    .get(child_id)
                    .and_then(|&idx| verdicts[idx].as_ref());
                match child_verdict {
                    Some(v) => (child_id.clone(), v.ok, v.skipped),
                    None => (child_id.clone(), false, false)
                }
            })
            .collect();

        let ok = match op {
            CompositeOp::And => outcomes.iter().all(|(_, ok, _)| *ok),
            CompositeOp::Or => outcomes.iter().any(|(_, ok, skipped)| *ok && !*skipped)
        };

        let op_name = match op {
            CompositeOp::And => "AND",
            CompositeOp::Or => "OR"
        };
        let members = outcomes
            .iter()
            .map(|(id, _, _)| id.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        Verdict {
            rule_id: rule_id.to_string(),
            ok,
            skipped: false,
            violations: Some(if ok { 0 } else { 1 }),
            check_type: op_name.to_string(),
            message: format!("{op_name} over [{members}]"),
            reason: None,
            error: None
        }
    }
}
