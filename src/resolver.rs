//! Dependency resolution: collecting the rules relevant to a dataset,
//! propagating composite preconditions onto their referenced children, and
//! producing cycle diagnostics via an iterative Tarjan SCC pass.
//!
//! Graph/cycle diagnostics are emitted as `tracing` events rather than
//! returned values, mirroring how the resolver this module is grounded on
//! logs graph snapshots and cycle detail instead of raising on them.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};

use crate::{
    catalog::{Catalog, Rule},
    error::AppResult
};

/// The rules relevant to one dataset (plus any prefix filter), with
/// composite preconditions already propagated onto their children.
pub struct ResolvedSet {
    pub rules: IndexMap<String, Rule>,
    pub roots: IndexSet<String>
}

/// Resolve the rules relevant to `dataset_name`, optionally narrowed to
/// rules whose id starts with `prefix` (plus their transitive dependency
/// closure).
pub fn resolve(catalog: &Catalog, dataset_name: &str, prefix: Option<&str>) -> AppResult<ResolvedSet> {
    let dataset = catalog.dataset(dataset_name)?;
    let dataset_rule_ids: Vec<String> = dataset.conformance_rules.clone();

    let relevant = collect_relevant(catalog, &dataset_rule_ids);

    let mut rules: IndexMap<String, Rule> = relevant
        .iter()
        .filter_map(|rid| catalog.rules.get(rid).cloned().map(|rule| (rid.clone(), rule)))
        .collect();

    propagate_preconditions(&mut rules)?;

    let mut roots: IndexSet<String> = match prefix {
        Some(prefix) => dataset_rule_ids
            .iter()
            .filter(|rid| rid.starts_with(prefix))
            .cloned()
            .collect(),
        None => dataset_rule_ids.iter().cloned().collect()
    };
    roots.retain(|rid| rules.contains_key(rid));

    if let Some(prefix) = prefix {
        let keep = reachable_from(&rules, roots.iter().cloned());
        rules.retain(|rid, _| keep.contains(rid));
        tracing::debug!(prefix, kept = keep.len(), "narrowed working set by prefix filter");
    }

    log_diagnostics(&rules);

    Ok(ResolvedSet { rules, roots })
}

fn collect_relevant(catalog: &Catalog, dataset_rule_ids: &[String]) -> IndexSet<String> {
    let mut relevant = IndexSet::new();
    let mut queue: VecDeque<String> = dataset_rule_ids.iter().cloned().collect();

    while let Some(rule_id) = queue.pop_front() {
        if relevant.contains(&rule_id) {
            continue;
        }
        let Some(rule) = catalog.rules.get(&rule_id) else {
            tracing::debug!(rule_id, "dataset references unknown rule, ignoring");
            continue;
        };
        relevant.insert(rule_id.clone());

        for dep in &rule.validation_criteria.dependencies {
            if !relevant.contains(dep) {
                queue.push_back(dep.clone());
            }
        }
        if rule.is_composite() {
            for child in rule.validation_criteria.requirement.referenced_rule_ids() {
                if !relevant.contains(child) {
                    queue.push_back(child.to_string());
                }
            }
        }
    }

    relevant
}

fn reachable_from(rules: &IndexMap<String, Rule>, roots: impl IntoIterator<Item = String>) -> IndexSet<String> {
    let mut keep = IndexSet::new();
    let mut queue: VecDeque<String> = roots.into_iter().collect();

    while let Some(rule_id) = queue.pop_front() {
        if keep.contains(&rule_id) {
            continue;
        }
        keep.insert(rule_id.clone());
        if let Some(rule) = rules.get(&rule_id) {
            for dep in &rule.validation_criteria.dependencies {
                if !keep.contains(dep) {
                    queue.push_back(dep.clone());
                }
            }
            if rule.is_composite() {
                for child in rule.validation_criteria.requirement.referenced_rule_ids() {
                    if !keep.contains(child) {
                        queue.push_back(child.to_string());
                    }
                }
            }
        }
    }

    keep
}

fn propagate_preconditions(rules: &mut IndexMap<String, Rule>) -> AppResult<()> {
    let composites: Vec<(String, crate::catalog::Requirement, Vec<String>)> = rules
        .values()
        .filter(|r| r.is_composite() && r.validation_criteria.condition.is_some())
        .map(|r| {
            (
                r.rule_id.clone(),
                r.validation_criteria
                    .condition
                    .clone()
                    .expect("filtered above"),
                r.validation_criteria
                    .requirement
                    .referenced_rule_ids()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            )
        })
        .collect();

    for (composite_id, condition, children) in composites {
        for child_id in children {
            if let Some(child) = rules.get_mut(&child_id) {
                child.set_inherited_precondition(condition.clone()).map_err(|e| {
                    tracing::error!(composite_id, child_id, error = %e, "precondition propagation failed");
                    e
                })?;
            }
        }
    }

    Ok(())
}

/// Emit node/edge counts, a sample of zero-prerequisite rules, and a warning
/// for every strongly-connected component of size greater than one (a
/// cycle), with one example simple cycle path.
fn log_diagnostics(rules: &IndexMap<String, Rule>) {
    let node_count = rules.len();
    let mut edge_count = 0usize;
    let mut indeg: IndexMap<String, usize> = rules.keys().map(|k| (k.clone(), 0)).collect();

    for rule in rules.values() {
        for dep in &rule.validation_criteria.dependencies {
            if rules.contains_key(dep) {
                edge_count += 1;
                *indeg.entry(rule.rule_id.clone()).or_insert(0) += 1;
            }
        }
    }

    let zero_prereq: Vec<&str> = indeg
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(rid, _)| rid.as_str())
        .take(5)
        .collect();

    tracing::debug!(
        node_count,
        edge_count,
        zero_prereq_sample = ?zero_prereq,
        "dependency graph snapshot"
    );

    let sccs = tarjan_scc(rules);
    for component in sccs.into_iter().filter(|c| c.len() > 1) {
        let example_path = find_simple_cycle(rules, &component);
        tracing::warn!(
            size = component.len(),
            members = ?component,
            example_cycle = ?example_path,
            "strongly-connected component detected in rule dependencies"
        );
    }
}

/// Iterative Tarjan's algorithm (no recursion, so arbitrarily deep chains
/// in a large catalog cannot overflow the stack).
fn tarjan_scc(rules: &IndexMap<String, Rule>) -> Vec<Vec<String>> {
    enum Frame {
        Enter(String),
        Exit(String)
    }

    let mut index_of: IndexMap<String, usize> = IndexMap::new();
    let mut lowlink: IndexMap<String, usize> = IndexMap::new();
    let mut on_stack: IndexMap<String, bool> = IndexMap::new();
    let mut stack: Vec<String> = Vec::new();
    let mut next_index = 0usize;
    let mut result = Vec::new();

    for start in rules.keys() {
        if index_of.contains_key(start) {
            continue;
        }
        let mut work: Vec<Frame> = vec![Frame::Enter(start.clone())];

        while let Some(frame) = work.pop() {
            match frame {
                Frame::Enter(v) => {
                    if index_of.contains_key(&v) {
                        continue;
                    }
                    index_of.insert(v.clone(), next_index);
                    lowlink.insert(v.clone(), next_index);
                    next_index += 1;
                    stack.push(v.clone());
                    on_stack.insert(v.clone(), true);

                    work.push(Frame::Exit(v.clone()));

                    if let Some(rule) = rules.get(&v) {
                        for dep in &rule.validation_criteria.dependencies {
                            if !rules.contains_key(dep) {
                                continue;
                            }
                            if !index_of.contains_key(dep) {
                                work.push(Frame::Enter(dep.clone()));
                            } else if *on_stack.get(dep).unwrap_or(&false) {
                                let dep_idx = index_of[dep];
                                let cur_low = lowlink[&v];
                                lowlink.insert(v.clone(), cur_low.min(dep_idx));
                            }
                        }
                    }
                }
                Frame::Exit(v) => {
                    if let Some(rule) = rules.get(&v) {
                        for dep in &rule.validation_criteria.dependencies {
                            if !rules.contains_key(dep) {
                                continue;
                            }
                            if *on_stack.get(dep).unwrap_or(&false) {
                                let dep_low = lowlink[dep];
                                let cur_low = lowlink[&v];
                                lowlink.insert(v.clone(), cur_low.min(dep_low));
                            }
                        }
                    }

                    if lowlink[&v] == index_of[&v] {
                        let mut component = Vec::new();
                        loop {
                            let w = stack.pop().expect("component member on stack");
                            on_stack.insert(w.clone(), false);
                            component.push(w.clone());
                            if w == v {
                                break;
                            }
                        }
                        result.push(component);
                    }
                }
            }
        }
    }

    result
}

/// Find one simple cycle path within a strongly-connected component, for
/// diagnostic output.
fn find_simple_cycle(rules: &IndexMap<String, Rule>, component: &[String]) -> Vec<String> {
    let members: IndexSet<&String> = component.iter().collect();
    let Some(start) = component.first() else {
        return Vec::new();
    };

    let mut path = vec![start.clone()];
    let mut current = start.clone();
    let mut visited: IndexSet<String> = IndexSet::new();
    visited.insert(current.clone());

    loop {
        let Some(rule) = rules.get(&current) else {
            break;
        };
        let next = rule
            .validation_criteria
            .dependencies
            .iter()
            .find(|dep| members.contains(dep));
        match next {
            Some(next) if next == start => {
                path.push(next.clone());
                break;
            }
            Some(next) if !visited.contains(next) => {
                visited.insert(next.clone());
                path.push(next.clone());
                current = next.clone();
            }
            _ => break
        }
    }

    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DatasetEntry, EntityType, Keyword, Requirement, ValidationCriteria};

    fn rule(rule_id: &str, deps: Vec<&str>) -> Rule {
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
                dependencies: deps.into_iter().map(str::to_string).collect()
            },
            notes: None,
            inherited_precondition: None
        }
    }

    fn catalog_with(rules: Vec<Rule>, dataset_rules: Vec<&str>) -> Catalog {
        let mut catalog = Catalog::default();
        for r in rules {
            catalog.rules.insert(r.rule_id.clone(), r);
        }
        catalog.datasets.insert(
            "Test".to_string(),
            DatasetEntry {
                conformance_rules: dataset_rules.into_iter().map(str::to_string).collect()
            }
        );
        catalog
    }

    #[test]
    fn collects_transitive_dependencies() {
        let catalog = catalog_with(
            vec![rule("A", vec!["B"]), rule("B", vec!["C"]), rule("C", vec![])],
            vec!["A"]
        );
        let resolved = resolve(&catalog, "Test", None).unwrap();
        assert_eq!(resolved.rules.len(), 3);
    }

    #[test]
    fn detects_cycle_as_scc() {
        let catalog = catalog_with(vec![rule("A", vec!["B"]), rule("B", vec!["A"])], vec!["A", "B"]);
        let resolved = resolve(&catalog, "Test", None).unwrap();
        let sccs = tarjan_scc(&resolved.rules);
        assert!(sccs.iter().any(|c| c.len() == 2));
    }

    #[test]
    fn prefix_filter_narrows_roots() {
        let catalog = catalog_with(vec![rule("A-001-M", vec![]), rule("B-001-M", vec![])], vec![
            "A-001-M",
            "B-001-M"
        ]);
        let resolved = resolve(&catalog, "Test", Some("A-")).unwrap();
        assert_eq!(resolved.roots.len(), 1);
        assert!(resolved.roots.contains("A-001-M"));
    }
}
