//! Plan graph construction and scheduling.
//!
//! Expands composite rules and explicit dependencies into a directed graph
//! ([`PlanGraph`]), then schedules it into execution-ready layers via Kahn's
//! algorithm with a deterministic tie-break ([`compile_validation_plan`]).

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    sync::{Arc, OnceLock}
};

use indexmap::{IndexMap, IndexSet};
use regex::Regex;

use crate::{
    catalog::{EntityType, Rule},
    error::AppResult
};

/// Why a dependency edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Structural,
    DataDep,
    Applicability,
    Ordering
}

/// Runtime context an edge's predicate is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    pub active_applicability_tags: IndexSet<String>
}

type Predicate = Arc<dyn Fn(&ExecContext) -> bool + Send + Sync>;

/// Immutable edge metadata. `predicate`, when present, gates whether the
/// edge counts toward in-degree for a given [`ExecContext`]; absent means
/// always active.
#[derive(Clone)]
pub struct EdgeCtx {
    pub kind:      EdgeKind,
    pub note:      String,
    pub predicate: Option<Predicate>
}

impl EdgeCtx {
    pub fn new(kind: EdgeKind, note: impl Into<String>) -> Self {
        Self {
            kind,
            note: note.into(),
            predicate: None
        }
    }

    pub fn is_active(&self, ctx: &ExecContext) -> bool {
        match &self.predicate {
            Some(p) => p(ctx),
            None => true
        }
    }
}

impl std::fmt::Debug for EdgeCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeCtx")
            .field("kind", &self.kind)
            .field("note", &self.note)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// A node in the plan graph: a rule plus its parent rule ids, in the order
/// they were linked.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub rule_id: String,
    pub parents: Vec<String>
}

/// Parent-preserving dependency graph over rule ids.
#[derive(Debug, Default)]
pub struct PlanGraph {
    pub nodes:    IndexMap<String, PlanNode>,
    pub children: IndexMap<String, IndexSet<String>>,
    pub parents:  IndexMap<String, IndexSet<String>>,
    pub edges:    HashMap<(String, String), EdgeCtx>
}

impl PlanGraph {
    pub fn add_edge(&mut self, parent: &str, child: &str, ctx: EdgeCtx) {
        if parent == child {
            return;
        }
        self.children
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
        self.parents
            .entry(child.to_string())
            .or_default()
            .insert(parent.to_string());
        self.edges.insert((parent.to_string(), child.to_string()), ctx);
    }
}

/// Memoized, recursive expansion of composite references and explicit
/// dependencies into a [`PlanGraph`].
pub struct PlanBuilder<'a> {
    rules: &'a IndexMap<String, Rule>,
    graph: PlanGraph,
    memo:  IndexSet<String>
}

impl<'a> PlanBuilder<'a> {
    pub fn new(rules: &'a IndexMap<String, Rule>) -> Self {
        Self {
            rules,
            graph: PlanGraph::default(),
            memo: IndexSet::new()
        }
    }

    pub fn build(mut self, roots: impl IntoIterator<Item = String>) -> AppResult<PlanGraph> {
        for root in roots {
            self.build_node(&root)?;
        }
        Ok(self.graph)
    }

    fn get_or_create(&mut self, rule_id: &str) -> AppResult<()> {
        if self.graph.nodes.contains_key(rule_id) {
            return Ok(());
        }
        if !self.rules.contains_key(rule_id) {
            return Err(crate::error::catalog_error(format!(
                "rule '{rule_id}' not found while building plan"
            )));
        }
        self.graph.nodes.insert(
            rule_id.to_string(),
            PlanNode {
                rule_id: rule_id.to_string(),
                parents: Vec::new()
            }
        );
        Ok(())
    }

    fn link(&mut self, parent_id: &str, child_id: &str, ctx: EdgeCtx) -> AppResult<()> {
        self.get_or_create(parent_id)?;
        self.get_or_create(child_id)?;
        self.graph.add_edge(parent_id, child_id, ctx);
        let child = self.graph.nodes.get_mut(child_id).expect("just created");
        if !child.parents.iter().any(|p| p == parent_id) {
            child.parents.push(parent_id.to_string());
        }
        Ok(())
    }

    fn build_node(&mut self, rule_id: &str) -> AppResult<()> {
        if self.memo.contains(rule_id) {
            return Ok(());
        }
        self.memo.insert(rule_id.to_string());
        self.get_or_create(rule_id)?;

        let rule = self.rules.get(rule_id).expect("validated by get_or_create");

        if rule.is_composite() {
            let referenced: Vec<String> = rule
                .validation_criteria
                .requirement
                .referenced_rule_ids()
                .into_iter()
                .map(str::to_string)
                .collect();
            for dep_id in referenced {
                self.build_node(&dep_id)?;
                self.link(
                    &dep_id,
                    rule_id,
                    EdgeCtx::new(EdgeKind::Structural, format!("{rule_id} references {dep_id}"))
                )?;
            }
        }

        let deps: Vec<String> = rule
            .validation_criteria
            .dependencies
            .iter()
            .cloned()
            .collect();
        for dep_id in deps {
            self.build_node(&dep_id)?;
            self.link(
                &dep_id,
                rule_id,
                EdgeCtx::new(EdgeKind::DataDep, format!("{rule_id} depends on {dep_id}"))
            )?;
        }

        if rule.effective_condition().is_some() {
            self.gate_inbound_edges(rule_id);
        }

        Ok(())
    }

    /// Rewrites every already-linked inbound edge of `rule_id` as
    /// [`EdgeKind::Applicability`], gated on the rule's own effective
    /// condition holding for the active run.
    fn gate_inbound_edges(&mut self, rule_id: &str) {
        let parents: Vec<String> = self
            .graph
            .parents
            .get(rule_id)
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default();

        for parent_id in parents {
            let key = (parent_id.clone(), rule_id.to_string());
            let Some(note) = self.graph.edges.get(&key).map(|edge| edge.note.clone()) else {
                continue;
            };
            // The condition itself is row-scoped (evaluated in SQL at check time,
            // see compiler::condition_predicate_for) and ExecContext carries no
            // row data, so the edge predicate has nothing to gate on but presence.
            let gated = EdgeCtx {
                kind:      EdgeKind::Applicability,
                note:      format!("{note}; gated by condition on {rule_id}"),
                predicate: Some(Arc::new(|_ctx: &ExecContext| true))
            };
            self.graph.edges.insert(key, gated);
        }
    }
}

fn sequence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-([0-9]{3})-").expect("static pattern"))
}

type TieBreakKey = (u8, u8, u32, String);

/// The deterministic tie-break key: `-000-` rules first, then Dataset rules,
/// then Column rules, then everything else, ordered by the embedded
/// three-digit sequence number and finally by `rule_id` itself.
pub fn default_key(rules: &IndexMap<String, Rule>, rule_id: &str) -> TieBreakKey {
    let rule = &rules[rule_id];
    let seq = sequence_regex()
        .captures(rule_id)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(999);
    let zero_boost = if seq == 0 { 0 } else { 1 };
    let entity_ord = match rule.entity_type {
        EntityType::Dataset => 0,
        EntityType::Column => 1,
        EntityType::Attribute => 2
    };
    (zero_boost, entity_ord, seq, rule_id.to_string())
}

/// A single schedulable unit: the rule plus the integer indices (and
/// aligned edge contexts) of its parents in the compiled plan.
pub struct ExecNode {
    pub rule_id:     String,
    pub idx:         usize,
    pub parent_idxs: Vec<usize>,
    pub parent_edges: Vec<EdgeCtx>
}

/// Everything the executor needs, precomputed: a flat index-addressable
/// node list in topological order, the layered schedule, and the set of
/// rule ids that could not be ordered because they sit on a cycle.
pub struct ValidationPlan {
    pub nodes:           Vec<ExecNode>,
    pub id_to_idx:       IndexMap<String, usize>,
    pub layers:          Vec<Vec<usize>>,
    pub plan_graph:      PlanGraph,
    pub cyclic_rule_ids: Vec<String>
}

/// Kahn's algorithm with layered output and a deterministic tie-break.
///
/// Unlike a strict topological sort, an unresolved remainder does not abort:
/// leftover (cyclic) nodes are appended as a final layer in tie-break order
/// and returned separately so the caller can flag them rather than drop
/// them from the plan.
fn topo_schedule(
    graph: &PlanGraph,
    rules: &IndexMap<String, Rule>,
    ctx: &ExecContext
) -> (Vec<String>, Vec<Vec<String>>, Vec<String>) {
    let mut indeg: HashMap<String, usize> = graph.nodes.keys().map(|k| (k.clone(), 0)).collect();
    for ((_parent, child), edge) in &graph.edges {
        if edge.is_active(ctx) {
            *indeg.entry(child.clone()).or_insert(0) += 1;
        }
    }

    let key = |rid: &str| default_key(rules, rid);

    let mut heap: BinaryHeap<Reverse<(TieBreakKey, String)>> = indeg
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(rid, _)| Reverse((key(rid), rid.clone())))
        .collect();

    let mut order = Vec::new();
    let mut layers = Vec::new();

    while let Some(_) = heap.peek() {
        let mut current = Vec::new();
        while let Some(Reverse((_, rid))) = heap.pop() {
            current.push(rid);
        }
        current.sort_by_key(|rid| key(rid));

        for u in &current {
            if let Some(children) = graph.children.get(u) {
                for v in children {
                    let edge = &graph.edges[&(u.clone(), v.clone())];
                    if !edge.is_active(ctx) {
                        continue;
                    }
                    let d = indeg.get_mut(v).expect("tracked above");
                    *d -= 1;
                    if *d == 0 {
                        heap.push(Reverse((key(v), v.clone())));
                    }
                }
            }
        }

        order.extend(current.iter().cloned());
        layers.push(current);
    }

    let mut cyclic: Vec<String> = indeg
        .iter()
        .filter(|(rid, &d)| d > 0 || !order.contains(rid))
        .map(|(rid, _)| rid.clone())
        .collect();
    cyclic.sort_by_key(|rid| key(rid));

    if !cyclic.is_empty() {
        tracing::warn!(
            count = cyclic.len(),
            rules = ?cyclic,
            "cyclic nodes appended after Kahn's drain"
        );
        order.extend(cyclic.iter().cloned());
        layers.push(cyclic.clone());
    }

    (order, layers, cyclic)
}

/// Turn a parent-preserving [`PlanGraph`] into an index-based
/// [`ValidationPlan`] ready for execution.
pub fn compile_validation_plan(
    graph: PlanGraph,
    rules: &IndexMap<String, Rule>,
    ctx: &ExecContext
) -> AppResult<ValidationPlan> {
    let (order, layer_ids, cyclic_rule_ids) = topo_schedule(&graph, rules, ctx);

    let id_to_idx: IndexMap<String, usize> = order
        .iter()
        .enumerate()
        .map(|(i, rid)| (rid.clone(), i))
        .collect();

    let mut nodes: Vec<Option<ExecNode>> = (0..order.len()).map(|_| None).collect();

    for rid in &order {
        let idx = id_to_idx[rid];
        let pg_node = &graph.nodes[rid];

        let mut pairs: Vec<(usize, EdgeCtx)> = pg_node
            .parents
            .iter()
            .filter_map(|pid| {
                id_to_idx
                    .get(pid)
                    .map(|&pidx| (pidx, graph.edges[&(pid.clone(), rid.clone())].clone()))
            })
            .collect();
        pairs.sort_by_key(|(idx, _)| *idx);

        let (parent_idxs, parent_edges) = pairs.into_iter().unzip();

        nodes[idx] = Some(ExecNode {
            rule_id: rid.clone(),
            idx,
            parent_idxs,
            parent_edges
        });
    }

    let nodes: Vec<ExecNode> = nodes.into_iter().map(|n| n.expect("every idx filled")).collect();

    let layers: Vec<Vec<usize>> = layer_ids
        .into_iter()
        .map(|layer| layer.into_iter().map(|rid| id_to_idx[&rid]).collect())
        .collect();

    Ok(ValidationPlan {
        nodes,
        id_to_idx,
        layers,
        plan_graph: graph,
        cyclic_rule_ids
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, Keyword, Requirement, ValidationCriteria};

    fn simple_rule(rule_id: &str, entity_type: EntityType, deps: Vec<&str>) -> Rule {
        Rule {
            rule_id: rule_id.to_string(),
            function: "Presence".to_string(),
            reference: "Col".to_string(),
            entity_type,
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

    #[test]
    fn linear_chain_orders_topologically() {
        let mut rules = IndexMap::new();
        rules.insert("A-001-M".to_string(), simple_rule("A-001-M", EntityType::Column, vec![]));
        rules.insert(
            "B-002-M".to_string(),
            simple_rule("B-002-M", EntityType::Column, vec!["A-001-M"])
        );

        let graph = PlanBuilder::new(&rules)
            .build(["B-002-M".to_string()])
            .unwrap();
        let plan = compile_validation_plan(graph, &rules, &ExecContext::default()).unwrap();

        let a_idx = plan.id_to_idx["A-001-M"];
        let b_idx = plan.id_to_idx["B-002-M"];
        assert!(a_idx < b_idx);
        assert!(plan.cyclic_rule_ids.is_empty());
    }

    #[test]
    fn self_referencing_dependency_is_dropped() {
        let mut graph = PlanGraph::default();
        graph.nodes.insert(
            "A".to_string(),
            PlanNode {
                rule_id: "A".to_string(),
                parents: vec![]
            }
        );
        graph.add_edge("A", "A", EdgeCtx::new(EdgeKind::DataDep, "self"));
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn cycle_is_appended_not_fatal() {
        let mut rules = IndexMap::new();
        rules.insert(
            "A-001-M".to_string(),
            simple_rule("A-001-M", EntityType::Column, vec!["B-002-M"])
        );
        rules.insert(
            "B-002-M".to_string(),
            simple_rule("B-002-M", EntityType::Column, vec!["A-001-M"])
        );

        let mut graph = PlanGraph::default();
        graph.nodes.insert(
            "A-001-M".to_string(),
            PlanNode {
                rule_id: "A-001-M".to_string(),
                parents: vec!["B-002-M".to_string()]
            }
        );
        graph.nodes.insert(
            "B-002-M".to_string(),
            PlanNode {
                rule_id: "B-002-M".to_string(),
                parents: vec!["A-001-M".to_string()]
            }
        );
        graph.add_edge("B-002-M", "A-001-M", EdgeCtx::new(EdgeKind::DataDep, "b->a"));
        graph.add_edge("A-001-M", "B-002-M", EdgeCtx::new(EdgeKind::DataDep, "a->b"));

        let plan = compile_validation_plan(graph, &rules, &ExecContext::default()).unwrap();
        assert_eq!(plan.nodes.len(), 2);
        assert_eq!(plan.cyclic_rule_ids.len(), 2);
    }

    #[test]
    fn conditioned_rule_gates_its_inbound_edges() {
        let mut rules = IndexMap::new();
        rules.insert("A-001-M".to_string(), simple_rule("A-001-M", EntityType::Column, vec![]));

        let mut conditioned = simple_rule("B-002-C", EntityType::Column, vec!["A-001-M"]);
        conditioned.validation_criteria.condition = Some(Requirement::CheckValue {
            column_name: "ChargeCategory".to_string(),
            value: Some(serde_json::json!("Usage"))
        });
        rules.insert("B-002-C".to_string(), conditioned);

        let graph = PlanBuilder::new(&rules)
            .build(["B-002-C".to_string()])
            .unwrap();

        let edge = &graph.edges[&("A-001-M".to_string(), "B-002-C".to_string())];
        assert_eq!(edge.kind, EdgeKind::Applicability);
        assert!(edge.note.contains("gated by condition on B-002-C"));
    }
}
