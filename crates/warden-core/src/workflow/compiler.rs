//! Workflow graph compiler.
//!
//! Turns a [`WorkflowDefinition`] into an immutable [`CompiledGraph`]:
//! refs are checked, every edge target must exist, every expression must
//! parse, `ACTIONS.<ref>` reads must point at a transitive upstream, and
//! dependency cycles are rejected. The compiled graph is shared read-only
//! (behind an `Arc`) by every run of the same definition version.
//!
//! run-if conditions and loops are node attributes, not edges, so they never
//! participate in cycle detection.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use petgraph::Direction;
use petgraph::algo::{has_path_connecting, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use thiserror::Error;
use warden_types::workflow::{ActionNode, Dependency, WorkflowConfig, WorkflowDefinition};

use crate::expression::{self, ForEach, Template};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// One problem found in a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// The offending action, or `None` for workflow-level problems.
    pub action_ref: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn workflow(message: impl Into<String>) -> Self {
        Self {
            action_ref: None,
            message: message.into(),
        }
    }

    fn action(action_ref: &str, message: impl Into<String>) -> Self {
        Self {
            action_ref: Some(action_ref.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action_ref {
            Some(r) => write!(f, "action '{r}': {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Definition-time failure. Fatal: the workflow cannot run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("invalid workflow definition: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// Every action that belongs to the offending cycle, in declaration order.
    #[error("dependency cycle detected between actions: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CompileError {
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            Self::Validation(issues) => issues,
            Self::Cycle(_) => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled graph
// ---------------------------------------------------------------------------

/// A node with its parsed expressions and resolved adjacency.
#[derive(Debug, Clone)]
pub struct CompiledNode {
    pub definition: ActionNode,
    pub upstream: Vec<Dependency>,
    /// Direct successors, in declaration order.
    pub downstream: Vec<String>,
    pub run_if: Option<Template>,
    pub for_each: Option<ForEach>,
    /// Every `ACTIONS.<ref>` read by args, run-if or the loop header.
    pub reads: BTreeSet<String>,
}

impl CompiledNode {
    pub fn action_ref(&self) -> &str {
        &self.definition.action_ref
    }

    pub fn action_type(&self) -> &str {
        &self.definition.action
    }
}

/// Immutable, validated execution graph for one definition version.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    workflow_id: String,
    version: u32,
    config: WorkflowConfig,
    /// Nodes in topological order.
    nodes: Vec<CompiledNode>,
    index: HashMap<String, usize>,
    entrypoints: Vec<String>,
}

impl CompiledGraph {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, action_ref: &str) -> Option<&CompiledNode> {
        self.index.get(action_ref).map(|&i| &self.nodes[i])
    }

    /// Nodes in topological order.
    pub fn nodes(&self) -> impl Iterator<Item = &CompiledNode> {
        self.nodes.iter()
    }

    /// Refs in an order where every upstream precedes its dependents.
    pub fn topological_order(&self) -> Vec<&str> {
        self.nodes.iter().map(CompiledNode::action_ref).collect()
    }

    /// Actions with no dependencies; they start as soon as a run begins.
    pub fn entrypoints(&self) -> &[String] {
        &self.entrypoints
    }

    pub fn upstream(&self, action_ref: &str) -> &[Dependency] {
        self.node(action_ref).map_or(&[], |n| n.upstream.as_slice())
    }

    pub fn downstream(&self, action_ref: &str) -> &[String] {
        self.node(action_ref).map_or(&[], |n| n.downstream.as_slice())
    }

    /// Every action transitively downstream of `action_ref`.
    pub fn descendants(&self, action_ref: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut queue: VecDeque<&str> = self.downstream(action_ref).iter().map(String::as_str).collect();
        while let Some(next) = queue.pop_front() {
            if found.insert(next.to_string()) {
                queue.extend(self.downstream(next).iter().map(String::as_str));
            }
        }
        found
    }

    /// Group nodes by dependency depth. Nodes in the same wave have no edges
    /// between them. Used for display; the orchestrator schedules by events.
    pub fn waves(&self) -> Vec<Vec<&str>> {
        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut waves: Vec<Vec<&str>> = Vec::new();
        for node in &self.nodes {
            let d = node
                .upstream
                .iter()
                .filter_map(|dep| depth.get(dep.action_ref.as_str()))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node.action_ref(), d);
            if waves.len() <= d {
                waves.resize_with(d + 1, Vec::new);
            }
            waves[d].push(node.action_ref());
        }
        waves
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Lowercase ASCII letters, digits and `_`, starting with a letter.
pub fn is_valid_ref(action_ref: &str) -> bool {
    let mut chars = action_ref.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

struct ParsedExpressions {
    run_if: Option<Template>,
    for_each: Option<ForEach>,
    reads: BTreeSet<String>,
}

/// Compile a definition into an executable graph.
///
/// Checks run in stages (refs, then edges and expressions, then cycles, then
/// data references). Every problem found in the first failing stage is
/// reported together.
pub fn compile(def: &WorkflowDefinition) -> Result<CompiledGraph, CompileError> {
    check_refs(def)?;
    let mut parsed = check_edges_and_expressions(def)?;

    let mut graph = DiGraph::<&str, ()>::new();
    let mut id_to_idx: HashMap<&str, NodeIndex> = HashMap::new();
    for node in &def.actions {
        let idx = graph.add_node(node.action_ref.as_str());
        id_to_idx.insert(node.action_ref.as_str(), idx);
    }
    for node in &def.actions {
        let to = id_to_idx[node.action_ref.as_str()];
        for dep in &node.depends_on {
            graph.add_edge(id_to_idx[dep.action_ref.as_str()], to, ());
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| CompileError::Cycle(cycle_members(&graph, cycle.node_id())))?;

    check_data_references(def, &graph, &id_to_idx, &parsed)?;

    let mut nodes = Vec::with_capacity(order.len());
    let mut index = HashMap::with_capacity(order.len());
    for idx in order {
        let definition = def.actions[idx.index()].clone();
        let mut successors: Vec<NodeIndex> = graph.neighbors_directed(idx, Direction::Outgoing).collect();
        successors.sort();
        successors.dedup();
        let exprs = parsed
            .remove(definition.action_ref.as_str())
            .unwrap_or(ParsedExpressions {
                run_if: None,
                for_each: None,
                reads: BTreeSet::new(),
            });
        index.insert(definition.action_ref.clone(), nodes.len());
        nodes.push(CompiledNode {
            upstream: definition.depends_on.clone(),
            downstream: successors.into_iter().map(|s| graph[s].to_string()).collect(),
            run_if: exprs.run_if,
            for_each: exprs.for_each,
            reads: exprs.reads,
            definition,
        });
    }

    let entrypoints = def
        .actions
        .iter()
        .filter(|a| a.depends_on.is_empty())
        .map(|a| a.action_ref.clone())
        .collect();

    tracing::debug!(
        workflow_id = %def.id,
        version = def.version,
        actions = nodes.len(),
        "compiled workflow graph"
    );

    Ok(CompiledGraph {
        workflow_id: def.id.clone(),
        version: def.version,
        config: def.config.clone(),
        nodes,
        index,
        entrypoints,
    })
}

fn check_refs(def: &WorkflowDefinition) -> Result<(), CompileError> {
    let mut issues = Vec::new();
    if def.actions.is_empty() {
        issues.push(ValidationIssue::workflow("workflow must declare at least one action"));
    }
    let mut seen = HashSet::new();
    for node in &def.actions {
        let r = node.action_ref.as_str();
        if !is_valid_ref(r) {
            issues.push(ValidationIssue::action(
                r,
                "refs must start with a lowercase letter and contain only lowercase letters, digits or '_'",
            ));
        }
        if !seen.insert(r) {
            issues.push(ValidationIssue::action(r, "ref is declared more than once"));
        }
        if node.action.trim().is_empty() {
            issues.push(ValidationIssue::action(r, "action type must not be empty"));
        }
    }
    finish(issues)
}

fn check_edges_and_expressions<'d>(
    def: &'d WorkflowDefinition,
) -> Result<HashMap<&'d str, ParsedExpressions>, CompileError> {
    let declared: HashSet<&str> = def.actions.iter().map(|a| a.action_ref.as_str()).collect();
    let mut issues = Vec::new();

    if let Some(entry) = def.entrypoint.as_deref().filter(|e| !declared.contains(e)) {
        issues.push(ValidationIssue::workflow(format!(
            "entrypoint '{entry}' is not a declared action"
        )));
    }

    let mut parsed = HashMap::with_capacity(def.actions.len());
    for node in &def.actions {
        let r = node.action_ref.as_str();

        let mut listed = HashSet::new();
        for dep in &node.depends_on {
            if !declared.contains(dep.action_ref.as_str()) {
                issues.push(ValidationIssue::action(
                    r,
                    format!("depends on unknown action '{}'", dep.action_ref),
                ));
            } else if !listed.insert(dep.action_ref.as_str()) {
                issues.push(ValidationIssue::action(
                    r,
                    format!("lists dependency '{}' more than once", dep.action_ref),
                ));
            }
        }

        let mut reads = BTreeSet::new();
        for (key, value) in &node.args {
            match expression::check_args(value) {
                Ok(refs) => reads.extend(refs),
                Err(e) => issues.push(ValidationIssue::action(r, format!("args.{key}: {e}"))),
            }
        }

        let run_if = match node.run_if.as_deref().map(Template::parse).transpose() {
            Ok(t) => {
                if let Some(t) = &t {
                    reads.extend(t.action_refs());
                }
                t
            }
            Err(e) => {
                issues.push(ValidationIssue::action(r, format!("run_if: {e}")));
                None
            }
        };

        let for_each = match node.for_each.as_deref().map(expression::parse_for_each).transpose() {
            Ok(header) => {
                if let Some(h) = &header {
                    reads.extend(expression::for_each_action_refs(h));
                }
                header
            }
            Err(e) => {
                issues.push(ValidationIssue::action(r, format!("for_each: {e}")));
                None
            }
        };

        parsed.insert(r, ParsedExpressions { run_if, for_each, reads });
    }

    finish(issues).map(|()| parsed)
}

fn check_data_references(
    def: &WorkflowDefinition,
    graph: &DiGraph<&str, ()>,
    id_to_idx: &HashMap<&str, NodeIndex>,
    parsed: &HashMap<&str, ParsedExpressions>,
) -> Result<(), CompileError> {
    let mut issues = Vec::new();

    for node in &def.actions {
        let r = node.action_ref.as_str();
        let Some(exprs) = parsed.get(r) else { continue };
        for read in &exprs.reads {
            let Some(&from) = id_to_idx.get(read.as_str()) else {
                issues.push(ValidationIssue::action(
                    r,
                    format!("references unknown action 'ACTIONS.{read}'"),
                ));
                continue;
            };
            if read == r {
                issues.push(ValidationIssue::action(r, "references its own result"));
            } else if !has_path_connecting(graph, from, id_to_idx[r], None) {
                issues.push(ValidationIssue::action(
                    r,
                    format!("reads 'ACTIONS.{read}' but does not depend on '{read}' directly or transitively"),
                ));
            }
        }
    }

    if let Some(entry) = &def.entrypoint {
        let mut bfs = Bfs::new(graph, id_to_idx[entry.as_str()]);
        let mut reachable = HashSet::new();
        while let Some(idx) = bfs.next(graph) {
            reachable.insert(idx);
        }
        for node in &def.actions {
            if !reachable.contains(&id_to_idx[node.action_ref.as_str()]) {
                issues.push(ValidationIssue::action(
                    &node.action_ref,
                    format!("is not reachable from entrypoint '{entry}'"),
                ));
            }
        }
    }

    finish(issues)
}

/// Members of the cycle `start` belongs to, falling back to the first cyclic
/// strongly connected component.
fn cycle_members(graph: &DiGraph<&str, ()>, start: NodeIndex) -> Vec<String> {
    let is_cyclic = |scc: &Vec<NodeIndex>| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
    let cyclic: Vec<Vec<NodeIndex>> = tarjan_scc(graph).into_iter().filter(is_cyclic).collect();
    let mut members = cyclic
        .iter()
        .find(|scc| scc.contains(&start))
        .or_else(|| cyclic.first())
        .cloned()
        .unwrap_or_else(|| vec![start]);
    members.sort();
    members.into_iter().map(|idx| graph[idx].to_string()).collect()
}

fn finish(issues: Vec<ValidationIssue>) -> Result<(), CompileError> {
    if issues.is_empty() {
        Ok(())
    } else {
        Err(CompileError::Validation(issues))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(id: &str, deps: &[&str]) -> ActionNode {
        deps.iter()
            .fold(ActionNode::new(id, "core.transform.reshape"), |node, dep| node.after(dep))
    }

    fn workflow(actions: Vec<ActionNode>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf-test".to_string(),
            version: 1,
            title: "Test".to_string(),
            description: None,
            entrypoint: None,
            actions,
            config: WorkflowConfig::default(),
        }
    }

    fn position(order: &[&str], id: &str) -> usize {
        order.iter().position(|r| *r == id).unwrap()
    }

    fn issue_messages(err: &CompileError) -> Vec<String> {
        err.issues().iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_linear_chain() {
        let graph = compile(&workflow(vec![
            action("c", &["b"]),
            action("a", &[]),
            action("b", &["a"]),
        ]))
        .unwrap();
        assert_eq!(graph.topological_order(), vec!["a", "b", "c"]);
        assert_eq!(graph.entrypoints(), &["a".to_string()]);
        assert_eq!(graph.downstream("a"), &["b".to_string()]);
        assert_eq!(graph.upstream("c")[0].action_ref, "b");
    }

    #[test]
    fn test_diamond_respects_every_edge() {
        let def = workflow(vec![
            action("a", &[]),
            action("b", &["a"]),
            action("c", &["a"]),
            action("d", &["b", "c"]),
        ]);
        let graph = compile(&def).unwrap();
        let order = graph.topological_order();
        for node in &def.actions {
            for dep in &node.depends_on {
                assert!(position(&order, &dep.action_ref) < position(&order, &node.action_ref));
            }
        }
        assert_eq!(graph.downstream("a"), &["b".to_string(), "c".to_string()]);
        let desc: Vec<String> = graph.descendants("a").into_iter().collect();
        assert_eq!(desc, vec!["b", "c", "d"]);
        assert!(graph.descendants("d").is_empty());

        let waves = graph.waves();
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0], vec!["a"]);
        assert_eq!(waves[1].len(), 2);
        assert_eq!(waves[2], vec!["d"]);
    }

    #[test]
    fn test_independent_roots_are_all_entrypoints() {
        let graph = compile(&workflow(vec![action("x", &[]), action("y", &[])])).unwrap();
        assert_eq!(graph.entrypoints().len(), 2);
        assert_eq!(graph.waves().len(), 1);
    }

    #[test]
    fn test_cycle_names_its_members() {
        let err = compile(&workflow(vec![
            action("start", &[]),
            action("a", &["start", "c"]),
            action("b", &["a"]),
            action("c", &["b"]),
        ]))
        .unwrap_err();
        match &err {
            CompileError::Cycle(members) => assert_eq!(members, &["a", "b", "c"]),
            other => panic!("expected cycle, got {other:?}"),
        }
        let msg = err.to_string();
        assert!(msg.contains("cycle"), "got: {msg}");
        assert!(msg.contains('a'), "got: {msg}");
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = compile(&workflow(vec![action("a", &["a"])])).unwrap_err();
        assert_eq!(err, CompileError::Cycle(vec!["a".to_string()]));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = compile(&workflow(vec![action("a", &["ghost"])])).unwrap_err();
        let msgs = issue_messages(&err);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("unknown action 'ghost'"), "got: {msgs:?}");
    }

    #[test]
    fn test_duplicate_and_malformed_refs_reported_together() {
        let err = compile(&workflow(vec![
            action("a", &[]),
            action("a", &[]),
            action("Bad-Ref", &[]),
        ]))
        .unwrap_err();
        let msgs = issue_messages(&err);
        assert_eq!(msgs.len(), 2, "got: {msgs:?}");
        assert!(msgs.iter().any(|m| m.contains("more than once")));
        assert!(msgs.iter().any(|m| m.starts_with("action 'Bad-Ref'")));
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let err = compile(&workflow(vec![])).unwrap_err();
        assert!(err.to_string().contains("at least one action"));
    }

    #[test]
    fn test_unparseable_expressions_are_reported_per_field() {
        let err = compile(&workflow(vec![
            action("a", &[]).with_arg("value", json!("${{ ACTIONS.a. }}")),
            action("b", &[]).with_run_if("${{ TRIGGER.x == }}"),
            action("c", &[]).with_for_each("${{ ACTIONS.a.result }}"),
        ]))
        .unwrap_err();
        let msgs = issue_messages(&err);
        assert_eq!(msgs.len(), 3, "got: {msgs:?}");
        assert!(msgs[0].contains("args.value"));
        assert!(msgs[1].contains("run_if"));
        assert!(msgs[2].contains("for_each"));
    }

    #[test]
    fn test_reference_to_non_upstream_is_rejected() {
        let err = compile(&workflow(vec![
            action("a", &[]),
            action("b", &[]).with_arg("value", json!("${{ ACTIONS.a.result }}")),
        ]))
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("does not depend on 'a'"), "got: {msg}");
    }

    #[test]
    fn test_reference_to_unknown_action_is_rejected() {
        let err = compile(&workflow(vec![
            action("a", &[]).with_run_if("${{ ACTIONS.missing.result }}"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("ACTIONS.missing"));
    }

    #[test]
    fn test_transitive_upstream_reference_is_allowed() {
        let graph = compile(&workflow(vec![
            action("a", &[]),
            action("b", &["a"]),
            action("c", &["b"])
                .with_arg("value", json!("${{ ACTIONS.a.result.value }}"))
                .with_for_each("${{ for var.item in ACTIONS.b.result }}"),
        ]))
        .unwrap();
        let c = graph.node("c").unwrap();
        assert!(c.for_each.is_some());
        assert_eq!(c.reads.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_entrypoint_must_reach_every_action() {
        let mut def = workflow(vec![action("a", &[]), action("b", &["a"]), action("orphan", &[])]);
        def.entrypoint = Some("a".to_string());
        let err = compile(&def).unwrap_err();
        let msgs = issue_messages(&err);
        assert_eq!(msgs, vec!["action 'orphan': is not reachable from entrypoint 'a'"]);

        def.entrypoint = Some("nope".to_string());
        assert!(compile(&def).unwrap_err().to_string().contains("entrypoint 'nope'"));
    }

    #[test]
    fn test_isolated_edges_still_order_nodes() {
        let graph = compile(&workflow(vec![
            ActionNode::new("cleanup", "core.transform.reshape").after_isolated("work"),
            action("work", &[]),
        ]))
        .unwrap();
        assert_eq!(graph.topological_order(), vec!["work", "cleanup"]);
        assert_eq!(graph.entrypoints(), &["work".to_string()]);
    }

    #[test]
    fn test_ref_format() {
        assert!(is_valid_ref("enrich_ip2"));
        assert!(!is_valid_ref("2fast"));
        assert!(!is_valid_ref("_private"));
        assert!(!is_valid_ref("Upper"));
        assert!(!is_valid_ref(""));
    }
}
