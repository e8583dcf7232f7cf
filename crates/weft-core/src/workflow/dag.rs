//! Dependency graph, cycle detection, and batched execution planning.
//!
//! Uses `petgraph` to model step dependencies as a directed graph with edges
//! from dependency to dependent. Cycle detection is a three-color DFS so the
//! error can name the steps on the cycle. Depth-based grouping produces the
//! execution batches: a step's batch is one past the deepest of its
//! dependencies.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use weft_types::workflow::{ExecutionPlan, StepSpec};

use super::definition::ValidationError;
use super::reference::InputTemplate;

// ---------------------------------------------------------------------------
// Compiled step
// ---------------------------------------------------------------------------

/// A validated step with its input templates compiled.
#[derive(Debug, Clone)]
pub struct CompiledStep {
    pub spec: StepSpec,
    pub input: BTreeMap<String, InputTemplate>,
}

impl CompiledStep {
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn skill(&self) -> &str {
        &self.spec.skill
    }
}

// ---------------------------------------------------------------------------
// DependencyGraph
// ---------------------------------------------------------------------------

/// Validated, acyclic dependency graph of a workflow.
///
/// Only produced by [`super::definition::validate`]. Node `i` of the inner
/// graph is step `i` in declaration order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    name: String,
    steps: Vec<CompiledStep>,
    index: HashMap<String, usize>,
    graph: DiGraph<String, ()>,
    depths: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph from steps whose ids are unique and whose
    /// dependencies all exist.
    pub(crate) fn build(name: &str, steps: Vec<CompiledStep>) -> Result<Self, ValidationError> {
        let index: HashMap<String, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.spec.id.clone(), i))
            .collect();

        let mut graph = DiGraph::<String, ()>::with_capacity(steps.len(), steps.len());
        let nodes: Vec<NodeIndex> = steps
            .iter()
            .map(|s| graph.add_node(s.spec.id.clone()))
            .collect();

        for (to, step) in steps.iter().enumerate() {
            for dep in &step.spec.depends_on {
                let from = index.get(dep).ok_or_else(|| ValidationError::UnknownDependency {
                    step: step.spec.id.clone(),
                    dependency: dep.clone(),
                })?;
                // update_edge collapses repeated `depends_on` entries
                graph.update_edge(nodes[*from], nodes[to], ());
            }
        }

        let sorted = toposort(&graph, None).map_err(|cycle| ValidationError::Cycle {
            steps: vec![graph[cycle.node_id()].clone()],
        })?;

        // Depth = longest path from a root, so a step lands one batch after
        // its deepest dependency.
        let mut depths = vec![0usize; steps.len()];
        for node in sorted {
            let depth = graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|dep| depths[dep.index()] + 1)
                .max()
                .unwrap_or(0);
            depths[node.index()] = depth;
        }

        Ok(Self {
            name: name.to_string(),
            steps,
            index,
            graph,
            depths,
        })
    }

    /// Workflow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.index.contains_key(step_id)
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> &[CompiledStep] {
        &self.steps
    }

    pub fn step(&self, step_id: &str) -> Option<&CompiledStep> {
        self.index.get(step_id).map(|&i| &self.steps[i])
    }

    /// Direct dependencies of a step, sorted.
    pub fn dependencies(&self, step_id: &str) -> Vec<&str> {
        self.neighbors(step_id, Direction::Incoming)
    }

    /// Every step `step_id` transitively depends on.
    pub fn ancestors(&self, step_id: &str) -> BTreeSet<&str> {
        self.reachable(step_id, Direction::Incoming)
    }

    /// Every step that transitively depends on `step_id`.
    pub fn descendants(&self, step_id: &str) -> BTreeSet<&str> {
        self.reachable(step_id, Direction::Outgoing)
    }

    /// Batch index a step will run in.
    pub fn depth(&self, step_id: &str) -> Option<usize> {
        self.index.get(step_id).map(|&i| self.depths[i])
    }

    /// Group steps into execution batches.
    ///
    /// Batch `k` holds every step whose deepest dependency sits in batch
    /// `k - 1`; roots are batch 0. Each batch is sorted by step id.
    pub fn plan(&self) -> ExecutionPlan {
        if self.steps.is_empty() {
            return ExecutionPlan::default();
        }

        let max_depth = self.depths.iter().copied().max().unwrap_or(0);
        let mut batches: Vec<Vec<String>> = vec![Vec::new(); max_depth + 1];
        for (step, &depth) in self.steps.iter().zip(&self.depths) {
            batches[depth].push(step.spec.id.clone());
        }
        for batch in &mut batches {
            batch.sort();
        }
        ExecutionPlan::new(batches)
    }

    fn neighbors(&self, step_id: &str, direction: Direction) -> Vec<&str> {
        let Some(&i) = self.index.get(step_id) else {
            return Vec::new();
        };
        let mut ids: Vec<&str> = self
            .graph
            .neighbors_directed(NodeIndex::new(i), direction)
            .map(|n| self.graph[n].as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    fn reachable(&self, step_id: &str, direction: Direction) -> BTreeSet<&str> {
        let mut visited = BTreeSet::new();
        let Some(&start) = self.index.get(step_id) else {
            return visited;
        };

        let mut stack = vec![NodeIndex::new(start)];
        while let Some(node) = stack.pop() {
            for next in self.graph.neighbors_directed(node, direction) {
                if visited.insert(self.graph[next].as_str()) {
                    stack.push(next);
                }
            }
        }
        visited
    }
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    InProgress,
    Done,
}

/// Find a dependency cycle with a three-color DFS.
///
/// Roots are visited in declaration order and dependencies in `depends_on`
/// order. A back-edge to an in-progress step closes a cycle; the returned
/// ids run from that step along the current DFS path. Unknown dependency
/// ids are ignored.
pub fn find_cycle(steps: &[StepSpec]) -> Option<Vec<String>> {
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut color = vec![Color::Unvisited; steps.len()];
    let mut path: Vec<usize> = Vec::new();
    // Next `depends_on` position to explore for each entry on `path`.
    let mut cursor: Vec<usize> = Vec::new();

    for root in 0..steps.len() {
        if color[root] != Color::Unvisited {
            continue;
        }
        color[root] = Color::InProgress;
        path.push(root);
        cursor.push(0);

        while let (Some(&node), Some(next)) = (path.last(), cursor.last_mut()) {
            let deps = &steps[node].depends_on;
            if *next >= deps.len() {
                color[node] = Color::Done;
                path.pop();
                cursor.pop();
                continue;
            }

            let dep_id = deps[*next].as_str();
            *next += 1;
            let Some(&dep) = index.get(dep_id) else {
                continue;
            };

            match color[dep] {
                Color::Unvisited => {
                    color[dep] = Color::InProgress;
                    path.push(dep);
                    cursor.push(0);
                }
                Color::InProgress => {
                    let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                    return Some(path[start..].iter().map(|&n| steps[n].id.clone()).collect());
                }
                Color::Done => {}
            }
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, depends_on: &[&str]) -> StepSpec {
        StepSpec::new(id, "echo").depends_on(depends_on.iter().copied())
    }

    fn graph(steps: Vec<StepSpec>) -> DependencyGraph {
        let compiled = steps
            .into_iter()
            .map(|spec| CompiledStep {
                spec,
                input: BTreeMap::new(),
            })
            .collect();
        DependencyGraph::build("test", compiled).unwrap()
    }

    fn ids(batch: &[&str]) -> Vec<String> {
        batch.iter().map(|s| s.to_string()).collect()
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    #[test]
    fn test_no_dependencies_single_batch() {
        let g = graph(vec![step("c", &[]), step("a", &[]), step("b", &[])]);
        let plan = g.plan();
        assert_eq!(plan.batches, vec![ids(&["a", "b", "c"])]);
    }

    #[test]
    fn test_linear_chain() {
        let g = graph(vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])]);
        let plan = g.plan();
        assert_eq!(
            plan.batches,
            vec![ids(&["a"]), ids(&["b"]), ids(&["c"])]
        );
    }

    #[test]
    fn test_diamond() {
        let g = graph(vec![
            step("start", &[]),
            step("left", &["start"]),
            step("right", &["start"]),
            step("end", &["left", "right"]),
        ]);
        let plan = g.plan();
        assert_eq!(
            plan.batches,
            vec![ids(&["start"]), ids(&["left", "right"]), ids(&["end"])]
        );
    }

    #[test]
    fn test_step_waits_for_deepest_dependency() {
        // d depends on a (depth 0) and c (depth 2), so it lands in batch 3.
        let g = graph(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["b"]),
            step("d", &["a", "c"]),
            step("e", &[]),
        ]);
        let plan = g.plan();
        assert_eq!(
            plan.batches,
            vec![ids(&["a", "e"]), ids(&["b"]), ids(&["c"]), ids(&["d"])]
        );
        assert_eq!(g.depth("d"), Some(3));
    }

    #[test]
    fn test_batch_index_exceeds_dependency_batches() {
        let g = graph(vec![
            step("a", &[]),
            step("b", &[]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
            step("e", &["a", "d"]),
            step("f", &["b"]),
        ]);
        let plan = g.plan();
        assert_eq!(plan.step_count(), 6);
        for s in g.steps() {
            let own = plan.batch_of(s.id()).unwrap();
            for dep in &s.spec.depends_on {
                assert!(own > plan.batch_of(dep).unwrap(), "{} vs {}", s.id(), dep);
            }
        }
    }

    #[test]
    fn test_duplicate_depends_on_collapses() {
        let g = graph(vec![step("a", &[]), step("b", &["a", "a"])]);
        assert_eq!(g.dependencies("b"), vec!["a"]);
        assert_eq!(g.plan().len(), 2);
    }

    #[test]
    fn test_empty_graph_plan() {
        let g = graph(vec![]);
        assert!(g.plan().is_empty());
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[test]
    fn test_ancestors_and_descendants() {
        let g = graph(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["b"]),
            step("d", &["a"]),
        ]);
        assert_eq!(g.ancestors("c"), BTreeSet::from(["a", "b"]));
        assert_eq!(g.descendants("a"), BTreeSet::from(["b", "c", "d"]));
        assert_eq!(g.descendants("c"), BTreeSet::new());
        assert!(g.ancestors("missing").is_empty());
    }

    // -----------------------------------------------------------------------
    // Cycle detection
    // -----------------------------------------------------------------------

    #[test]
    fn test_two_step_cycle_names_both() {
        let steps = vec![step("x", &["y"]), step("y", &["x"])];
        assert_eq!(find_cycle(&steps), Some(vec!["x".to_string(), "y".to_string()]));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let steps = vec![step("a", &[]), step("b", &["b"])];
        assert_eq!(find_cycle(&steps), Some(vec!["b".to_string()]));
    }

    #[test]
    fn test_cycle_excludes_path_prefix() {
        // a -> b -> c -> d -> b: `a` is on the DFS path but not on the cycle.
        let steps = vec![
            step("a", &["b"]),
            step("b", &["c"]),
            step("c", &["d"]),
            step("d", &["b"]),
        ];
        assert_eq!(
            find_cycle(&steps),
            Some(vec!["b".to_string(), "c".to_string(), "d".to_string()])
        );
    }

    #[test]
    fn test_acyclic_has_no_cycle() {
        let steps = vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ];
        assert_eq!(find_cycle(&steps), None);
    }
}
