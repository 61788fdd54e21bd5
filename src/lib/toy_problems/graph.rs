use crate::error::ProblemError;
use crate::lifecycle::Context;
use crate::path::Path;
use crate::problem::{GoalTester, GraphGenerator, PathCost, SearchProblem, Successor};
use petgraph::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub type State = NodeIndex;
pub type Action = EdgeIndex;

/// An explicit weighted digraph dressed up as an implicit one.
pub struct GraphProblem {
    graph: DiGraph<(), f64>,
    roots: Vec<State>,
    goals: BTreeSet<State>,
    failing: BTreeSet<State>,
}

impl GraphProblem {
    pub fn new(node_count: usize, edges: &[(usize, usize, f64)], roots: &[usize], goals: &[usize]) -> Self {
        let mut graph = DiGraph::new();
        let nodes: Vec<State> = (0..node_count).map(|_| graph.add_node(())).collect();
        for &(from, to, cost) in edges {
            graph.add_edge(nodes[from], nodes[to], cost);
        }
        GraphProblem {
            graph,
            roots: roots.iter().map(|&i| nodes[i]).collect(),
            goals: goals.iter().map(|&i| nodes[i]).collect(),
            failing: BTreeSet::new(),
        }
    }

    /// A complete `branching`-ary tree of the given depth with a single goal leaf, reached by
    /// always taking the last edge.
    pub fn single_goal_tree(depth: usize, branching: usize) -> Self {
        let mut edges = vec![];
        let mut frontier = vec![0];
        let mut count = 1;
        for _ in 0..depth {
            let mut next = vec![];
            for &parent in &frontier {
                for _ in 0..branching {
                    edges.push((parent, count, 1.0));
                    next.push(count);
                    count += 1;
                }
            }
            frontier = next;
        }
        let goal = count - 1;
        GraphProblem::new(count, &edges, &[0], &[goal])
    }

    /// Makes successor generation fail on the given node.
    pub fn failing_at(mut self, node: usize) -> Self {
        self.failing.insert(NodeIndex::new(node));
        self
    }

    pub fn goals(&self) -> impl Iterator<Item = &State> {
        self.goals.iter()
    }

    pub fn into_problem(self) -> SearchProblem<State, Action> {
        let problem = Arc::new(self);
        SearchProblem {
            generator: problem.clone(),
            goal_tester: problem,
            evaluator: Arc::new(PathCost),
        }
    }
}

impl GraphGenerator<State, Action> for GraphProblem {
    fn roots(&self) -> Vec<State> {
        self.roots.clone()
    }

    fn successors(&self, s: &State, ctx: &Context) -> Result<Vec<Successor<State, Action>>, ProblemError> {
        ctx.check()?;
        if self.failing.contains(s) {
            return Err(ProblemError::Generation(format!("node {} is broken", s.index())));
        }
        // petgraph lists outgoing edges newest first
        let mut edges: Vec<_> = self.graph.edges(*s).collect();
        edges.sort_by_key(|e| e.id());
        Ok(edges
            .into_iter()
            .map(|e| Successor::with_cost(e.id(), e.target(), *e.weight()))
            .collect())
    }
}

impl GoalTester<State, Action> for GraphProblem {
    fn is_goal(&self, path: &Path<State, Action>) -> bool {
        self.goals.contains(path.head())
    }
}

/// `cost + h(head)` for a table of heuristic values; states missing from the table are pruned.
pub fn cost_plus(h: &[(usize, f64)]) -> impl Fn(&Path<State, Action>, &Context) -> crate::problem::Evaluation {
    let table: HashMap<State, f64> = h.iter().map(|&(n, v)| (NodeIndex::new(n), v)).collect();
    move |p: &Path<State, Action>, _: &Context| Ok(table.get(p.head()).map(|h| p.cost() + h))
}

pub fn node(i: usize) -> State {
    NodeIndex::new(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successors_in_insertion_order() {
        let g = GraphProblem::new(3, &[(0, 2, 1.0), (0, 1, 2.0)], &[0], &[1]);
        let s = g.successors(&node(0), &Context::new()).unwrap();
        assert_eq!(s.iter().map(|s| s.state).collect::<Vec<_>>(), vec![node(2), node(1)]);
        assert_eq!(s[1].cost, 2.0);
    }

    #[test]
    fn tree_shape() {
        let g = GraphProblem::single_goal_tree(3, 2);
        assert_eq!(g.graph.node_count(), 15);
        assert_eq!(g.goals().collect::<Vec<_>>(), vec![&node(14)]);
        let ctx = Context::new();
        assert_eq!(g.successors(&node(14), &ctx).unwrap().len(), 0);
        assert!(g.failing_at(0).successors(&node(0), &ctx).is_err());
    }
}
