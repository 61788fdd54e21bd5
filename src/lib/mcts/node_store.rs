use crate::path::Path;
use crate::problem::GraphItem;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::fmt::{Display, Formatter};

/// Number of most recent rewards a node remembers for preference-based policies.
pub const RECENT_REWARDS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Reward statistics of a node.
///
/// `visits` counts every rollout through the node, `samples` only those that produced a
/// reward. Mean and variance are maintained incrementally over the samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStats {
    visits: u32,
    samples: u32,
    mean: f64,
    m2: f64,
    best: Option<f64>,
    worst: Option<f64>,
    recent: VecDeque<f64>,
}

impl NodeStats {
    pub fn record(&mut self, reward: f64) {
        self.visits += 1;
        self.samples += 1;
        let delta = reward - self.mean;
        self.mean += delta / self.samples as f64;
        self.m2 += delta * (reward - self.mean);
        self.best = Some(self.best.map_or(reward, |b| b.max(reward)));
        self.worst = Some(self.worst.map_or(reward, |w| w.min(reward)));
        if self.recent.len() == RECENT_REWARDS {
            self.recent.pop_front();
        }
        self.recent.push_back(reward);
    }

    /// A rollout through this node that produced no reward.
    pub fn record_visit(&mut self) {
        self.visits += 1;
    }

    pub fn visits(&self) -> u32 {
        self.visits
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Mean reward; negative infinity when no rollout through this node was rewarded.
    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            f64::NEG_INFINITY
        } else {
            self.mean
        }
    }

    /// Sum of squared deviations from the mean.
    pub fn m2(&self) -> f64 {
        self.m2
    }

    pub fn variance(&self) -> f64 {
        if self.samples < 2 {
            0.0
        } else {
            self.m2 / (self.samples - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn worst(&self) -> Option<f64> {
        self.worst
    }

    pub fn recent(&self) -> &VecDeque<f64> {
        &self.recent
    }
}

impl Display for NodeStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.samples == 0 {
            write!(f, "{{count: {}}}", self.visits)
        } else {
            write!(f, "{{value: {:.2}, count: {}}}", self.mean, self.visits)
        }
    }
}

pub struct Record<S, A> {
    pub path: Path<S, A>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub expanded: bool,
    pub goal: bool,
    /// The whole subtree below this node has been explored.
    pub exhausted: bool,
    pub stats: NodeStats,
    reported: bool,
}

impl<S, A> Record<S, A> {
    pub fn state(&self) -> &S {
        self.path.head()
    }

    pub fn action(&self) -> Option<&A> {
        self.path.last_action()
    }
}

struct Arena<S, A> {
    records: Vec<Record<S, A>>,
    roots: Vec<NodeId>,
    // Statistics of the virtual node above the roots.
    top: NodeStats,
    edges: HashMap<(NodeId, A), NodeId>,
}

impl<S, A> Arena<S, A> {
    fn push(&mut self, path: Path<S, A>, parent: Option<NodeId>, goal: bool) -> NodeId {
        let id = NodeId(self.records.len());
        self.records.push(Record {
            path,
            parent,
            children: vec![],
            expanded: false,
            goal,
            exhausted: false,
            stats: NodeStats::default(),
            reported: false,
        });
        id
    }
}

/// The explored part of the search graph, as a tree owned by an arena.
///
/// Nodes are created once per `(parent, action)` pair no matter how many rollouts expand the
/// parent concurrently.
pub struct ExploredGraph<S, A> {
    arena: RwLock<Arena<S, A>>,
}

impl<S: GraphItem, A: GraphItem> Default for ExploredGraph<S, A> {
    fn default() -> Self {
        ExploredGraph::new()
    }
}

impl<S: GraphItem, A: GraphItem> ExploredGraph<S, A> {
    pub fn new() -> Self {
        ExploredGraph {
            arena: RwLock::new(Arena {
                records: vec![],
                roots: vec![],
                top: NodeStats::default(),
                edges: HashMap::new(),
            }),
        }
    }

    pub fn add_root(&self, path: Path<S, A>, goal: bool) -> NodeId {
        let mut arena = self.arena.write();
        let id = arena.push(path, None, goal);
        arena.roots.push(id);
        id
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.arena.read().roots.clone()
    }

    pub fn len(&self) -> usize {
        self.arena.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.len()).map(NodeId)
    }

    pub fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Record<S, A>) -> R) -> R {
        f(&self.arena.read().records[id.0])
    }

    pub fn path(&self, id: NodeId) -> Path<S, A> {
        self.with_node(id, |r| r.path.clone())
    }

    pub fn stats(&self, id: NodeId) -> NodeStats {
        self.with_node(id, |r| r.stats.clone())
    }

    /// Statistics over all rollouts, as seen from above the roots.
    pub fn top_stats(&self) -> NodeStats {
        self.arena.read().top.clone()
    }

    pub fn child(&self, parent: NodeId, action: &A) -> Option<NodeId> {
        self.arena.read().edges.get(&(parent, action.clone())).copied()
    }

    /// Visit counts of the children of `id`, in insertion order.
    pub fn child_visits(&self, id: NodeId) -> Vec<(A, u32)> {
        let arena = self.arena.read();
        arena.records[id.0]
            .children
            .iter()
            .filter_map(|c| {
                let child = &arena.records[c.0];
                child.action().map(|a| (a.clone(), child.stats.visits()))
            })
            .collect()
    }

    pub fn is_exhausted(&self, id: NodeId) -> bool {
        self.with_node(id, |r| r.exhausted)
    }

    pub fn roots_exhausted(&self) -> bool {
        let arena = self.arena.read();
        arena.roots.iter().all(|r| arena.records[r.0].exhausted)
    }

    /// Picks a root with `select`, which sees the statistics above the roots and those of
    /// every candidate root. Returns `None` when there is no candidate.
    pub fn select_root(
        &self,
        skip_exhausted: bool,
        select: impl FnOnce(&NodeStats, &[&NodeStats]) -> usize,
    ) -> Option<NodeId> {
        let arena = self.arena.read();
        let candidates: Vec<NodeId> = arena
            .roots
            .iter()
            .copied()
            .filter(|r| !(skip_exhausted && arena.records[r.0].exhausted))
            .collect();
        Self::pick(&arena, &arena.top, candidates, select)
    }

    /// Picks a child of `parent` with `select`, like [`ExploredGraph::select_root`].
    pub fn select_child(
        &self,
        parent: NodeId,
        skip_exhausted: bool,
        select: impl FnOnce(&NodeStats, &[&NodeStats]) -> usize,
    ) -> Option<NodeId> {
        let arena = self.arena.read();
        let record = &arena.records[parent.0];
        let candidates: Vec<NodeId> = record
            .children
            .iter()
            .copied()
            .filter(|c| !(skip_exhausted && arena.records[c.0].exhausted))
            .collect();
        Self::pick(&arena, &record.stats, candidates, select)
    }

    fn pick(
        arena: &Arena<S, A>,
        parent: &NodeStats,
        candidates: Vec<NodeId>,
        select: impl FnOnce(&NodeStats, &[&NodeStats]) -> usize,
    ) -> Option<NodeId> {
        match candidates.len() {
            0 => None,
            1 => Some(candidates[0]),
            _ => {
                let stats: Vec<&NodeStats> = candidates.iter().map(|c| &arena.records[c.0].stats).collect();
                let i = select(parent, &stats);
                candidates.get(i).copied()
            }
        }
    }

    /// Marks `parent` expanded and returns the node of every child path, in order. A child
    /// that already exists for the same action is reused.
    pub fn expand(&self, parent: NodeId, children: Vec<(Path<S, A>, bool)>) -> Vec<NodeId> {
        let mut arena = self.arena.write();
        let mut ids = Vec::with_capacity(children.len());
        for (path, goal) in children {
            let action = match path.last_action() {
                Some(a) => a.clone(),
                None => continue,
            };
            let existing = arena.edges.get(&(parent, action.clone())).copied();
            let id = match existing {
                Some(id) => id,
                None => {
                    let id = arena.push(path, Some(parent), goal);
                    arena.edges.insert((parent, action), id);
                    arena.records[parent.0].children.push(id);
                    id
                }
            };
            ids.push(id);
        }
        arena.records[parent.0].expanded = true;
        ids
    }

    /// Records one rollout along `trail`, root first, under a single write lock and updates
    /// exhaustion bottom-up. Returns true if `report` is set and this is the first rollout
    /// reporting the last node of the trail.
    pub fn backup(
        &self,
        trail: &[NodeId],
        reward: Option<f64>,
        max_depth: usize,
        report: bool,
        mut update: impl FnMut(&mut NodeStats, Option<f64>),
    ) -> bool {
        let mut arena = self.arena.write();
        let arena = &mut *arena;
        update(&mut arena.top, reward);
        let mut first_report = false;
        if let Some(&last) = trail.last() {
            let record = &mut arena.records[last.0];
            if report && !record.reported {
                record.reported = true;
                first_report = true;
            }
        }
        for &id in trail.iter().rev() {
            let exhausted = {
                let r = &arena.records[id.0];
                r.goal
                    || r.path.depth() >= max_depth
                    || (r.expanded && r.children.iter().all(|c| arena.records[c.0].exhausted))
            };
            let record = &mut arena.records[id.0];
            record.exhausted = exhausted;
            update(&mut record.stats, reward);
        }
        first_report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_all(stats: &mut NodeStats, reward: Option<f64>) {
        match reward {
            Some(r) => stats.record(r),
            None => stats.record_visit(),
        }
    }

    #[test]
    fn running_statistics() {
        let mut s = NodeStats::default();
        assert_eq!(s.mean(), f64::NEG_INFINITY);
        for r in &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            s.record(*r);
        }
        s.record_visit();
        assert_eq!(s.visits(), 9);
        assert_eq!(s.samples(), 8);
        assert!((s.mean() - 5.0).abs() < 1e-12);
        assert!((s.m2() - 32.0).abs() < 1e-9);
        assert!((s.variance() - 32.0 / 7.0).abs() < 1e-9);
        assert_eq!(s.best(), Some(9.0));
        assert_eq!(s.worst(), Some(2.0));
        assert_eq!(s.recent().len(), 8);
        for _ in 0..RECENT_REWARDS {
            s.record(1.0);
        }
        assert_eq!(s.recent().len(), RECENT_REWARDS);
        assert!(s.recent().iter().all(|r| *r == 1.0));
    }

    fn child(root: &Path<u32, u32>, action: u32) -> (Path<u32, u32>, bool) {
        (root.extend(action, action * 10, 1.0), action == 2)
    }

    #[test]
    fn expansion_reuses_children() {
        let g = ExploredGraph::new();
        let root_path = Path::root(0);
        let root = g.add_root(root_path.clone(), false);
        let first = g.expand(root, vec![child(&root_path, 1), child(&root_path, 2)]);
        let again = g.expand(root, vec![child(&root_path, 2), child(&root_path, 3)]);
        assert_eq!(again[0], first[1]);
        assert_eq!(g.len(), 4);
        assert_eq!(g.child(root, &3), Some(again[1]));
        assert_eq!(g.with_node(root, |r| r.children.len()), 3);
        assert_eq!(g.with_node(first[0], |r| (r.parent, r.action().copied())), (Some(root), Some(1)));
    }

    #[test]
    fn exhaustion_propagates_up() {
        let g = ExploredGraph::new();
        let root_path = Path::root(0);
        let root = g.add_root(root_path.clone(), false);
        let kids = g.expand(root, vec![child(&root_path, 1), child(&root_path, 2)]);

        // the goal is exhausted, the root is not
        assert!(g.backup(&[root, kids[1]], Some(1.0), 10, true, record_all));
        assert!(!g.backup(&[root, kids[1]], Some(1.0), 10, true, record_all));
        assert!(g.is_exhausted(kids[1]));
        assert!(!g.is_exhausted(root));
        assert_eq!(g.select_child(root, true, |_, _| unreachable!()), Some(kids[0]));

        // dead end
        g.expand(kids[0], vec![]);
        assert!(!g.backup(&[root, kids[0]], None, 10, false, record_all));
        assert!(g.roots_exhausted());
        assert_eq!(g.select_root(true, |_, _| 0), None);
        assert_eq!(g.select_child(root, true, |_, _| 0), None);
        assert_eq!(g.stats(root).visits(), 3);
        assert_eq!(g.stats(root).samples(), 2);
        assert_eq!(g.top_stats().visits(), 3);
        assert_eq!(g.child_visits(root), vec![(1, 1), (2, 2)]);
    }

    #[test]
    fn depth_bound_exhausts() {
        let g = ExploredGraph::new();
        let root_path = Path::root(0);
        let root = g.add_root(root_path.clone(), false);
        let kids = g.expand(root, vec![child(&root_path, 1)]);
        g.backup(&[root, kids[0]], Some(0.0), 1, false, record_all);
        assert!(g.roots_exhausted());
    }
}
