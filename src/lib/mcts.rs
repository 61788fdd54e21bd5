mod default_policy;
mod node_store;
mod posterior;
mod preference;
mod tree_policy;

pub use default_policy::{DefaultPolicy, FirstSuccessor, UniformRandom};
pub use node_store::{ExploredGraph, NodeId, NodeStats, Record, RECENT_REWARDS};
pub use posterior::NormalGammaThompson;
pub use preference::BradleyTerry;
pub use tree_policy::{Ensemble, RiskSensitive, TreePolicy, Ucb1};

use crate::config::MctsConfig;
use crate::error::SearchError;
use crate::lifecycle::{Algorithm, Context, Event, Rollout, Solution};
use crate::path::Path;
use crate::problem::{GraphItem, SearchProblem};
use log::{debug, info, trace};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a single rollout produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutReport<S, A> {
    pub rollout: Rollout<S, A>,
    /// Set the first time a rollout reaches a scored goal.
    pub solution: Option<Solution<S, A>>,
}

/// Monte-Carlo tree search over the explored part of an implicit graph.
///
/// Every rollout descends the known tree with the tree policy, leaves it with the default
/// policy and is evaluated once at its end. The engine knows nothing about the policies
/// beyond their traits.
pub struct Mcts<S, A> {
    problem: SearchProblem<S, A>,
    tree_policy: Box<dyn TreePolicy>,
    default_policy: Box<dyn DefaultPolicy<S, A>>,
    config: MctsConfig,
    graph: ExploredGraph<S, A>,
    iterations: AtomicU64,
    best: Mutex<Option<Solution<S, A>>>,
    rng: Mutex<SmallRng>,
    pending: VecDeque<Event<S, A>>,
}

impl<S: GraphItem, A: GraphItem> Mcts<S, A> {
    pub fn new(
        problem: SearchProblem<S, A>,
        tree_policy: impl TreePolicy + 'static,
        default_policy: impl DefaultPolicy<S, A> + 'static,
        config: MctsConfig,
    ) -> Self {
        let rng = SmallRng::seed_from_u64(config.seed);
        Mcts {
            problem,
            tree_policy: Box::new(tree_policy),
            default_policy: Box::new(default_policy),
            config,
            graph: ExploredGraph::new(),
            iterations: AtomicU64::new(0),
            best: Mutex::new(None),
            rng: Mutex::new(rng),
            pending: VecDeque::new(),
        }
    }

    pub fn graph(&self) -> &ExploredGraph<S, A> {
        &self.graph
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::SeqCst)
    }

    /// The best scored goal found so far; among equal scores the shorter path.
    pub fn best_solution(&self) -> Option<Solution<S, A>> {
        self.best.lock().clone()
    }

    /// Runs one rollout. Safe to call from several threads at once, each with its own rng.
    /// Returns `None` when no root is left to select.
    pub fn rollout(&self, ctx: &Context, rng: &mut SmallRng) -> Result<Option<RolloutReport<S, A>>, SearchError> {
        let skip = self.config.taboo_exhausted;
        let policy = &self.tree_policy;
        let arm = policy.begin_rollout(rng);
        let root = match self
            .graph
            .select_root(skip, |top, roots| policy.select(arm, top, roots, rng))
        {
            Some(root) => root,
            None => return Ok(None),
        };

        let mut trail = vec![root];
        let mut current = root;
        let mut playout = false;
        let mut blocked = false;
        loop {
            ctx.check()?;
            let (path, goal, expanded) = self.graph.with_node(current, |r| (r.path.clone(), r.goal, r.expanded));
            if goal || path.depth() >= self.config.max_depth {
                break;
            }
            let next = if expanded && !playout {
                match self
                    .graph
                    .select_child(current, skip, |parent, children| policy.select(arm, parent, children, rng))
                {
                    Some(child) => child,
                    None => {
                        // every child got exhausted by a concurrent rollout
                        blocked = !self.graph.with_node(current, |r| r.children.is_empty());
                        break;
                    }
                }
            } else {
                let successors = self
                    .problem
                    .successors(path.head(), ctx)
                    .map_err(|e| SearchError::generation(path.head(), e))?;
                if successors.is_empty() {
                    self.graph.expand(current, vec![]);
                    break;
                }
                let choice = self.default_policy.choose(&path, &successors, rng);
                let children = successors
                    .into_iter()
                    .map(|s| {
                        let child = path.extend(s.action, s.state, s.cost);
                        let goal = self.problem.is_goal(&child);
                        (child, goal)
                    })
                    .collect();
                let ids = self.graph.expand(current, children);
                playout = true;
                match ids.get(choice).or_else(|| ids.last()) {
                    Some(&id) => id,
                    None => break,
                }
            };
            trail.push(next);
            current = next;
        }

        let (path, goal) = self.graph.with_node(current, |r| (r.path.clone(), r.goal));
        let score = if blocked {
            None
        } else {
            self.problem
                .evaluate(&path, ctx)
                .map_err(|e| SearchError::evaluation(path.head(), e))?
        };
        let reward = score.map(|s| self.config.objective.reward(s));
        let first = self.graph.backup(
            &trail,
            reward,
            self.config.max_depth,
            goal && score.is_some(),
            |stats, r| policy.backup(arm, stats, r),
        );
        policy.end_rollout(arm, reward);
        let n = self.iterations.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("rollout {} ended at {:?} with {:?}", n, path.head(), score);

        let solution = match (first, score) {
            (true, Some(score)) => Some(Solution {
                path: path.clone(),
                score,
            }),
            _ => None,
        };
        if let Some(s) = &solution {
            debug!("solution {:?} with score {} after {} rollouts", s.path, s.score, n);
            self.offer_best(s);
        }
        Ok(Some(RolloutReport {
            rollout: Rollout { path, score, goal },
            solution,
        }))
    }

    fn offer_best(&self, s: &Solution<S, A>) {
        let mut best = self.best.lock();
        let better = match &*best {
            None => true,
            Some(b) => {
                self.config.objective.is_better(s.score, b.score)
                    || (s.score == b.score && s.path.len() < b.path.len())
            }
        };
        if better {
            *best = Some(s.clone());
        }
    }

    fn budget_spent(&self) -> bool {
        match self.config.max_iterations {
            Some(max) => self.iterations() >= max,
            None => false,
        }
    }
}

impl<S: GraphItem, A: GraphItem> Algorithm for Mcts<S, A> {
    type State = S;
    type Action = A;

    fn name(&self) -> &'static str {
        "mcts"
    }

    fn initialize(&mut self, ctx: &Context) -> Result<(), SearchError> {
        ctx.check()?;
        for state in self.problem.roots() {
            let path = Path::root(state);
            let goal = self.problem.is_goal(&path);
            self.graph.add_root(path, goal);
        }
        info!(
            "mcts starts from {} roots (max iterations {:?}, objective {:?})",
            self.graph.len(),
            self.config.max_iterations,
            self.config.objective
        );
        Ok(())
    }

    fn advance(&mut self, ctx: &Context) -> Result<Option<Event<S, A>>, SearchError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        if self.budget_spent() {
            debug!("mcts spent its {} iterations", self.iterations());
            return Ok(None);
        }
        let report = {
            let mut rng = self.rng.lock();
            self.rollout(ctx, &mut rng)?
        };
        Ok(report.map(|r| {
            if let Some(s) = r.solution {
                self.pending.push_back(Event::SolutionFound(s));
            }
            Event::RolloutCompleted(r.rollout)
        }))
    }

    fn drain_pending(&mut self) -> Vec<Event<S, A>> {
        self.pending.drain(..).collect()
    }
}
