mod open;
pub mod random_completion;

pub use open::{Node, Open};

use crate::config::{BestFirstConfig, Discarding};
use crate::error::{ProblemError, SearchError};
use crate::lifecycle::{Algorithm, Context, Event, Interrupt, NodeExpansion, Solution};
use crate::path::Path;
use crate::problem::{GraphItem, SearchProblem};
use dashmap::DashSet;
use log::{debug, trace, warn};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BestFirstStats {
    pub created: usize,
    pub expanded: usize,
    /// Children without a score.
    pub pruned: usize,
    /// Children dropped by the discarding policy.
    pub discarded: usize,
    /// Evaluations that failed or timed out and were tolerated.
    pub failed_evaluations: usize,
    pub solutions: usize,
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    expanded: AtomicUsize,
    pruned: AtomicUsize,
    discarded: AtomicUsize,
    failed_evaluations: AtomicUsize,
    solutions: AtomicUsize,
}

impl Counters {
    fn bump(c: &AtomicUsize) {
        c.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BestFirstStats {
        BestFirstStats {
            created: self.created.load(Ordering::Relaxed),
            expanded: self.expanded.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            failed_evaluations: self.failed_evaluations.load(Ordering::Relaxed),
            solutions: self.solutions.load(Ordering::Relaxed),
        }
    }
}

/// What one call of the batch-expansion step produced.
#[derive(Debug, Clone)]
pub struct BatchResult<S, A> {
    /// Scored children of the expanded nodes, in successor order.
    pub open: Vec<Node<S, A>>,
    pub solutions: Vec<Solution<S, A>>,
}

/// Best-first search over OPEN, anytime: goals are reported as they are popped and the
/// search carries on. Solutions the evaluator reaches on its own (see
/// `PathEvaluator::take_solutions`) are reported before the next node is popped. Every
/// state sequence is reported once.
///
/// Children of one expansion are evaluated on `threads` threads; they are inserted in
/// successor order, so the thread count never changes the event sequence.
pub struct BestFirst<S, A> {
    problem: SearchProblem<S, A>,
    config: BestFirstConfig,
    open: Open<S, A>,
    closed: DashSet<S>,
    counters: Counters,
    bootstrap: Option<Vec<Node<S, A>>>,
    reported: HashSet<Vec<S>>,
    found: VecDeque<Solution<S, A>>,
}

impl<S: GraphItem, A: GraphItem> BestFirst<S, A> {
    pub fn new(problem: SearchProblem<S, A>, mut config: BestFirstConfig) -> Self {
        if config.threads == 0 {
            warn!("best-first needs at least one evaluation thread, using 1");
            config.threads = 1;
        }
        BestFirst {
            open: Open::new(config.discarding != Discarding::None),
            problem,
            config,
            closed: DashSet::new(),
            counters: Counters::default(),
            bootstrap: None,
            reported: HashSet::new(),
            found: VecDeque::new(),
        }
    }

    /// Starts from the given nodes instead of the problem's roots.
    pub fn bootstrap(problem: SearchProblem<S, A>, config: BestFirstConfig, nodes: Vec<Node<S, A>>) -> Self {
        let mut search = BestFirst::new(problem, config);
        search.bootstrap = Some(nodes);
        search
    }

    pub fn problem(&self) -> &SearchProblem<S, A> {
        &self.problem
    }

    pub fn stats(&self) -> BestFirstStats {
        self.counters.snapshot()
    }

    pub fn open_len(&self) -> usize {
        self.open.len()
    }

    pub fn peek_score(&self) -> Option<f64> {
        self.open.peek_score()
    }

    pub fn open_snapshot(&self) -> Vec<Node<S, A>> {
        self.open.snapshot()
    }

    pub(crate) fn drain_open(&mut self) -> Vec<Node<S, A>> {
        self.open.drain()
    }

    pub fn is_closed(&self, state: &S) -> bool {
        self.closed.contains(state)
    }

    /// Scores the roots. Roots without a score are pruned.
    pub fn root_nodes(&self, ctx: &Context) -> Result<Vec<Node<S, A>>, SearchError> {
        let paths = self.problem.roots().into_iter().map(Path::root).collect();
        Ok(self.evaluate_all(paths, ctx)?.into_iter().flatten().collect())
    }

    /// The batch-expansion step: goals become solutions, every other node is expanded into
    /// its scored children. Neither OPEN nor CLOSED is touched.
    pub fn expand_batch(&self, nodes: Vec<Node<S, A>>, ctx: &Context) -> Result<BatchResult<S, A>, SearchError> {
        let mut result = BatchResult {
            open: vec![],
            solutions: vec![],
        };
        for node in nodes {
            if node.goal {
                result.solutions.push(Solution {
                    path: node.path,
                    score: node.score,
                });
            } else {
                let (_, children) = self.expand(&node, ctx)?;
                result.open.extend(children);
            }
        }
        result.solutions.extend(self.problem.take_solutions());
        Ok(result)
    }

    /// Generates and scores the children of `node`; returns the successor count as well.
    fn expand(&self, node: &Node<S, A>, ctx: &Context) -> Result<(usize, Vec<Node<S, A>>), SearchError> {
        let state = node.state();
        let successors = self
            .problem
            .successors(state, ctx)
            .map_err(|e| SearchError::generation(state, e))?;
        Counters::bump(&self.counters.expanded);
        let count = successors.len();

        let mut paths = Vec::with_capacity(count);
        for s in successors {
            if self.config.discarding == Discarding::All && self.closed.contains(&s.state) {
                Counters::bump(&self.counters.discarded);
                continue;
            }
            paths.push(node.path.extend(s.action, s.state, s.cost));
        }
        let children = self.evaluate_all(paths, ctx)?.into_iter().flatten().collect();
        Ok((count, children))
    }

    fn evaluate_all(&self, paths: Vec<Path<S, A>>, ctx: &Context) -> Result<Vec<Option<Node<S, A>>>, SearchError> {
        let threads = self.config.threads;
        if threads <= 1 || paths.len() <= 1 {
            return paths.into_iter().map(|p| self.evaluate(p, ctx)).collect();
        }
        let chunk = (paths.len() + threads - 1) / threads;
        let chunks = crossbeam::scope(|scope| {
            let handles: Vec<_> = paths
                .chunks(chunk)
                .map(|c| {
                    scope.spawn(move |_| {
                        c.iter()
                            .map(|p| self.evaluate(p.clone(), ctx))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
        })
        .map_err(|_| SearchError::WorkerPanicked)?;

        let mut nodes = Vec::with_capacity(paths.len());
        for chunk in chunks {
            for result in chunk.map_err(|_| SearchError::WorkerPanicked)? {
                nodes.push(result?);
            }
        }
        Ok(nodes)
    }

    fn evaluate(&self, path: Path<S, A>, ctx: &Context) -> Result<Option<Node<S, A>>, SearchError> {
        let timeout = self.config.evaluation_timeout();
        let eval_ctx = match timeout {
            Some(t) => ctx.child(Some(t)),
            None => ctx.clone(),
        };
        Counters::bump(&self.counters.created);
        match self.problem.evaluate(&path, &eval_ctx) {
            Ok(Some(score)) => {
                trace!("{:?} scored {}", path.head(), score);
                let goal = self.problem.is_goal(&path);
                Ok(Some(Node { path, score, goal }))
            }
            Ok(None) => {
                Counters::bump(&self.counters.pruned);
                trace!("{:?} pruned", path.head());
                Ok(None)
            }
            Err(e) => {
                if let Some(i) = ctx.interrupt() {
                    return Err(i.into());
                }
                let timed_out = timeout.is_some()
                    && matches!(e, ProblemError::Interrupted(Interrupt::TimedOut));
                if !timed_out && !self.config.tolerate_evaluation_failures {
                    return Err(SearchError::evaluation(path.head(), e));
                }
                Counters::bump(&self.counters.failed_evaluations);
                warn!("pruning {:?}: {}", path.head(), e);
                Ok(None)
            }
        }
    }

    fn insert_children(&mut self, children: Vec<Node<S, A>>) -> usize {
        let mut inserted = 0;
        for child in children {
            let accepted = match self.config.discarding {
                Discarding::None => {
                    self.open.insert(child);
                    true
                }
                Discarding::OpenOnly => self.open.offer(child),
                Discarding::All => !self.closed.contains(child.state()) && self.open.offer(child),
            };
            if accepted {
                inserted += 1;
            } else {
                Counters::bump(&self.counters.discarded);
            }
        }
        inserted
    }

    /// Merges externally expanded nodes into OPEN under the discarding policy.
    pub(crate) fn merge(&mut self, nodes: Vec<Node<S, A>>) -> usize {
        self.insert_children(nodes)
    }

    pub(crate) fn take_open(&mut self, n: usize) -> Vec<Node<S, A>> {
        self.open.take(n)
    }

    /// Queues what the evaluator reached since the last call, minus what was reported.
    fn collect_found(&mut self) {
        for solution in self.problem.take_solutions() {
            if self.reported.insert(solution.path.states()) {
                debug!("evaluator reached {:?} with score {}", solution.path, solution.score);
                self.found.push_back(solution);
            }
        }
    }

    fn report(&self, solution: Solution<S, A>) -> Event<S, A> {
        Counters::bump(&self.counters.solutions);
        Event::SolutionFound(solution)
    }
}

impl<S: GraphItem, A: GraphItem> Algorithm for BestFirst<S, A> {
    type State = S;
    type Action = A;

    fn name(&self) -> &'static str {
        "best-first"
    }

    fn initialize(&mut self, ctx: &Context) -> Result<(), SearchError> {
        let nodes = match self.bootstrap.take() {
            Some(nodes) => nodes,
            None => self.root_nodes(ctx)?,
        };
        debug!("best-first starts with {} nodes", nodes.len());
        self.insert_children(nodes);
        Ok(())
    }

    fn advance(&mut self, ctx: &Context) -> Result<Option<Event<S, A>>, SearchError> {
        self.collect_found();
        if let Some(solution) = self.found.pop_front() {
            return Ok(Some(self.report(solution)));
        }
        let node = loop {
            let node = match self.open.pop() {
                Some(node) => node,
                None => return Ok(None),
            };
            if !node.goal {
                break node;
            }
            if !self.reported.insert(node.path.states()) {
                trace!("{:?} was already reported", node.path);
                continue;
            }
            debug!("solution {:?} with score {}", node.path, node.score);
            return Ok(Some(self.report(Solution {
                path: node.path,
                score: node.score,
            })));
        };
        let (successors, children) = self.expand(&node, ctx)?;
        if self.config.discarding == Discarding::All {
            self.closed.insert(node.state().clone());
        }
        let inserted = self.insert_children(children);
        debug!(
            "expanded {:?}: {} successors, {} kept, {} open",
            node.state(),
            successors,
            inserted,
            self.open.len()
        );
        Ok(Some(Event::NodeExpanded(NodeExpansion {
            path: node.path,
            successors,
            inserted,
        })))
    }

    fn drain_pending(&mut self) -> Vec<Event<S, A>> {
        self.collect_found();
        let found: Vec<_> = self.found.drain(..).collect();
        found.into_iter().map(|s| self.report(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::tests::assert_protocol;
    use crate::lifecycle::{Outcome, Run};
    use crate::best_first::random_completion::RandomCompletion;
    use crate::config::RandomCompletionConfig;
    use crate::problem::Evaluation;
    use crate::toy_problems::graph::{self, cost_plus, node, GraphProblem};
    use crate::toy_problems::queens::{queens, AttackedCells, Board, BoardFilled, Conflicts, Queens, Slowed};
    use std::thread;
    use std::time::{Duration, Instant};

    fn config(threads: usize, discarding: Discarding) -> BestFirstConfig {
        BestFirstConfig {
            threads,
            discarding,
            ..BestFirstConfig::default()
        }
    }

    fn solutions<S: GraphItem, A: GraphItem>(run: &Run<BestFirst<S, A>>) -> Vec<Solution<S, A>> {
        run.events().iter().filter_map(|e| e.solution().cloned()).collect()
    }

    #[test_log::test]
    fn three_queens_by_attacked_cells() {
        let mut run = Run::new(BestFirst::new(queens(3, AttackedCells), BestFirstConfig::default()));
        let first = run.next_solution().unwrap().unwrap();
        assert_eq!(first.path.len(), 3);
        assert_eq!(first.path.head().attacked_cells(), 0);
        assert_eq!(first.score, 0.0);
        assert_eq!(run.run().unwrap(), Outcome::Completed);
        assert_protocol(run.events());
        // every full board is a goal
        assert_eq!(solutions(&run).len(), 27);
    }

    #[test]
    fn monotone_scores_give_ordered_solutions() {
        let mut run = Run::new(BestFirst::new(queens(4, Conflicts), BestFirstConfig::default()));
        run.run().unwrap();
        let scores: Vec<f64> = solutions(&run).iter().map(|s| s.score).collect();
        assert_eq!(scores.len(), 256);
        assert!(scores.windows(2).all(|w| w[0] <= w[1]));
        // the two real 4-queens solutions come first
        assert_eq!(&scores[..3], &[0.0, 0.0, 1.0]);
        assert_eq!(run.algorithm().stats().solutions, 256);
    }

    #[test]
    fn uniform_cost_returns_cheapest_paths_first() {
        let g = GraphProblem::new(
            6,
            &[(0, 1, 1.0), (0, 2, 4.0), (1, 3, 5.0), (2, 3, 1.0), (1, 4, 1.0), (4, 5, 1.0), (3, 5, 1.0)],
            &[0],
            &[3, 5],
        );
        let mut run = Run::new(BestFirst::new(g.into_problem(), BestFirstConfig::default()));
        run.run().unwrap();
        let found: Vec<(f64, usize)> = solutions(&run)
            .iter()
            .map(|s| (s.score, s.path.head().index()))
            .collect();
        // goals are not expanded, so 5 is never reached through 3
        assert_eq!(found, vec![(3.0, 5), (5.0, 3), (6.0, 3)]);
    }

    // 0 -> 1 -> 3 is expensive but looks cheap, 0 -> 2 -> 3 is cheap but looks expensive.
    fn misleading() -> SearchProblem<graph::State, graph::Action> {
        let g = GraphProblem::new(
            5,
            &[(0, 1, 1.0), (0, 2, 1.0), (1, 3, 10.0), (2, 3, 1.0), (3, 4, 1.0)],
            &[0],
            &[4],
        );
        g.into_problem()
            .with_evaluator(cost_plus(&[(0, 0.0), (1, 0.0), (2, 20.0), (3, 0.0), (4, 0.0)]))
    }

    #[test]
    fn discarding_all_can_lose_the_optimum() {
        let costs = |d: Discarding| {
            let mut run = Run::new(BestFirst::new(misleading(), config(1, d)));
            run.run().unwrap();
            solutions(&run).iter().map(|s| s.path.cost()).collect::<Vec<_>>()
        };
        assert_eq!(costs(Discarding::None), vec![12.0, 3.0]);
        // both copies of 3 are never on OPEN at the same time
        assert_eq!(costs(Discarding::OpenOnly), vec![12.0, 3.0]);
        // once 3 is closed its cheaper path is thrown away
        assert_eq!(costs(Discarding::All), vec![12.0]);
    }

    #[test]
    fn discarding_all_is_exact_with_path_cost() {
        let mut run = Run::new(BestFirst::new(
            GraphProblem::new(
                5,
                &[(0, 1, 1.0), (0, 2, 1.0), (1, 3, 10.0), (2, 3, 1.0), (3, 4, 1.0), (3, 1, 1.0)],
                &[0],
                &[4],
            )
            .into_problem(),
            config(1, Discarding::All),
        ));
        let first = run.next_solution().unwrap().unwrap();
        assert_eq!(first.path.cost(), 3.0);
        run.run().unwrap();
        assert_eq!(solutions(&run).len(), 1);
        assert!(run.algorithm().is_closed(&node(3)));
        assert!(run.algorithm().stats().discarded > 0);
    }

    #[test]
    fn generation_failure_is_fatal() {
        let g = GraphProblem::new(3, &[(0, 1, 1.0), (1, 2, 1.0)], &[0], &[2]).failing_at(1);
        let mut run = Run::new(BestFirst::new(g.into_problem(), BestFirstConfig::default()));
        let e = run.run().unwrap_err();
        assert!(matches!(e, SearchError::Generation { .. }));
        assert!(matches!(run.outcome(), Some(Outcome::Failed(_))));
        assert_protocol(run.events());
    }

    fn flaky(p: &Path<Board, usize>, _: &Context) -> Evaluation {
        if p.head().queens().last() == Some(&1) {
            Err(ProblemError::Evaluation("column one".to_string()))
        } else {
            Ok(Some(p.head().conflicts() as f64))
        }
    }

    #[test]
    fn evaluation_failures_can_be_tolerated() {
        let problem = SearchProblem::new(Queens::new(4), BoardFilled, flaky);
        let mut run = Run::new(BestFirst::new(problem.clone(), BestFirstConfig::default()));
        assert!(matches!(run.run(), Err(SearchError::Evaluation { .. })));

        let tolerant = BestFirstConfig {
            tolerate_evaluation_failures: true,
            ..BestFirstConfig::default()
        };
        let mut run = Run::new(BestFirst::new(problem, tolerant));
        assert_eq!(run.run().unwrap(), Outcome::Completed);
        let stats = run.algorithm().stats();
        assert!(stats.failed_evaluations > 0);
        assert!(solutions(&run)
            .iter()
            .all(|s| !s.path.head().queens().contains(&1)));
    }

    #[test]
    fn slow_evaluations_are_pruned_by_the_evaluation_timeout() {
        let slow_when_first_queen_is_zero = |p: &Path<Board, usize>, ctx: &Context| -> Evaluation {
            if p.head().queens()[0] == 0 {
                ctx.sleep(Duration::from_secs(5))?;
            }
            Ok(Some(0.0))
        };
        let problem = SearchProblem::new(Queens::new(3), BoardFilled, slow_when_first_queen_is_zero);
        let config = BestFirstConfig {
            evaluation_timeout_ms: Some(20),
            ..BestFirstConfig::default()
        };
        let mut run = Run::new(BestFirst::new(problem, config));
        let t = Instant::now();
        assert_eq!(run.run().unwrap(), Outcome::Completed);
        assert!(t.elapsed() < Duration::from_secs(2));
        assert_eq!(run.algorithm().stats().failed_evaluations, 1);
        assert!(solutions(&run).iter().all(|s| s.path.head().queens()[0] != 0));
    }

    #[test]
    fn zero_threads_fall_back_to_one() {
        let mut run = Run::new(BestFirst::new(queens(3, AttackedCells), config(0, Discarding::None)));
        assert_eq!(run.run().unwrap(), Outcome::Completed);
        assert_eq!(solutions(&run).len(), 27);
    }

    #[test]
    fn pruned_roots_leave_nothing_to_do() {
        let problem = queens(3, |_: &Path<Board, usize>, _: &Context| -> Evaluation { Ok(None) });
        let mut run = Run::new(BestFirst::new(problem, BestFirstConfig::default()));
        assert_eq!(run.run().unwrap(), Outcome::Completed);
        assert_eq!(run.events().len(), 2);
        assert_eq!(run.algorithm().stats().pruned, 3);
    }

    #[test]
    fn thread_count_does_not_change_events() {
        let events = |threads| {
            let mut run = Run::new(BestFirst::new(queens(5, Conflicts), config(threads, Discarding::OpenOnly)));
            for _ in 0..200 {
                run.step().unwrap();
            }
            run.events().to_vec()
        };
        assert_eq!(events(1), events(4));
    }

    fn slowed_eight_queens() -> SearchProblem<Board, usize> {
        SearchProblem::new(
            Queens::slowed(8, Duration::from_millis(20)),
            BoardFilled,
            Slowed {
                inner: Conflicts,
                delay: Duration::from_millis(5),
            },
        )
    }

    #[test_log::test]
    fn cancellation_within_grace_period() {
        for threads in vec![1, 4] {
            let mut run = Run::new(BestFirst::new(slowed_eight_queens(), config(threads, Discarding::None)));
            let handle = run.cancel_handle();
            let canceller = thread::spawn(move || {
                thread::sleep(Duration::from_millis(150));
                handle.cancel();
                Instant::now()
            });
            assert_eq!(run.run().unwrap(), Outcome::Cancelled);
            let latency = canceller.join().unwrap().elapsed();
            assert!(latency < run.grace_period(), "{} threads took {:?}", threads, latency);
            assert_protocol(run.events());
        }
    }

    #[test]
    fn timeout_within_grace_period() {
        for threads in vec![1, 4] {
            let mut run = Run::new(BestFirst::new(slowed_eight_queens(), config(threads, Discarding::None)));
            let timeout = Duration::from_millis(200);
            run.set_timeout(timeout);
            assert_eq!(run.run().unwrap(), Outcome::TimedOut);
            assert!(run.elapsed() >= timeout);
            assert!(run.elapsed() <= timeout + run.grace_period());
            assert_protocol(run.events());
        }
    }

    #[test]
    fn bootstrap_and_batches() {
        let problem = queens(4, Conflicts);
        let search = BestFirst::new(problem.clone(), BestFirstConfig::default());
        let ctx = Context::new();
        let roots = search.root_nodes(&ctx).unwrap();
        assert_eq!(roots.len(), 4);

        let batch = search.expand_batch(roots[..2].to_vec(), &ctx).unwrap();
        assert_eq!(batch.open.len(), 8);
        assert!(batch.solutions.is_empty());
        assert_eq!(search.stats().expanded, 2);

        let mut run = Run::new(BestFirst::bootstrap(problem, BestFirstConfig::default(), batch.open));
        run.run().unwrap();
        // only boards starting in column 0 or 1 remain reachable
        let found = solutions(&run);
        assert_eq!(found.len(), 2 * 64);
        assert_eq!(found[0].path.head().queens().to_vec(), vec![1, 3, 0, 2]);
    }

    fn completed_forks() -> SearchProblem<graph::State, graph::Action> {
        // 0 -> 1 -> {3 (goal), 4 (dead end)}, 0 -> 2 (dead end)
        let g = GraphProblem::new(5, &[(0, 1, 1.0), (0, 2, 1.0), (1, 3, 2.0), (1, 4, 1.0)], &[0], &[3]);
        let config = RandomCompletionConfig {
            samples: 1,
            max_samples: 60,
            ..RandomCompletionConfig::default()
        };
        RandomCompletion::wrap(&g.into_problem(), config).0
    }

    #[test_log::test]
    fn completions_report_goals_before_they_are_popped() {
        let mut run = Run::new(BestFirst::new(completed_forks(), BestFirstConfig::default()));
        run.run().unwrap();
        assert_protocol(run.events());
        let kinds: Vec<&str> = run.events().iter().map(|e| e.kind()).collect();
        // the completion of the root already ends in 3
        assert_eq!(&kinds[..2], &["initialized", "solution-found"]);
        let found = solutions(&run);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path.states(), vec![node(0), node(1), node(3)]);
        assert_eq!(found[0].score, 3.0);
        assert_eq!(run.algorithm().stats().solutions, 1);
    }

    #[test]
    fn completed_solutions_survive_a_cancel() {
        let mut run = Run::new(BestFirst::new(completed_forks(), BestFirstConfig::default()));
        run.step().unwrap();
        run.cancel();
        assert_eq!(run.run().unwrap(), Outcome::Cancelled);
        let kinds: Vec<&str> = run.events().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["initialized", "solution-found", "finished"]);
    }

    #[test]
    fn batches_carry_completed_solutions() {
        let search = BestFirst::new(completed_forks(), BestFirstConfig::default());
        let ctx = Context::new();
        let roots = search.root_nodes(&ctx).unwrap();
        let batch = search.expand_batch(roots, &ctx).unwrap();
        assert_eq!(batch.solutions.len(), 1);
        assert_eq!(batch.solutions[0].path.head(), &node(3));
        // 2 is a dead end
        assert_eq!(batch.open.len(), 1);
        assert!(search.expand_batch(batch.open, &ctx).unwrap().solutions.is_empty());
    }
}
