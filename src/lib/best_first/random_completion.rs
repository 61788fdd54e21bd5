use crate::config::{Aggregation, RandomCompletionConfig};
use crate::error::ProblemError;
use crate::lifecycle::{Context, Interrupt, Solution};
use crate::path::Path;
use crate::problem::{Evaluation, GoalTester, GraphGenerator, GraphItem, PathEvaluator, SearchProblem};
use crossbeam::channel::{unbounded, Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, trace, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RandomCompletionStats {
    pub evaluations: usize,
    pub drawn: usize,
    pub successful: usize,
    /// Completions that got stuck in a non-goal state or ran past the depth bound.
    pub dead_ends: usize,
    pub timeouts: usize,
    pub errors: usize,
    /// Complete paths whose score was already known.
    pub cache_hits: usize,
    /// Distinct scored solutions reached.
    pub solutions: usize,
}

#[derive(Default)]
struct Counters {
    evaluations: AtomicUsize,
    drawn: AtomicUsize,
    successful: AtomicUsize,
    dead_ends: AtomicUsize,
    timeouts: AtomicUsize,
    errors: AtomicUsize,
    cache_hits: AtomicUsize,
    solutions: AtomicUsize,
}

/// Scores a path by completing it to a goal with uniformly random walks and aggregating the
/// scores the solution evaluator gives the completed paths.
///
/// Failed completions are tolerated and counted. If no completion succeeds the path is
/// unscored, which makes best-first prune it. The walks are seeded from the path itself, so
/// the score of a path does not depend on which thread evaluates it or when.
///
/// The score of every complete path is cached by its state sequence. The first time a
/// complete path gets a score it is also kept as a solution, see `take_solutions`.
pub struct RandomCompletion<S, A> {
    generator: Arc<dyn GraphGenerator<S, A>>,
    goal_tester: Arc<dyn GoalTester<S, A>>,
    solution_evaluator: Arc<dyn PathEvaluator<S, A>>,
    config: RandomCompletionConfig,
    counters: Counters,
    scores: DashMap<Vec<S>, Option<f64>>,
    found: (Sender<Solution<S, A>>, Receiver<Solution<S, A>>),
}

enum Completion {
    Scored(f64),
    DeadEnd,
}

impl<S: GraphItem, A: GraphItem> RandomCompletion<S, A> {
    /// Completes paths of `problem`, scoring complete paths with its evaluator.
    pub fn new(problem: &SearchProblem<S, A>, mut config: RandomCompletionConfig) -> Self {
        if config.samples == 0 || config.max_samples < config.samples {
            config.samples = config.samples.max(1);
            config.max_samples = config.max_samples.max(config.samples);
            warn!(
                "random completion adjusted to {} samples in at most {} draws",
                config.samples, config.max_samples
            );
        }
        RandomCompletion {
            generator: problem.generator.clone(),
            goal_tester: problem.goal_tester.clone(),
            solution_evaluator: problem.evaluator.clone(),
            config,
            counters: Counters::default(),
            scores: DashMap::new(),
            found: unbounded(),
        }
    }

    /// `problem` with its evaluator replaced by random completion over it.
    pub fn wrap(problem: &SearchProblem<S, A>, config: RandomCompletionConfig) -> (SearchProblem<S, A>, Arc<Self>) {
        let evaluator = Arc::new(RandomCompletion::new(problem, config));
        let wrapped = SearchProblem {
            evaluator: evaluator.clone(),
            ..problem.clone()
        };
        (wrapped, evaluator)
    }

    pub fn stats(&self) -> RandomCompletionStats {
        let c = &self.counters;
        RandomCompletionStats {
            evaluations: c.evaluations.load(Ordering::Relaxed),
            drawn: c.drawn.load(Ordering::Relaxed),
            successful: c.successful.load(Ordering::Relaxed),
            dead_ends: c.dead_ends.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            solutions: c.solutions.load(Ordering::Relaxed),
        }
    }

    /// The solution evaluator's score of a complete path, looked up if it is known.
    fn score_solution(&self, path: &Path<S, A>, ctx: &Context) -> Evaluation {
        let states = path.states();
        if let Some(score) = self.scores.get(&states) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(*score);
        }
        let score = self.solution_evaluator.evaluate(path, ctx)?;
        // another thread may have scored the same path in the meantime
        if let Entry::Vacant(entry) = self.scores.entry(states) {
            entry.insert(score);
            if let Some(score) = score {
                trace!("completion reached {:?} with score {}", path.head(), score);
                self.counters.solutions.fetch_add(1, Ordering::Relaxed);
                let _ = self.found.0.send(Solution {
                    path: path.clone(),
                    score,
                });
            }
        }
        Ok(score)
    }

    fn rng_for(&self, path: &Path<S, A>) -> SmallRng {
        let mut hasher = DefaultHasher::new();
        self.config.seed.hash(&mut hasher);
        for p in path.iter_back() {
            p.head().hash(&mut hasher);
        }
        SmallRng::seed_from_u64(hasher.finish())
    }

    fn complete(&self, path: &Path<S, A>, rng: &mut SmallRng, ctx: &Context) -> Result<Completion, ProblemError> {
        let mut p = path.clone();
        for _ in 0..self.config.max_depth {
            if self.goal_tester.is_goal(&p) {
                break;
            }
            ctx.check()?;
            let mut successors = self.generator.successors(p.head(), ctx)?;
            if successors.is_empty() {
                return Ok(Completion::DeadEnd);
            }
            let s = successors.swap_remove(rng.gen_range(0..successors.len()));
            p = p.extend(s.action, s.state, s.cost);
        }
        if !self.goal_tester.is_goal(&p) {
            return Ok(Completion::DeadEnd);
        }
        Ok(match self.score_solution(&p, ctx)? {
            Some(score) => Completion::Scored(score),
            None => Completion::DeadEnd,
        })
    }
}

impl<S: GraphItem, A: GraphItem> PathEvaluator<S, A> for RandomCompletion<S, A> {
    fn evaluate(&self, path: &Path<S, A>, ctx: &Context) -> Evaluation {
        self.counters.evaluations.fetch_add(1, Ordering::Relaxed);
        if self.goal_tester.is_goal(path) {
            return self.score_solution(path, ctx);
        }
        let mut rng = self.rng_for(path);
        let mut scores = Vec::with_capacity(self.config.samples);
        let mut drawn = 0;
        while scores.len() < self.config.samples && drawn < self.config.max_samples {
            ctx.check()?;
            drawn += 1;
            self.counters.drawn.fetch_add(1, Ordering::Relaxed);
            let sample_ctx = ctx.child(self.config.sample_timeout());
            match self.complete(path, &mut rng, &sample_ctx) {
                Ok(Completion::Scored(score)) => {
                    self.counters.successful.fetch_add(1, Ordering::Relaxed);
                    scores.push(score);
                }
                Ok(Completion::DeadEnd) => {
                    self.counters.dead_ends.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    if let Some(i) = ctx.interrupt() {
                        return Err(i.into());
                    }
                    match e {
                        ProblemError::Interrupted(Interrupt::TimedOut) => {
                            self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                            debug!("completion of {:?} timed out", path.head());
                        }
                        e => {
                            self.counters.errors.fetch_add(1, Ordering::Relaxed);
                            warn!("completion of {:?} failed: {}", path.head(), e);
                        }
                    }
                }
            }
        }
        if scores.is_empty() {
            debug!("no completion of {:?} in {} draws", path.head(), drawn);
            return Ok(None);
        }
        Ok(Some(match self.config.aggregation {
            Aggregation::Mean => scores.iter().sum::<f64>() / scores.len() as f64,
            Aggregation::Best => scores.iter().cloned().fold(f64::INFINITY, f64::min),
        }))
    }

    fn take_solutions(&self) -> Vec<Solution<S, A>> {
        self.found.1.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::best_first::BestFirst;
    use crate::config::BestFirstConfig;
    use crate::lifecycle::{Outcome, Run};
    use crate::toy_problems::graph::{self, node, GraphProblem};
    use crate::toy_problems::queens::{queens, Board, Conflicts};
    use std::time::Duration;

    fn config(samples: usize, max_samples: usize) -> RandomCompletionConfig {
        RandomCompletionConfig {
            samples,
            max_samples,
            ..RandomCompletionConfig::default()
        }
    }

    // 0 -> 1 -> {3 (goal, cost 3), 4 (dead end)}, 0 -> 2 (dead end)
    fn forks() -> GraphProblem {
        GraphProblem::new(5, &[(0, 1, 1.0), (0, 2, 1.0), (1, 3, 2.0), (1, 4, 1.0)], &[0], &[3])
    }

    #[test]
    fn dead_branches_are_unscored() {
        let problem = forks().into_problem();
        let rc = RandomCompletion::new(&problem, config(2, 20));
        let ctx = Context::new();
        let two = Path::root(node(0)).extend(petgraph::graph::EdgeIndex::new(1), node(2), 1.0);
        assert_eq!(rc.evaluate(&two, &ctx).unwrap(), None);
        assert_eq!(rc.stats().dead_ends, 20);

        let one = Path::root(node(0)).extend(petgraph::graph::EdgeIndex::new(0), node(1), 1.0);
        assert_eq!(rc.evaluate(&one, &ctx).unwrap(), Some(3.0));
        let stats = rc.stats();
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.evaluations, 2);
    }

    #[test]
    fn unusable_sample_counts_are_adjusted() {
        let problem = forks().into_problem();
        let rc = RandomCompletion::new(&problem, config(0, 0));
        let one = Path::root(node(0)).extend(petgraph::graph::EdgeIndex::new(0), node(1), 1.0);
        rc.evaluate(&one, &Context::new()).unwrap();
        let stats = rc.stats();
        assert_eq!(stats.drawn, 1);
        assert_eq!(stats.successful + stats.dead_ends, 1);
    }

    #[test]
    fn evaluations_are_reproducible() {
        let problem = queens(6, Conflicts);
        let a = RandomCompletion::new(&problem, config(4, 4));
        let b = RandomCompletion::new(&problem, config(4, 4));
        let path = Path::root(Board::new(6).place(2));
        let ctx = Context::new();
        let x = a.evaluate(&path, &ctx).unwrap();
        assert!(x.is_some());
        assert_eq!(x, b.evaluate(&path, &ctx).unwrap());
        assert_eq!(x, a.evaluate(&path, &ctx).unwrap());
    }

    #[test]
    fn best_is_at_most_mean() {
        let problem = queens(6, Conflicts);
        let path = Path::root(Board::new(6).place(0));
        let ctx = Context::new();
        let mean = RandomCompletion::new(&problem, config(6, 6)).evaluate(&path, &ctx).unwrap().unwrap();
        let best = RandomCompletion::new(
            &problem,
            RandomCompletionConfig {
                aggregation: Aggregation::Best,
                ..config(6, 6)
            },
        )
        .evaluate(&path, &ctx)
        .unwrap()
        .unwrap();
        assert!(best <= mean);
    }

    fn slow_goal(p: &Path<Board, usize>, ctx: &Context) -> Evaluation {
        if p.head().queens()[1] == 0 {
            ctx.sleep(Duration::from_secs(10))?;
        }
        if p.head().queens()[1] == 1 {
            return Err(ProblemError::Evaluation("unlucky".to_string()));
        }
        Ok(Some(p.head().conflicts() as f64))
    }

    #[test]
    fn failed_samples_are_tolerated_and_recorded() {
        let problem = queens(3, slow_goal);
        let rc = RandomCompletion::new(
            &problem,
            RandomCompletionConfig {
                sample_timeout_ms: Some(10),
                ..config(30, 30)
            },
        );
        let path = Path::root(Board::new(3).place(2));
        let score = rc.evaluate(&path, &Context::new()).unwrap();
        let stats = rc.stats();
        assert!(score.is_some());
        assert!(stats.timeouts > 0);
        assert!(stats.errors > 0);
        assert_eq!(stats.drawn, 30);
        assert_eq!(stats.successful + stats.timeouts + stats.errors, 30);
    }

    #[test]
    fn cancellation_is_not_swallowed() {
        let problem = queens(3, slow_goal);
        let rc = RandomCompletion::new(&problem, config(30, 30));
        let ctx = Context::new();
        ctx.set_deadline(std::time::Instant::now() + Duration::from_millis(30));
        let path = Path::root(Board::new(3).place(0));
        let r = rc.evaluate(&path, &ctx);
        assert_eq!(r, Err(ProblemError::Interrupted(Interrupt::TimedOut)));
    }

    #[test]
    fn drives_best_first() {
        let (problem, rc) = RandomCompletion::wrap(&forks().into_problem(), config(1, 60));
        let mut run = Run::new(BestFirst::new(problem, BestFirstConfig::default()));
        let solution = run.next_solution().unwrap().unwrap();
        assert_eq!(solution.path.head(), &node(3));
        assert_eq!(run.run().unwrap(), Outcome::Completed);
        // 2 and 4 are dead ends and never make it onto OPEN
        assert_eq!(run.algorithm().stats().pruned, 2);
        assert!(rc.stats().dead_ends > 0);
    }

    fn one() -> Path<graph::State, graph::Action> {
        Path::root(node(0)).extend(petgraph::graph::EdgeIndex::new(0), node(1), 1.0)
    }

    #[test]
    fn reached_goals_are_handed_out_once() {
        let rc = RandomCompletion::new(&forks().into_problem(), config(2, 20));
        let ctx = Context::new();
        assert_eq!(rc.evaluate(&one(), &ctx).unwrap(), Some(3.0));
        let found = rc.take_solutions();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path.states(), vec![node(0), node(1), node(3)]);
        assert_eq!(found[0].score, 3.0);

        rc.evaluate(&one(), &ctx).unwrap();
        assert!(rc.take_solutions().is_empty());
        let stats = rc.stats();
        assert_eq!(stats.solutions, 1);
        assert_eq!(stats.successful, 4);
        assert_eq!(stats.cache_hits, 3);
    }

    #[test]
    fn complete_paths_are_scored_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let problem = forks()
            .into_problem()
            .with_evaluator(move |p: &Path<graph::State, graph::Action>, _: &Context| -> Evaluation {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(Some(p.cost()))
            });
        let rc = RandomCompletion::new(&problem, config(5, 100));
        let ctx = Context::new();
        assert_eq!(rc.evaluate(&one(), &ctx).unwrap(), Some(3.0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let goal = one().extend(petgraph::graph::EdgeIndex::new(2), node(3), 2.0);
        assert_eq!(rc.evaluate(&goal, &ctx).unwrap(), Some(3.0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rc.take_solutions().len(), 1);
    }

    #[test]
    fn failed_scores_are_not_cached() {
        let problem = queens(3, slow_goal);
        let rc = RandomCompletion::new(&problem, config(30, 30));
        let path = Path::root(Board::new(3).place(1)).extend(1, Board::new(3).place(1).place(1), 0.0);
        // every completion of [1, 1] fails
        assert_eq!(rc.evaluate(&path, &Context::new()).unwrap(), None);
        let stats = rc.stats();
        assert_eq!(stats.errors, 30);
        assert_eq!(stats.cache_hits, 0);
        assert!(rc.take_solutions().is_empty());
    }
}
