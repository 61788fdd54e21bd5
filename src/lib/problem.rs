use crate::error::ProblemError;
use crate::lifecycle::{Context, Solution};
use crate::path::Path;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Bounds shared by states and actions.
pub trait GraphItem: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> GraphItem for T {}

#[derive(Clone, Debug, PartialEq)]
pub struct Successor<S, A> {
    pub action: A,
    pub state: S,
    pub cost: f64,
}

impl<S, A> Successor<S, A> {
    pub fn new(action: A, state: S) -> Self {
        Successor {
            action,
            state,
            cost: 1.0,
        }
    }

    pub fn with_cost(action: A, state: S, cost: f64) -> Self {
        Successor {
            action,
            state,
            cost,
        }
    }
}

/// The implicit graph: its roots and a lazy successor function.
pub trait GraphGenerator<S, A>: Send + Sync {
    fn roots(&self) -> Vec<S>;

    /// Successors in a fixed order. Long-running implementations are expected to poll
    /// `ctx` (or sleep through [`Context::sleep`]) so that they can be interrupted.
    fn successors(&self, state: &S, ctx: &Context) -> Result<Vec<Successor<S, A>>, ProblemError>;
}

pub trait GoalTester<S, A>: Send + Sync {
    fn is_goal(&self, path: &Path<S, A>) -> bool;
}

impl<S, A, F> GoalTester<S, A> for F
where
    F: Fn(&Path<S, A>) -> bool + Send + Sync,
{
    fn is_goal(&self, path: &Path<S, A>) -> bool {
        self(path)
    }
}

pub type Evaluation = Result<Option<f64>, ProblemError>;

/// Scores a path, lower is better. `Ok(None)` means the path is not worth pursuing.
pub trait PathEvaluator<S, A>: Send + Sync {
    fn evaluate(&self, path: &Path<S, A>, ctx: &Context) -> Evaluation;

    /// Complete paths the evaluator came across while scoring, each handed out once.
    fn take_solutions(&self) -> Vec<Solution<S, A>> {
        vec![]
    }
}

impl<S, A, F> PathEvaluator<S, A> for F
where
    F: Fn(&Path<S, A>, &Context) -> Evaluation + Send + Sync,
{
    fn evaluate(&self, path: &Path<S, A>, ctx: &Context) -> Evaluation {
        self(path, ctx)
    }
}

/// Everything an engine needs from the outside world.
pub struct SearchProblem<S, A> {
    pub generator: Arc<dyn GraphGenerator<S, A>>,
    pub goal_tester: Arc<dyn GoalTester<S, A>>,
    pub evaluator: Arc<dyn PathEvaluator<S, A>>,
}

impl<S, A> Clone for SearchProblem<S, A> {
    fn clone(&self) -> Self {
        SearchProblem {
            generator: self.generator.clone(),
            goal_tester: self.goal_tester.clone(),
            evaluator: self.evaluator.clone(),
        }
    }
}

impl<S: GraphItem, A: GraphItem> SearchProblem<S, A> {
    pub fn new(
        generator: impl GraphGenerator<S, A> + 'static,
        goal_tester: impl GoalTester<S, A> + 'static,
        evaluator: impl PathEvaluator<S, A> + 'static,
    ) -> Self {
        SearchProblem {
            generator: Arc::new(generator),
            goal_tester: Arc::new(goal_tester),
            evaluator: Arc::new(evaluator),
        }
    }

    pub fn with_evaluator(&self, evaluator: impl PathEvaluator<S, A> + 'static) -> Self {
        SearchProblem {
            evaluator: Arc::new(evaluator),
            ..self.clone()
        }
    }

    pub fn roots(&self) -> Vec<S> {
        self.generator.roots()
    }

    pub fn successors(&self, state: &S, ctx: &Context) -> Result<Vec<Successor<S, A>>, ProblemError> {
        self.generator.successors(state, ctx)
    }

    pub fn is_goal(&self, path: &Path<S, A>) -> bool {
        self.goal_tester.is_goal(path)
    }

    pub fn evaluate(&self, path: &Path<S, A>, ctx: &Context) -> Evaluation {
        self.evaluator.evaluate(path, ctx)
    }

    pub fn take_solutions(&self) -> Vec<Solution<S, A>> {
        self.evaluator.take_solutions()
    }
}

/// Scores a path by its cumulative cost.
pub struct PathCost;

impl<S, A> PathEvaluator<S, A> for PathCost {
    fn evaluate(&self, path: &Path<S, A>, _: &Context) -> Evaluation {
        Ok(Some(path.cost()))
    }
}
