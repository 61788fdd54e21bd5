use crate::path::Path;
use std::fmt::{Debug, Display, Formatter};

#[derive(Debug, Clone, PartialEq)]
pub struct Solution<S, A> {
    pub path: Path<S, A>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rollout<S, A> {
    pub path: Path<S, A>,
    pub score: Option<f64>,
    /// Whether the rollout ended in a goal rather than a dead end.
    pub goal: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeExpansion<S, A> {
    pub path: Path<S, A>,
    /// Number of successors the generator produced.
    pub successors: usize,
    /// Number of children that survived evaluation and discarding.
    pub inserted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The search space or the iteration budget is exhausted.
    Completed,
    Cancelled,
    TimedOut,
    Failed(String),
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Completed => write!(f, "completed"),
            Outcome::Cancelled => write!(f, "cancelled"),
            Outcome::TimedOut => write!(f, "timed out"),
            Outcome::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event<S, A> {
    Initialized,
    NodeExpanded(NodeExpansion<S, A>),
    /// A node handed to a coworker by the distributed coordinator.
    NodeDispatched {
        coworker: String,
        path: Path<S, A>,
    },
    SolutionFound(Solution<S, A>),
    RolloutCompleted(Rollout<S, A>),
    Finished(Outcome),
}

impl<S, A> Event<S, A> {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Initialized => "initialized",
            Event::NodeExpanded(_) => "node-expanded",
            Event::NodeDispatched { .. } => "node-dispatched",
            Event::SolutionFound(_) => "solution-found",
            Event::RolloutCompleted(_) => "rollout-completed",
            Event::Finished(_) => "finished",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Event::Finished(_))
    }

    pub fn solution(&self) -> Option<&Solution<S, A>> {
        match self {
            Event::SolutionFound(s) => Some(s),
            _ => None,
        }
    }
}

impl<S: Debug, A: Debug> Display for Event<S, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Initialized | Event::Finished(Outcome::Completed) => write!(f, "{}", self.kind()),
            Event::NodeExpanded(e) => write!(
                f,
                "expanded {:?} ({} of {} children kept)",
                e.path.head(),
                e.inserted,
                e.successors
            ),
            Event::NodeDispatched { coworker, path } => {
                write!(f, "dispatched {:?} to {}", path.head(), coworker)
            }
            Event::SolutionFound(s) => write!(f, "solution {:?} score {}", s.path, s.score),
            Event::RolloutCompleted(r) => write!(f, "rollout {:?} score {:?}", r.path, r.score),
            Event::Finished(o) => write!(f, "finished: {}", o),
        }
    }
}
