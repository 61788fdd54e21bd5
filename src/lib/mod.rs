//! Anytime search over implicit graphs.
//!
//! A problem is given by a [`problem::GraphGenerator`], a [`problem::GoalTester`] and a
//! [`problem::PathEvaluator`]. Engines ([`best_first::BestFirst`], [`mcts::Mcts`],
//! [`distributed::Coordinator`]) implement [`lifecycle::Algorithm`] and are driven through a
//! [`lifecycle::Run`], which owns the event protocol.

pub mod best_first;
pub mod config;
pub mod distributed;
pub mod error;
pub mod lifecycle;
pub mod mcts;
pub mod path;
pub mod problem;
pub mod toy_problems;

pub use error::{ProblemError, SearchError};
pub use lifecycle::{Algorithm, Context, Event, Interrupt, Outcome, Run};
pub use path::Path;
pub use problem::{GraphGenerator, GoalTester, PathEvaluator, SearchProblem, Successor};
