use crate::lifecycle::Interrupt;
use thiserror::Error;

/// Errors raised by problem code: generators and evaluators.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProblemError {
    #[error("successor generation failed: {0}")]
    Generation(String),
    #[error("evaluation failed: {0}")]
    Evaluation(String),
    #[error("interrupted: {0}")]
    Interrupted(Interrupt),
    /// The unit of execution running the problem code was stopped from the outside.
    #[error("preempted")]
    Preempted,
}

impl From<Interrupt> for ProblemError {
    fn from(i: Interrupt) -> Self {
        ProblemError::Interrupted(i)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown coworker {0}")]
    UnknownCoworker(String),
    #[error("coworker {0} disconnected")]
    Disconnected(String),
    #[error("coworker {0} already holds a job")]
    Busy(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    #[error("could not generate successors of {state}: {source}")]
    Generation { state: String, source: ProblemError },
    #[error("could not evaluate path to {path}: {source}")]
    Evaluation { path: String, source: ProblemError },
    #[error("interrupted: {0}")]
    Interrupted(Interrupt),
    #[error("preempted")]
    Preempted,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("a worker thread panicked")]
    WorkerPanicked,
}

impl From<Interrupt> for SearchError {
    fn from(i: Interrupt) -> Self {
        SearchError::Interrupted(i)
    }
}

impl SearchError {
    pub(crate) fn generation<S: std::fmt::Debug>(state: &S, source: ProblemError) -> Self {
        match source {
            ProblemError::Interrupted(i) => SearchError::Interrupted(i),
            ProblemError::Preempted => SearchError::Preempted,
            source => SearchError::Generation {
                state: format!("{:?}", state),
                source,
            },
        }
    }

    pub(crate) fn evaluation<S: std::fmt::Debug>(head: &S, source: ProblemError) -> Self {
        match source {
            ProblemError::Interrupted(i) => SearchError::Interrupted(i),
            ProblemError::Preempted => SearchError::Preempted,
            source => SearchError::Evaluation {
                path: format!("{:?}", head),
                source,
            },
        }
    }

    /// True for the halts that a run reclassifies as cancellation or timeout.
    pub fn is_halt(&self) -> bool {
        matches!(self, SearchError::Interrupted(_) | SearchError::Preempted)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {key}")]
    InvalidOverride { key: String, value: String },
    #[error("{key} {reason}")]
    Invalid { key: &'static str, reason: &'static str },
}
