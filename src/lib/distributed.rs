mod coordinator;
mod coworker;
mod transport;

pub use coordinator::Coordinator;
pub use coworker::Coworker;
pub use transport::InProcessTransport;

use crate::best_first::Node;
use crate::error::TransportError;
use crate::lifecycle::Solution;

pub type CoworkerId = String;

/// A batch of OPEN nodes handed to one coworker.
#[derive(Debug, Clone, PartialEq)]
pub struct Job<S, A> {
    pub id: u64,
    pub nodes: Vec<Node<S, A>>,
}

/// What a coworker returns for a whole job: the nodes it left open and the solutions it found.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult<S, A> {
    pub job: u64,
    pub open: Vec<Node<S, A>>,
    pub solutions: Vec<Solution<S, A>>,
}

/// The coordinator's view of the channel to its coworkers.
pub trait CommunicationLayer<S, A>: Send + Sync {
    /// Every coworker currently available, attached or not.
    fn detect_coworkers(&self) -> Vec<CoworkerId>;

    /// Returns the registration that got attached.
    fn attach(&self, coworker: &str) -> Result<u64, TransportError>;

    /// Identifies the current registration of `coworker`. It changes whenever the coworker
    /// goes away and comes back under the same id.
    fn registration(&self, coworker: &str) -> Option<u64>;

    fn detach(&self, coworker: &str) -> Result<(), TransportError>;

    fn submit(&self, coworker: &str, job: Job<S, A>) -> Result<(), TransportError>;

    /// The result of the job `coworker` holds, once it is complete.
    fn poll_result(&self, coworker: &str) -> Result<Option<JobResult<S, A>>, TransportError>;
}
