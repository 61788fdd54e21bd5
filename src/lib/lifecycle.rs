mod context;
mod event;

pub use context::{Context, Interrupt, POLL_INTERVAL};
pub use event::{Event, NodeExpansion, Outcome, Rollout, Solution};

use crate::config::RunConfig;
use crate::error::SearchError;
use crate::problem::GraphItem;
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(1000);

/// A search engine as seen by [`Run`].
///
/// `advance` performs one unit of work and returns the event it produced, or `None` when the
/// search space is exhausted. Engines never emit `Initialized` or `Finished` themselves.
pub trait Algorithm {
    type State: GraphItem;
    type Action: GraphItem;

    fn name(&self) -> &'static str;

    fn initialize(&mut self, ctx: &Context) -> Result<(), SearchError>;

    fn advance(
        &mut self,
        ctx: &Context,
    ) -> Result<Option<Event<Self::State, Self::Action>>, SearchError>;

    /// Called once when the run becomes inactive.
    fn shutdown(&mut self) {}

    /// Events produced but not yet returned by `advance`. Called once, after `shutdown`;
    /// the run emits them ahead of `Finished`.
    fn drain_pending(&mut self) -> Vec<Event<Self::State, Self::Action>> {
        vec![]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Active,
    Inactive,
}

/// Cancels a run from another thread.
#[derive(Clone)]
pub struct CancelHandle(Context);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

type RunEvent<A> = Event<<A as Algorithm>::State, <A as Algorithm>::Action>;

pub struct Run<A: Algorithm> {
    algorithm: A,
    state: RunState,
    ctx: Context,
    timeout: Option<Duration>,
    grace_period: Duration,
    started: Option<Instant>,
    finished: Option<Instant>,
    pending_finish: Option<Outcome>,
    outcome: Option<Outcome>,
    events: Vec<RunEvent<A>>,
    // emitted at finish, still to be returned by `step`
    tail: VecDeque<RunEvent<A>>,
    listeners: Vec<Sender<RunEvent<A>>>,
}

impl<A: Algorithm> Run<A> {
    pub fn new(algorithm: A) -> Self {
        Run {
            algorithm,
            state: RunState::Created,
            ctx: Context::new(),
            timeout: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            started: None,
            finished: None,
            pending_finish: None,
            outcome: None,
            events: vec![],
            tail: VecDeque::new(),
            listeners: vec![],
        }
    }

    pub fn with_config(algorithm: A, config: &RunConfig) -> Self {
        let mut run = Run::new(algorithm);
        run.grace_period = config.grace_period();
        if let Some(t) = config.timeout() {
            run.set_timeout(t);
        }
        run
    }

    /// Stops the run `d` after it started. Can be called before or during the run.
    pub fn set_timeout(&mut self, d: Duration) {
        self.timeout = Some(d);
        if let Some(started) = self.started {
            self.ctx.set_deadline(started + d);
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.ctx.clone())
    }

    pub fn cancel(&self) {
        self.ctx.cancel()
    }

    /// Receives every event emitted from now on. The channel closes after `Finished`.
    pub fn subscribe(&mut self) -> Receiver<RunEvent<A>> {
        let (tx, rx) = unbounded();
        if self.state != RunState::Inactive {
            self.listeners.push(tx);
        }
        rx
    }

    pub fn step(&mut self) -> Result<Option<RunEvent<A>>, SearchError> {
        match self.state {
            RunState::Inactive => return Ok(self.tail.pop_front()),
            RunState::Created => return self.start(),
            RunState::Active => (),
        }
        if let Some(outcome) = self.pending_finish.take() {
            return Ok(self.finish(outcome));
        }
        if let Some(interrupt) = self.ctx.interrupt() {
            return Ok(self.finish(interrupt.into()));
        }
        match self.algorithm.advance(&self.ctx) {
            Ok(Some(event)) => Ok(Some(self.emit(event))),
            Ok(None) => Ok(self.finish(Outcome::Completed)),
            Err(e) => self.fail(e),
        }
    }

    /// Steps until the run is inactive and returns how it ended.
    pub fn run(&mut self) -> Result<Outcome, SearchError> {
        while self.step()?.is_some() {}
        Ok(self.outcome.clone().unwrap_or(Outcome::Completed))
    }

    /// Steps until the next solution, or `None` once the run has finished.
    pub fn next_solution(&mut self) -> Result<Option<Solution<A::State, A::Action>>, SearchError> {
        while let Some(event) = self.step()? {
            if let Event::SolutionFound(s) = event {
                return Ok(Some(s));
            }
        }
        Ok(None)
    }

    fn start(&mut self) -> Result<Option<RunEvent<A>>, SearchError> {
        let now = Instant::now();
        self.state = RunState::Active;
        self.started = Some(now);
        if let Some(t) = self.timeout {
            self.ctx.set_deadline(now + t);
        }
        info!("{} started (timeout {:?})", self.algorithm.name(), self.timeout);
        if let Err(e) = self.algorithm.initialize(&self.ctx) {
            if !self.is_halt(&e) {
                self.emit(Event::Initialized);
                return self.fail(e);
            }
            self.pending_finish = Some(self.halt_outcome(&e));
        }
        Ok(Some(self.emit(Event::Initialized)))
    }

    fn is_halt(&self, e: &SearchError) -> bool {
        e.is_halt() || (matches!(e, SearchError::WorkerPanicked) && self.ctx.interrupt().is_some())
    }

    fn halt_outcome(&self, e: &SearchError) -> Outcome {
        match (self.ctx.interrupt(), e) {
            (Some(i), _) => i.into(),
            (None, SearchError::Interrupted(i)) => (*i).into(),
            _ => Outcome::Cancelled,
        }
    }

    fn fail(&mut self, e: SearchError) -> Result<Option<RunEvent<A>>, SearchError> {
        if self.is_halt(&e) {
            let outcome = self.halt_outcome(&e);
            debug!("{} halted by {}", self.algorithm.name(), e);
            return Ok(self.finish(outcome));
        }
        warn!("{} failed: {}", self.algorithm.name(), e);
        self.finish(Outcome::Failed(e.to_string()));
        // the error is returned in place of the remaining events
        self.tail.clear();
        Err(e)
    }

    /// Shuts the algorithm down, emits what it still had queued and then `Finished`.
    /// Returns the first of these events; `step` hands out the rest.
    fn finish(&mut self, outcome: Outcome) -> Option<RunEvent<A>> {
        self.algorithm.shutdown();
        let pending = self.algorithm.drain_pending();
        if !pending.is_empty() {
            debug!("{} had {} events queued", self.algorithm.name(), pending.len());
        }
        for event in pending {
            let event = self.emit(event);
            self.tail.push_back(event);
        }
        let now = Instant::now();
        self.state = RunState::Inactive;
        self.finished = Some(now);
        self.outcome = Some(outcome.clone());
        if let (Some(deadline), Outcome::TimedOut) = (self.ctx.deadline(), &outcome) {
            if now > deadline + self.grace_period {
                warn!(
                    "{} stopped {:?} after its deadline",
                    self.algorithm.name(),
                    now - deadline
                );
            }
        }
        info!(
            "{} {} after {:?}",
            self.algorithm.name(),
            outcome,
            self.elapsed()
        );
        let event = self.emit(Event::Finished(outcome));
        self.listeners.clear();
        self.tail.push_back(event);
        self.tail.pop_front()
    }

    fn emit(&mut self, event: RunEvent<A>) -> RunEvent<A> {
        self.listeners.retain(|l| l.send(event.clone()).is_ok());
        self.events.push(event.clone());
        event
    }

    pub fn events(&self) -> &[RunEvent<A>] {
        &self.events
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn algorithm(&self) -> &A {
        &self.algorithm
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn elapsed(&self) -> Duration {
        match (self.started, self.finished) {
            (Some(s), Some(f)) => f - s,
            (Some(s), None) => s.elapsed(),
            _ => Duration::from_secs(0),
        }
    }
}

impl From<Interrupt> for Outcome {
    fn from(i: Interrupt) -> Self {
        match i {
            Interrupt::Cancelled => Outcome::Cancelled,
            Interrupt::TimedOut => Outcome::TimedOut,
        }
    }
}
