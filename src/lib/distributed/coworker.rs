use crate::best_first::BestFirst;
use crate::config::BestFirstConfig;
use crate::distributed::{InProcessTransport, Job, JobResult};
use crate::error::SearchError;
use crate::lifecycle::{Algorithm, Context, Event};
use crate::problem::{GraphItem, SearchProblem};
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Serves jobs of a coordinator until its context is interrupted.
///
/// Every node of a job is expanded once. With `local_expansions` the coworker then keeps
/// going for that many steps of a local best-first search over the children before it
/// returns what is left open.
pub struct Coworker<S, A> {
    id: String,
    transport: Arc<InProcessTransport<S, A>>,
    problem: SearchProblem<S, A>,
    config: BestFirstConfig,
    local_expansions: usize,
}

impl<S: GraphItem, A: GraphItem> Coworker<S, A> {
    pub fn new(
        id: impl Into<String>,
        transport: Arc<InProcessTransport<S, A>>,
        problem: SearchProblem<S, A>,
        config: BestFirstConfig,
    ) -> Self {
        Coworker {
            id: id.into(),
            transport,
            problem,
            config,
            local_expansions: 0,
        }
    }

    pub fn with_local_expansions(mut self, n: usize) -> Self {
        self.local_expansions = n;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Registers, serves jobs and unregisters. Returns the number of jobs reported.
    pub fn run(&self, ctx: &Context) -> Result<usize, SearchError> {
        self.transport.register(&self.id);
        let served = self.serve(ctx);
        self.transport.unregister(&self.id);
        match &served {
            Ok(n) => info!("coworker {} stops after {} jobs", self.id, n),
            Err(e) => warn!("coworker {} failed: {}", self.id, e),
        }
        served
    }

    pub fn spawn(self, ctx: Context) -> JoinHandle<Result<usize, SearchError>> {
        thread::spawn(move || self.run(&ctx))
    }

    fn serve(&self, ctx: &Context) -> Result<usize, SearchError> {
        let search = BestFirst::new(self.problem.clone(), self.config.clone());
        let mut served = 0;
        while let Some(job) = self.transport.next_job(&self.id, ctx)? {
            debug!("coworker {} got job {} with {} nodes", self.id, job.id, job.nodes.len());
            let result = match self.work(&search, job, ctx) {
                Ok(result) => result,
                Err(e) if e.is_halt() => break,
                Err(e) => return Err(e),
            };
            self.transport.report(&self.id, result)?;
            served += 1;
        }
        Ok(served)
    }

    fn work(&self, search: &BestFirst<S, A>, job: Job<S, A>, ctx: &Context) -> Result<JobResult<S, A>, SearchError> {
        let batch = search.expand_batch(job.nodes, ctx)?;
        if self.local_expansions == 0 {
            return Ok(JobResult {
                job: job.id,
                open: batch.open,
                solutions: batch.solutions,
            });
        }
        let mut local = BestFirst::bootstrap(self.problem.clone(), self.config.clone(), batch.open);
        local.initialize(ctx)?;
        let mut solutions = batch.solutions;
        for _ in 0..self.local_expansions {
            match local.advance(ctx)? {
                Some(Event::SolutionFound(s)) => solutions.push(s),
                Some(_) => (),
                None => break,
            }
        }
        Ok(JobResult {
            job: job.id,
            open: local.drain_open(),
            solutions,
        })
    }
}
