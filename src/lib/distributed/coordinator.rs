use crate::best_first::BestFirst;
use crate::config::{BestFirstConfig, CoordinatorConfig};
use crate::distributed::{CommunicationLayer, CoworkerId, Job, JobResult};
use crate::error::SearchError;
use crate::lifecycle::{Algorithm, Context, Event, Solution, POLL_INTERVAL};
use crate::problem::{GraphItem, SearchProblem};
use atomic_float::AtomicF64;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct State<S, A> {
    search: BestFirst<S, A>,
    // attached coworkers and the registration each was attached under
    attached: HashMap<CoworkerId, u64>,
    idle: VecDeque<CoworkerId>,
    busy: HashMap<CoworkerId, Job<S, A>>,
    resubmittable: VecDeque<Job<S, A>>,
    // state sequences of the solutions reported so far
    reported: HashSet<Vec<S>>,
    next_job: u64,
}

impl<S: GraphItem, A: GraphItem> State<S, A> {
    fn is_done(&self) -> bool {
        self.search.open_len() == 0 && self.busy.is_empty() && self.resubmittable.is_empty()
    }

    fn has_work(&self) -> bool {
        self.search.open_len() > 0 || !self.resubmittable.is_empty()
    }

    fn lose(&mut self, coworker: &str) {
        self.attached.remove(coworker);
        self.idle.retain(|c| c != coworker);
        if let Some(job) = self.busy.remove(coworker) {
            warn!(
                "coworker {} lost with job {} ({} nodes), queued for resubmission",
                coworker,
                job.id,
                job.nodes.len()
            );
            self.resubmittable.push_back(job);
        }
    }
}

struct Shared<S, A> {
    state: Mutex<State<S, A>>,
    changed: Condvar,
    best_score: AtomicF64,
    resubmitted: AtomicUsize,
}

/// Best-first search whose expansions are done by coworkers.
///
/// The coordinator keeps OPEN. Three loops run on their own threads: discovery attaches new
/// coworkers and detaches lost ones, dispatch hands batches of OPEN to idle coworkers and
/// collection merges their results back. Jobs of lost coworkers are kept and dispatched
/// again before any new work.
pub struct Coordinator<S, A> {
    shared: Arc<Shared<S, A>>,
    transport: Arc<dyn CommunicationLayer<S, A>>,
    config: CoordinatorConfig,
    events: Receiver<Event<S, A>>,
    sender: Option<Sender<Event<S, A>>>,
    stop: Option<Context>,
    loops: Vec<JoinHandle<()>>,
}

impl<S: GraphItem, A: GraphItem> Coordinator<S, A> {
    pub fn new(
        problem: SearchProblem<S, A>,
        transport: Arc<dyn CommunicationLayer<S, A>>,
        mut config: CoordinatorConfig,
    ) -> Self {
        if config.batch_size == 0 {
            warn!("coordinator batch size 0, using 1");
            config.batch_size = 1;
        }
        let (sender, events) = unbounded();
        Coordinator {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    search: BestFirst::new(problem, BestFirstConfig::default()),
                    attached: HashMap::new(),
                    idle: VecDeque::new(),
                    busy: HashMap::new(),
                    resubmittable: VecDeque::new(),
                    reported: HashSet::new(),
                    next_job: 0,
                }),
                changed: Condvar::new(),
                best_score: AtomicF64::new(f64::INFINITY),
                resubmitted: AtomicUsize::new(0),
            }),
            transport,
            config,
            events,
            sender: Some(sender),
            stop: None,
            loops: vec![],
        }
    }

    /// The lowest score among the solutions reported so far.
    pub fn best_score(&self) -> Option<f64> {
        let best = self.shared.best_score.load(Ordering::SeqCst);
        if best.is_finite() {
            Some(best)
        } else {
            None
        }
    }

    /// Jobs of lost coworkers waiting to be dispatched again.
    pub fn resubmittable(&self) -> usize {
        self.shared.state.lock().resubmittable.len()
    }

    /// Jobs dispatched again so far.
    pub fn resubmitted(&self) -> usize {
        self.shared.resubmitted.load(Ordering::SeqCst)
    }

    pub fn attached(&self) -> Vec<CoworkerId> {
        let mut ids: Vec<CoworkerId> = self.shared.state.lock().attached.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn open_len(&self) -> usize {
        self.shared.state.lock().search.open_len()
    }

    /// Distinct solutions collected from coworkers so far.
    pub fn solutions_found(&self) -> usize {
        self.shared.state.lock().reported.len()
    }

    fn spawn(&mut self, name: &str, ctx: &Context, sender: &Sender<Event<S, A>>, f: fn(Worker<S, A>)) {
        let worker = Worker {
            shared: self.shared.clone(),
            transport: self.transport.clone(),
            config: self.config.clone(),
            events: sender.clone(),
            ctx: ctx.clone(),
        };
        match thread::Builder::new()
            .name(format!("coordinator-{}", name))
            .spawn(move || f(worker))
        {
            Ok(handle) => self.loops.push(handle),
            Err(e) => warn!("could not start the {} loop: {}", name, e),
        }
    }
}

// What each loop thread owns.
struct Worker<S, A> {
    shared: Arc<Shared<S, A>>,
    transport: Arc<dyn CommunicationLayer<S, A>>,
    config: CoordinatorConfig,
    events: Sender<Event<S, A>>,
    ctx: Context,
}

fn discovery<S: GraphItem, A: GraphItem>(w: Worker<S, A>) {
    loop {
        let available: HashSet<CoworkerId> = w.transport.detect_coworkers().into_iter().collect();
        {
            let mut state = w.shared.state.lock();
            let mut changed = false;
            // gone, or gone and back under the same id since the last round
            let lost: Vec<CoworkerId> = state
                .attached
                .iter()
                .filter(|(c, r)| w.transport.registration(c) != Some(**r))
                .map(|(c, _)| c.clone())
                .collect();
            for coworker in lost {
                state.lose(&coworker);
                // it may be gone for good, in which case there is nothing to detach
                let _ = w.transport.detach(&coworker);
                info!("detached coworker {}", coworker);
                changed = true;
            }
            let mut new: Vec<&CoworkerId> = available
                .iter()
                .filter(|c| !state.attached.contains_key(*c))
                .collect();
            new.sort();
            let new: Vec<CoworkerId> = new.into_iter().cloned().collect();
            for coworker in new {
                match w.transport.attach(&coworker) {
                    Ok(registration) => {
                        info!("attached coworker {}", coworker);
                        state.attached.insert(coworker.clone(), registration);
                        state.idle.push_back(coworker);
                        changed = true;
                    }
                    Err(e) => debug!("could not attach {}: {}", coworker, e),
                }
            }
            if changed {
                w.shared.changed.notify_all();
            }
        }
        if w.ctx.sleep(w.config.discovery_interval()).is_err() {
            return;
        }
    }
}

fn dispatch<S: GraphItem, A: GraphItem>(w: Worker<S, A>) {
    loop {
        let mut state = w.shared.state.lock();
        while state.idle.is_empty() || !state.has_work() {
            if w.ctx.interrupt().is_some() {
                return;
            }
            w.shared.changed.wait_for(&mut state, POLL_INTERVAL);
        }
        if w.ctx.interrupt().is_some() {
            return;
        }
        let coworker = match state.idle.pop_front() {
            Some(c) => c,
            None => continue,
        };
        let job = match state.resubmittable.pop_front() {
            Some(job) => {
                let id = state.next_job;
                state.next_job += 1;
                w.shared.resubmitted.fetch_add(1, Ordering::SeqCst);
                warn!("resubmitting nodes of job {} as job {} to {}", job.id, id, coworker);
                Job { id, nodes: job.nodes }
            }
            None => {
                let id = state.next_job;
                state.next_job += 1;
                Job {
                    id,
                    nodes: state.search.take_open(w.config.batch_size),
                }
            }
        };
        match w.transport.submit(&coworker, job.clone()) {
            Ok(()) => {
                debug!("job {} with {} nodes to {}", job.id, job.nodes.len(), coworker);
                // events are sent under the lock, so that completion is never observed
                // ahead of them
                for node in &job.nodes {
                    let _ = w.events.send(Event::NodeDispatched {
                        coworker: coworker.clone(),
                        path: node.path.clone(),
                    });
                }
                state.busy.insert(coworker, job);
            }
            Err(e) => {
                warn!("could not submit job {} to {}: {}", job.id, coworker, e);
                // discovery attaches it again if it is still around
                state.attached.remove(&coworker);
                state.resubmittable.push_front(job);
            }
        }
    }
}

fn collection<S: GraphItem, A: GraphItem>(w: Worker<S, A>) {
    while w.ctx.sleep(w.config.poll_interval()).is_ok() {
        let busy: Vec<CoworkerId> = w.shared.state.lock().busy.keys().cloned().collect();
        for coworker in busy {
            match w.transport.poll_result(&coworker) {
                Ok(Some(result)) => merge(&w, &coworker, result),
                Ok(None) => (),
                Err(e) => debug!("polling {} failed: {}", coworker, e),
            }
        }
    }
}

/// Sends the solutions not reported before. Returns how many were sent.
fn report<S: GraphItem, A: GraphItem>(
    shared: &Shared<S, A>,
    state: &mut State<S, A>,
    events: &Sender<Event<S, A>>,
    solutions: Vec<Solution<S, A>>,
) -> usize {
    let mut sent = 0;
    for solution in solutions {
        if !state.reported.insert(solution.path.states()) {
            continue;
        }
        let score = solution.score;
        let _ = shared
            .best_score
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| if score < b { Some(score) } else { None });
        let _ = events.send(Event::SolutionFound(solution));
        sent += 1;
    }
    sent
}

fn merge<S: GraphItem, A: GraphItem>(w: &Worker<S, A>, coworker: &str, result: JobResult<S, A>) {
    let mut state = w.shared.state.lock();
    if state.busy.get(coworker).map(|j| j.id) != Some(result.job) {
        debug!("ignoring result of job {} from {}, it is no longer in flight", result.job, coworker);
        return;
    }
    state.busy.remove(coworker);
    let open = result.open.len();
    let merged = state.search.merge(result.open);
    let solutions = report(&w.shared, &mut state, &w.events, result.solutions);
    debug!(
        "job {} from {}: {} of {} nodes merged, {} new solutions, {} open",
        result.job,
        coworker,
        merged,
        open,
        solutions,
        state.search.open_len()
    );
    if state.attached.contains_key(coworker) {
        state.idle.push_back(coworker.to_string());
    }
    w.shared.changed.notify_all();
}

impl<S: GraphItem, A: GraphItem> Algorithm for Coordinator<S, A> {
    type State = S;
    type Action = A;

    fn name(&self) -> &'static str {
        "coordinator"
    }

    fn initialize(&mut self, ctx: &Context) -> Result<(), SearchError> {
        let sender = self
            .sender
            .take()
            .ok_or(SearchError::InvalidState("coordinator initialized twice"))?;
        {
            let mut state = self.shared.state.lock();
            let roots = state.search.root_nodes(ctx)?;
            let merged = state.search.merge(roots);
            // solutions reached while the roots were scored
            let found = state.search.problem().take_solutions();
            let solutions = report(&self.shared, &mut state, &sender, found);
            info!("coordinator starts with {} open nodes and {} solutions", merged, solutions);
        }
        let stop = ctx.child(None);
        self.spawn("discovery", &stop, &sender, discovery);
        self.spawn("dispatch", &stop, &sender, dispatch);
        self.spawn("collection", &stop, &sender, collection);
        self.stop = Some(stop);
        Ok(())
    }

    fn advance(&mut self, ctx: &Context) -> Result<Option<Event<S, A>>, SearchError> {
        loop {
            match self.events.recv_timeout(self.config.poll_interval()) {
                Ok(event) => return Ok(Some(event)),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    // the loops only stop on their own when the run is interrupted
                    ctx.check()?;
                    return Err(SearchError::InvalidState("coordinator loops stopped"));
                }
            }
            ctx.check()?;
            if self.shared.state.lock().is_done() {
                // anything sent before completion is already queued
                return Ok(self.events.try_recv().ok());
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }
        self.shared.changed.notify_all();
        for handle in self.loops.drain(..) {
            if handle.join().is_err() {
                warn!("a coordinator loop panicked");
            }
        }
        debug!("coordinator loops stopped");
    }

    fn drain_pending(&mut self) -> Vec<Event<S, A>> {
        // the loops are joined, so nothing is sent anymore
        self.events.try_iter().collect()
    }
}
