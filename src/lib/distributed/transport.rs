use crate::distributed::{CommunicationLayer, CoworkerId, Job, JobResult};
use crate::error::TransportError;
use crate::lifecycle::{Context, POLL_INTERVAL};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};

struct Slot<S, A> {
    registration: u64,
    attached: bool,
    jobs: (Sender<Job<S, A>>, Receiver<Job<S, A>>),
    results: (Sender<JobResult<S, A>>, Receiver<JobResult<S, A>>),
}

impl<S, A> Slot<S, A> {
    fn new(registration: u64) -> Self {
        Slot {
            registration,
            attached: false,
            jobs: unbounded(),
            results: unbounded(),
        }
    }
}

/// Coordinator and coworkers in one process, talking over channels.
///
/// A coworker is known from `register` until `unregister`; whatever it still held is dropped
/// with it.
pub struct InProcessTransport<S, A> {
    slots: DashMap<CoworkerId, Slot<S, A>>,
    registrations: AtomicU64,
}

impl<S, A> Default for InProcessTransport<S, A> {
    fn default() -> Self {
        InProcessTransport::new()
    }
}

impl<S, A> InProcessTransport<S, A> {
    pub fn new() -> Self {
        InProcessTransport {
            slots: DashMap::new(),
            registrations: AtomicU64::new(0),
        }
    }

    /// Registering again without unregistering keeps the current registration.
    pub fn register(&self, coworker: &str) {
        let slot = self
            .slots
            .entry(coworker.to_string())
            .or_insert_with(|| Slot::new(self.registrations.fetch_add(1, Ordering::SeqCst)));
        info!("coworker {} registered ({})", coworker, slot.registration);
    }

    pub fn unregister(&self, coworker: &str) {
        if self.slots.remove(coworker).is_some() {
            info!("coworker {} unregistered", coworker);
        }
    }

    pub fn is_attached(&self, coworker: &str) -> bool {
        self.slots.get(coworker).map_or(false, |s| s.attached)
    }

    /// Waits for the next job of `coworker`; `None` once `ctx` is interrupted.
    pub fn next_job(&self, coworker: &str, ctx: &Context) -> Result<Option<Job<S, A>>, TransportError> {
        loop {
            if ctx.interrupt().is_some() {
                return Ok(None);
            }
            // the receiver is cloned so that no map shard stays locked while waiting
            let jobs = match self.slots.get(coworker) {
                Some(slot) => slot.jobs.1.clone(),
                None => return Err(TransportError::UnknownCoworker(coworker.to_string())),
            };
            match jobs.recv_timeout(POLL_INTERVAL) {
                Ok(job) => return Ok(Some(job)),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Disconnected(coworker.to_string()))
                }
            }
        }
    }

    pub fn report(&self, coworker: &str, result: JobResult<S, A>) -> Result<(), TransportError> {
        let slot = self
            .slots
            .get(coworker)
            .ok_or_else(|| TransportError::UnknownCoworker(coworker.to_string()))?;
        debug!("coworker {} reports job {}", coworker, result.job);
        slot.results
            .0
            .send(result)
            .map_err(|_| TransportError::Disconnected(coworker.to_string()))
    }
}

impl<S: Send + Sync, A: Send + Sync> CommunicationLayer<S, A> for InProcessTransport<S, A> {
    fn detect_coworkers(&self) -> Vec<CoworkerId> {
        let mut ids: Vec<CoworkerId> = self.slots.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn attach(&self, coworker: &str) -> Result<u64, TransportError> {
        let mut slot = self
            .slots
            .get_mut(coworker)
            .ok_or_else(|| TransportError::UnknownCoworker(coworker.to_string()))?;
        slot.attached = true;
        Ok(slot.registration)
    }

    fn registration(&self, coworker: &str) -> Option<u64> {
        self.slots.get(coworker).map(|s| s.registration)
    }

    fn detach(&self, coworker: &str) -> Result<(), TransportError> {
        let mut slot = self
            .slots
            .get_mut(coworker)
            .ok_or_else(|| TransportError::UnknownCoworker(coworker.to_string()))?;
        slot.attached = false;
        Ok(())
    }

    fn submit(&self, coworker: &str, job: Job<S, A>) -> Result<(), TransportError> {
        let slot = self
            .slots
            .get(coworker)
            .ok_or_else(|| TransportError::Disconnected(coworker.to_string()))?;
        if !slot.attached {
            return Err(TransportError::Disconnected(coworker.to_string()));
        }
        slot.jobs
            .0
            .send(job)
            .map_err(|_| TransportError::Disconnected(coworker.to_string()))
    }

    fn poll_result(&self, coworker: &str) -> Result<Option<JobResult<S, A>>, TransportError> {
        let slot = self
            .slots
            .get(coworker)
            .ok_or_else(|| TransportError::Disconnected(coworker.to_string()))?;
        Ok(slot.results.1.try_recv().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(id: u64) -> Job<u32, ()> {
        Job { id, nodes: vec![] }
    }

    #[test]
    fn jobs_need_an_attached_coworker() {
        let t: InProcessTransport<u32, ()> = InProcessTransport::new();
        assert_eq!(t.submit("a", job(0)), Err(TransportError::Disconnected("a".to_string())));
        t.register("a");
        t.register("b");
        assert_eq!(t.detect_coworkers(), vec!["a".to_string(), "b".to_string()]);
        assert!(t.submit("a", job(0)).is_err());
        t.attach("a").unwrap();
        assert!(t.is_attached("a"));
        t.submit("a", job(7)).unwrap();

        let ctx = Context::new();
        assert_eq!(t.next_job("a", &ctx).unwrap(), Some(job(7)));
        assert_eq!(t.poll_result("a").unwrap(), None);
        t.report(
            "a",
            JobResult {
                job: 7,
                open: vec![],
                solutions: vec![],
            },
        )
        .unwrap();
        assert_eq!(t.poll_result("a").unwrap().map(|r| r.job), Some(7));

        t.detach("a").unwrap();
        assert!(!t.is_attached("a"));
        t.unregister("a");
        assert_eq!(t.detect_coworkers(), vec!["b".to_string()]);
        assert!(t.report("a", JobResult { job: 8, open: vec![], solutions: vec![] }).is_err());
        assert_eq!(t.attach("zz"), Err(TransportError::UnknownCoworker("zz".to_string())));
    }

    #[test]
    fn coming_back_is_a_new_registration() {
        let t: InProcessTransport<u32, ()> = InProcessTransport::new();
        t.register("a");
        let first = t.attach("a").unwrap();
        t.register("a");
        assert_eq!(t.registration("a"), Some(first));
        assert!(t.is_attached("a"));

        t.unregister("a");
        assert_eq!(t.registration("a"), None);
        t.register("a");
        let second = t.registration("a").unwrap();
        assert_ne!(first, second);
        // the old attachment and its jobs went away with the old registration
        assert!(!t.is_attached("a"));
        assert_eq!(t.attach("a").unwrap(), second);
    }

    #[test]
    fn waiting_for_jobs_is_interruptible() {
        let t: InProcessTransport<u32, ()> = InProcessTransport::new();
        t.register("a");
        let ctx = Context::new();
        ctx.set_deadline(std::time::Instant::now() + Duration::from_millis(30));
        assert_eq!(t.next_job("a", &ctx).unwrap(), None);
        assert!(t.next_job("nobody", &Context::new()).is_err());
    }
}
