use parking_lot::{Condvar, Mutex};
use std::cmp::min;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Upper bound on how long a [`Context::sleep`] goes without looking at the token.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupt {
    #[error("cancelled")]
    Cancelled,
    #[error("timed out")]
    TimedOut,
}

/// Cancellation token with an optional deadline, handed to every call that may suspend.
///
/// Clones share the same token. A [`Context::child`] observes its parent's cancellation and
/// deadline but can carry a tighter deadline of its own, and cancelling it leaves the parent
/// untouched.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    deadline: Mutex<Option<Instant>>,
    wake: Condvar,
    parent: Option<Context>,
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Context {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: Mutex::new(None),
                wake: Condvar::new(),
                parent: None,
            }),
        }
    }

    pub fn child(&self, timeout: Option<Duration>) -> Context {
        Context {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: Mutex::new(timeout.map(|t| Instant::now() + t)),
                wake: Condvar::new(),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.inner.deadline.lock();
        self.inner.wake.notify_all();
    }

    pub fn set_deadline(&self, deadline: Instant) {
        *self.inner.deadline.lock() = Some(deadline);
        self.inner.wake.notify_all();
    }

    /// The earliest deadline of this context and its ancestors.
    pub fn deadline(&self) -> Option<Instant> {
        let own = *self.inner.deadline.lock();
        let inherited = self.inner.parent.as_ref().and_then(|p| p.deadline());
        match (own, inherited) {
            (Some(a), Some(b)) => Some(min(a, b)),
            (a, b) => a.or(b),
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self.inner.parent.as_ref().map_or(false, |p| p.is_cancelled())
    }

    pub fn check(&self) -> Result<(), Interrupt> {
        if self.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        match self.deadline() {
            Some(d) if Instant::now() >= d => Err(Interrupt::TimedOut),
            _ => Ok(()),
        }
    }

    pub fn interrupt(&self) -> Option<Interrupt> {
        self.check().err()
    }

    /// Sleeps for `d`, returning early with the interrupt if the token fires first.
    pub fn sleep(&self, d: Duration) -> Result<(), Interrupt> {
        let until = Instant::now() + d;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            let mut guard = self.inner.deadline.lock();
            if self.inner.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            self.inner
                .wake
                .wait_for(&mut guard, min(until - now, POLL_INTERVAL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_wakes_on_cancel() {
        let ctx = Context::new();
        let other = ctx.clone();
        let t = Instant::now();
        let h = std::thread::spawn(move || other.sleep(Duration::from_secs(10)));
        std::thread::sleep(Duration::from_millis(30));
        ctx.cancel();
        assert_eq!(h.join().unwrap(), Err(Interrupt::Cancelled));
        assert!(t.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn deadline_turns_into_timeout() {
        let ctx = Context::new();
        ctx.set_deadline(Instant::now() + Duration::from_millis(20));
        assert_eq!(ctx.check(), Ok(()));
        assert_eq!(ctx.sleep(Duration::from_secs(5)), Err(Interrupt::TimedOut));
        assert_eq!(ctx.interrupt(), Some(Interrupt::TimedOut));
    }

    #[test]
    fn children_inherit_but_do_not_propagate() {
        let parent = Context::new();
        let child = parent.child(Some(Duration::from_secs(60)));
        let grandchild = child.child(None);
        assert!(grandchild.remaining().unwrap() <= Duration::from_secs(60));

        child.cancel();
        assert_eq!(grandchild.check(), Err(Interrupt::Cancelled));
        assert_eq!(parent.check(), Ok(()));

        let other = parent.child(Some(Duration::from_millis(0)));
        assert_eq!(other.check(), Err(Interrupt::TimedOut));
        parent.cancel();
        // cancellation wins over the expired deadline
        assert_eq!(other.check(), Err(Interrupt::Cancelled));
    }
}
