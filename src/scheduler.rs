//! Control-rate Scheduler
//!
//! Timers for everything that happens on the control thread: arpeggiator
//! firings and the deferred device teardown. Nothing fires on its own; the
//! owner calls [`Scheduler::pop_due`] (via `EngineHandle::poll`) and runs
//! whatever is due. Time comes from a [`Clock`], so tests drive a
//! [`ManualClock`] instead of waiting on the wall clock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic control clock
pub trait Clock: Send {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;
}

/// Wall clock measured from construction
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, to: Duration) {
        self.nanos.store(to.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Handle for cancelling a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

/// One-shot timer queue. Tasks due at the same instant run in scheduling order.
pub struct Scheduler<T> {
    clock: Box<dyn Clock>,
    queue: BTreeMap<(Duration, TimerToken), T>,
    due_at: HashMap<TimerToken, Duration>,
    next_token: u64,
}

impl<T> Scheduler<T> {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self {
            clock,
            queue: BTreeMap::new(),
            due_at: HashMap::new(),
            next_token: 0,
        }
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Run `task` once, `delay` from now
    pub fn schedule(&mut self, delay: Duration, task: T) -> TimerToken {
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        let due = self.clock.now() + delay;
        self.queue.insert((due, token), task);
        self.due_at.insert(token, due);
        token
    }

    /// Cancel a pending task. Returns false if it already ran or was cancelled.
    pub fn cancel(&mut self, token: TimerToken) -> bool {
        match self.due_at.remove(&token) {
            Some(due) => self.queue.remove(&(due, token)).is_some(),
            None => false,
        }
    }

    pub fn is_pending(&self, token: TimerToken) -> bool {
        self.due_at.contains_key(&token)
    }

    /// Remove and return the earliest task due at or before now
    pub fn pop_due(&mut self) -> Option<(TimerToken, T)> {
        let now = self.clock.now();
        let (&(due, token), _) = self.queue.iter().next()?;
        if due > now {
            return None;
        }
        self.due_at.remove(&token);
        self.queue.remove(&(due, token)).map(|task| (token, task))
    }

    /// Time until the next task is due, if any
    pub fn next_due_in(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.queue
            .keys()
            .next()
            .map(|&(due, _)| due.saturating_sub(now))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.due_at.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> (ManualClock, Scheduler<&'static str>) {
        let clock = ManualClock::new();
        (clock.clone(), Scheduler::new(Box::new(clock)))
    }

    #[test]
    fn test_fires_only_when_due() {
        let (clock, mut sched) = scheduler();
        sched.schedule(Duration::from_millis(100), "a");
        assert!(sched.pop_due().is_none());

        clock.advance(Duration::from_millis(99));
        assert!(sched.pop_due().is_none());

        clock.advance(Duration::from_millis(1));
        assert_eq!(sched.pop_due().map(|(_, t)| t), Some("a"));
        assert!(sched.is_empty());
    }

    #[test]
    fn test_due_order_then_scheduling_order() {
        let (clock, mut sched) = scheduler();
        sched.schedule(Duration::from_millis(50), "late");
        sched.schedule(Duration::from_millis(10), "first");
        sched.schedule(Duration::from_millis(10), "second");

        clock.advance(Duration::from_secs(1));
        let order: Vec<_> = std::iter::from_fn(|| sched.pop_due().map(|(_, t)| t)).collect();
        assert_eq!(order, vec!["first", "second", "late"]);
    }

    #[test]
    fn test_cancel() {
        let (clock, mut sched) = scheduler();
        let token = sched.schedule(Duration::from_millis(10), "x");
        assert!(sched.is_pending(token));
        assert!(sched.cancel(token));
        assert!(!sched.cancel(token));

        clock.advance(Duration::from_secs(1));
        assert!(sched.pop_due().is_none());
    }

    #[test]
    fn test_next_due_in() {
        let (clock, mut sched) = scheduler();
        assert_eq!(sched.next_due_in(), None);
        sched.schedule(Duration::from_millis(300), "x");
        clock.advance(Duration::from_millis(100));
        assert_eq!(sched.next_due_in(), Some(Duration::from_millis(200)));
    }
}
