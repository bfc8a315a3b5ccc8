use std::mem;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Lock domains shared with the document backend.
///
/// Backends whose document structures are not independently thread safe take
/// a domain lock around every decode/render call. Scoped access goes through
/// [`LockTable::lock`]; engines built around index-keyed lock/unlock callbacks
/// use [`LockTable::lock_raw`] and [`LockTable::unlock_raw`].
pub struct LockTable {
    domains: Vec<Mutex<()>>,
}

impl LockTable {
    pub fn new(domains: usize) -> Self {
        Self {
            domains: (0..domains.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Blocks until `domain` is free. Panics when `domain >= self.len()`.
    pub fn lock(&self, domain: usize) -> MutexGuard<'_, ()> {
        self.domains[domain].lock()
    }

    pub fn with_lock<R>(&self, domain: usize, f: impl FnOnce() -> R) -> R {
        let _guard = self.lock(domain);
        f()
    }

    /// Acquires `domain` without a guard. Must be paired with
    /// [`LockTable::unlock_raw`] on the same domain.
    pub fn lock_raw(&self, domain: usize) {
        mem::forget(self.lock(domain));
    }

    /// # Safety
    ///
    /// The caller must currently hold `domain` through [`LockTable::lock_raw`].
    pub unsafe fn unlock_raw(&self, domain: usize) {
        self.domains[domain].force_unlock();
    }

    pub fn is_locked(&self, domain: usize) -> bool {
        self.domains[domain].is_locked()
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    in_flight: usize,
    completed: u64,
}

/// Counts render jobs in flight and wakes waiters whenever one finishes.
#[derive(Debug, Default)]
pub struct JobTracker {
    state: Mutex<TrackerState>,
    changed: Condvar,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.state.lock().in_flight += 1;
    }

    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.completed += 1;
        drop(state);
        self.changed.notify_all();
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Number of jobs finished so far. Snapshot it before checking shared
    /// state, then hand it to [`JobTracker::wait_for_completion`] so a
    /// completion in between is not missed.
    pub fn completions(&self) -> u64 {
        self.state.lock().completed
    }

    /// Waits until more than `seen` jobs have completed. Returns false on
    /// timeout.
    pub fn wait_for_completion(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.completed <= seen {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.completed > seen;
            }
        }
        true
    }

    /// Waits until no job is in flight. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.in_flight > 0 {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.in_flight == 0;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn scoped_locks_release_on_drop() {
        let table = LockTable::new(3);
        {
            let _guard = table.lock(1);
            assert!(table.is_locked(1));
            assert!(!table.is_locked(0));
        }
        assert!(!table.is_locked(1));
        assert_eq!(table.with_lock(2, || 7), 7);
    }

    #[test]
    fn raw_locks_pair_up() {
        let table = LockTable::new(2);
        table.lock_raw(0);
        assert!(table.is_locked(0));
        unsafe { table.unlock_raw(0) };
        assert!(!table.is_locked(0));
    }

    #[test]
    fn zero_domains_still_yields_one_lock() {
        assert_eq!(LockTable::new(0).len(), 1);
    }

    #[test]
    fn tracker_wakes_waiters() {
        let tracker = Arc::new(JobTracker::new());
        tracker.start();
        tracker.start();
        let seen = tracker.completions();

        let worker = Arc::clone(&tracker);
        let handle = thread::spawn(move || {
            worker.finish();
            worker.finish();
        });

        assert!(tracker.wait_for_completion(seen, Duration::from_secs(5)));
        assert!(tracker.wait_idle(Duration::from_secs(5)));
        handle.join().unwrap();
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.completions(), 2);
    }

    #[test]
    fn tracker_times_out_when_nothing_finishes() {
        let tracker = JobTracker::new();
        tracker.start();
        assert!(!tracker.wait_idle(Duration::from_millis(10)));
        assert!(!tracker.wait_for_completion(0, Duration::from_millis(10)));
    }
}
