//! Lock tracing hooks.
//!
//! `Nd` reports every lock transition to a `LockObserver`. The default does
//! nothing; `LoggingLockObserver` reports slow waits and long write locks
//! through `log`; `TrackingLockObserver` keeps per-thread lock counts and
//! panics on misuse (superfluous releases, write locks that do not give up
//! exactly the caller's read locks).

use std::collections::HashMap;
use std::thread::{self, ThreadId};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::consts::{LONG_READ_LOCK_WAIT_REPORT_THRESHOLD_MS, LONG_WRITE_LOCK_REPORT_THRESHOLD_MS};

pub trait LockObserver: Send + Sync {
    fn read_acquired(&self, _waited: Duration) {}
    fn read_released(&self) {}
    fn write_acquired(&self, _give_up: i32, _waited: Duration) {}
    /// Periodic report while a writer waits for readers to drain.
    fn write_blocked(&self, _lock_count: i32, _give_up: i32, _waiting_readers: u32) {}
    fn write_released(&self, _reestablish: i32, _held: Duration) {}
    fn cancelled(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLockObserver;

impl LockObserver for NoopLockObserver {}

#[derive(Debug, Clone, Copy)]
pub struct LoggingLockObserver {
    pub read_wait_threshold: Duration,
    pub write_hold_threshold: Duration,
}

impl Default for LoggingLockObserver {
    fn default() -> Self {
        Self {
            read_wait_threshold: Duration::from_millis(LONG_READ_LOCK_WAIT_REPORT_THRESHOLD_MS),
            write_hold_threshold: Duration::from_millis(LONG_WRITE_LOCK_REPORT_THRESHOLD_MS),
        }
    }
}

impl LockObserver for LoggingLockObserver {
    fn read_acquired(&self, waited: Duration) {
        if waited >= self.read_wait_threshold {
            info!("acquired read lock after {} ms wait", waited.as_millis());
        }
    }

    fn write_acquired(&self, give_up: i32, waited: Duration) {
        debug!(
            "acquired write lock (gave up {} read locks) after {} ms",
            give_up,
            waited.as_millis()
        );
    }

    fn write_blocked(&self, lock_count: i32, give_up: i32, waiting_readers: u32) {
        warn!(
            "write lock blocked: lock_count={} give_up={} waiting_readers={}",
            lock_count, give_up, waiting_readers
        );
    }

    fn write_released(&self, reestablish: i32, held: Duration) {
        if held >= self.write_hold_threshold {
            info!("write lock held for {} ms", held.as_millis());
        }
        debug!("released write lock, re-established {} read locks", reestablish);
    }

    fn cancelled(&self) {
        debug!("lock acquisition cancelled");
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ThreadLocks {
    pub reads: i32,
    pub writes: i32,
}

/// Per-thread lock bookkeeping for tests and debugging.
#[derive(Debug, Default)]
pub struct TrackingLockObserver {
    threads: Mutex<HashMap<ThreadId, ThreadLocks>>,
}

impl TrackingLockObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks held by the calling thread.
    pub fn current(&self) -> ThreadLocks {
        self.threads
            .lock()
            .get(&thread::current().id())
            .copied()
            .unwrap_or_default()
    }

    /// Threads that still hold any lock.
    pub fn holders(&self) -> usize {
        self.threads.lock().len()
    }

    fn update(&self, f: impl FnOnce(&mut ThreadLocks)) {
        let id = thread::current().id();
        let mut threads = self.threads.lock();
        let entry = threads.entry(id).or_default();
        f(entry);
        if *entry == ThreadLocks::default() {
            threads.remove(&id);
        }
    }
}

impl LockObserver for TrackingLockObserver {
    fn read_acquired(&self, _waited: Duration) {
        self.update(|t| t.reads += 1);
    }

    fn read_released(&self) {
        self.update(|t| {
            assert!(t.reads > 0, "superfluous release of a read lock");
            assert!(t.writes == 0, "read lock released while holding the write lock");
            t.reads -= 1;
        });
    }

    fn write_acquired(&self, give_up: i32, _waited: Duration) {
        self.update(|t| {
            assert!(
                t.reads == give_up,
                "write lock giving up {} read locks, thread holds {}",
                give_up,
                t.reads
            );
            assert!(t.writes == 0, "duplicate write lock");
            t.reads = 0;
            t.writes = 1;
        });
    }

    fn write_released(&self, reestablish: i32, _held: Duration) {
        self.update(|t| {
            assert!(t.writes == 1, "release of a write lock that is not held");
            t.writes = 0;
            t.reads = reestablish;
        });
    }
}
