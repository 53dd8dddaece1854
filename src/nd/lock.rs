//! nd/lock: reader/writer lock over a whole database.
//!
//! State is a single count: `0` idle, `n > 0` readers, `-1` one writer.
//! Readers never wait for other readers; a writer waits until the readers
//! it does not own have drained and no reader is queued. Blocked writers
//! (and cancellable readers) re-check their cancellation signal every
//! `cancel_check_ms`.
//!
//! Lock misuse panics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use log::{debug, error};
use parking_lot::{Condvar, Mutex};

use crate::consts::BLOCKED_WRITE_LOCK_OUTPUT_INTERVAL_MS;
use crate::error::{NdError, Result};
use crate::metrics::{record_lock_cancelled, record_read_lock, record_write_lock};
use crate::nd::Nd;

/// Cooperative cancellation, polled while a lock acquisition is blocked.
pub trait CancelSignal: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// Shareable cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CancelSignal for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
pub(crate) struct LockState {
    pub(crate) lock_count: i32,
    pub(crate) waiting_readers: u32,
    pub(crate) writer: Option<ThreadId>,
    pub(crate) write_acquired_at: Option<Instant>,
}

#[derive(Default)]
pub(crate) struct NdLock {
    pub(crate) state: Mutex<LockState>,
    pub(crate) cond: Condvar,
}

impl Nd {
    fn check_interval(&self) -> Duration {
        Duration::from_millis(self.cfg.cancel_check_ms.max(1))
    }

    /// Block until no writer holds the lock, then join the readers.
    pub fn acquire_read_lock(&self) {
        let start = Instant::now();
        {
            let mut st = self.lock.state.lock();
            st.waiting_readers += 1;
            while st.lock_count < 0 {
                self.lock.cond.wait(&mut st);
            }
            st.waiting_readers -= 1;
            st.lock_count += 1;
        }
        record_read_lock();
        self.observer.read_acquired(start.elapsed());
    }

    /// Like `acquire_read_lock`, giving up with `NdError::Cancelled` once
    /// `cancel` fires.
    pub fn acquire_read_lock_cancellable(&self, cancel: &dyn CancelSignal) -> Result<()> {
        let start = Instant::now();
        let interval = self.check_interval();
        {
            let mut st = self.lock.state.lock();
            st.waiting_readers += 1;
            while st.lock_count < 0 {
                self.lock.cond.wait_for(&mut st, interval);
                if st.lock_count < 0 && cancel.is_cancelled() {
                    st.waiting_readers -= 1;
                    // a writer may be waiting for the queue to empty
                    self.lock.cond.notify_all();
                    drop(st);
                    record_lock_cancelled();
                    self.observer.cancelled();
                    return Err(NdError::Cancelled);
                }
            }
            st.waiting_readers -= 1;
            st.lock_count += 1;
        }
        record_read_lock();
        self.observer.read_acquired(start.elapsed());
        Ok(())
    }

    pub fn release_read_lock(&self) {
        {
            let mut st = self.lock.state.lock();
            assert!(st.lock_count > 0, "no read lock to release");
            st.lock_count -= 1;
            self.lock.cond.notify_all();
        }
        self.observer.read_released();
        self.clear_result_cache();
    }

    /// Take the write lock, converting `give_up` read locks held by the
    /// caller. Waits for every other reader to leave.
    pub fn acquire_write_lock(&self, give_up: i32, cancel: Option<&dyn CancelSignal>) -> Result<()> {
        if self.read_only {
            return Err(NdError::ReadOnlyDatabase);
        }
        let me = thread::current().id();
        let start = Instant::now();
        let interval = self.check_interval();
        let report_every = Duration::from_millis(BLOCKED_WRITE_LOCK_OUTPUT_INTERVAL_MS);
        {
            let mut st = self.lock.state.lock();
            assert!(st.writer != Some(me), "duplicate write lock");
            assert!(
                give_up >= 0 && st.lock_count >= give_up,
                "cannot give up {} read locks, {} held",
                give_up,
                st.lock_count
            );

            let mut last_report = start;
            while st.lock_count > give_up || st.waiting_readers > 0 {
                self.lock.cond.wait_for(&mut st, interval);
                if let Some(c) = cancel {
                    if c.is_cancelled() {
                        drop(st);
                        record_lock_cancelled();
                        self.observer.cancelled();
                        return Err(NdError::Cancelled);
                    }
                }
                if last_report.elapsed() >= report_every {
                    self.observer
                        .write_blocked(st.lock_count, give_up, st.waiting_readers);
                    last_report = Instant::now();
                }
            }
            st.lock_count = -1;
            st.writer = Some(me);
            st.write_acquired_at = Some(Instant::now());
        }

        self.clear_result_cache();
        if let Err(e) = self.db.set_exclusive_lock() {
            let mut st = self.lock.state.lock();
            st.lock_count = give_up;
            st.writer = None;
            st.write_acquired_at = None;
            self.lock.cond.notify_all();
            return Err(e);
        }
        record_write_lock();
        self.observer.write_acquired(give_up, start.elapsed());
        debug!("write lock acquired on {}", self.path.display());
        Ok(())
    }

    /// Release the write lock, flushing according to the configuration.
    pub fn release_write_lock(&self, reestablish: i32) -> Result<()> {
        self.release_write_lock_with(reestablish, self.cfg.flush_on_release)
    }

    /// Process pending deletions, persist the next write number, give up
    /// the exclusive lock and leave `reestablish` read locks to the caller.
    /// The write number advances and the lock state is restored even if a
    /// step fails; the first error is returned.
    pub fn release_write_lock_with(&self, reestablish: i32, flush: bool) -> Result<()> {
        let me = thread::current().id();
        {
            let st = self.lock.state.lock();
            assert!(
                st.lock_count == -1 && st.writer == Some(me),
                "release of a write lock not held by this thread"
            );
        }
        assert!(reestablish >= 0, "negative read lock count");

        let mut res = self.process_deletions();
        if let Err(e) = &res {
            error!("deletion sweep on {} failed: {}", self.path.display(), e);
        }
        // advances even after a failed sweep
        let next = self.db.write_number().wrapping_add(1);
        if let Err(e) = self.db.set_write_number(next) {
            if res.is_ok() {
                res = Err(e);
            }
        }
        self.clear_result_cache();

        if let Err(e) = self.db.give_up_exclusive_lock(flush) {
            error!("flush on write lock release of {} failed: {}", self.path.display(), e);
            if res.is_ok() {
                res = Err(e);
            }
        }

        let held = {
            let mut st = self.lock.state.lock();
            st.lock_count = reestablish;
            st.writer = None;
            let held = st.write_acquired_at.take().map(|t| t.elapsed());
            self.lock.cond.notify_all();
            held.unwrap_or_default()
        };
        self.observer.write_released(reestablish, held);
        res
    }

    pub fn has_waiting_readers(&self) -> bool {
        self.lock.state.lock().waiting_readers > 0
    }

    /// Current lock count: readers, `-1` for a writer, `0` when idle.
    pub fn lock_count(&self) -> i32 {
        self.lock.state.lock().lock_count
    }

    pub fn is_write_locked_by_current_thread(&self) -> bool {
        self.lock.state.lock().writer == Some(thread::current().id())
    }

    pub(crate) fn assert_write_locked(&self) {
        assert!(
            self.is_write_locked_by_current_thread(),
            "operation requires the write lock"
        );
    }

    /// Scoped read lock.
    pub fn read(&self) -> ReadGuard<'_> {
        self.acquire_read_lock();
        ReadGuard { nd: self }
    }

    /// Scoped write lock; `finish` reports release errors, dropping logs them.
    pub fn write(&self, cancel: Option<&dyn CancelSignal>) -> Result<WriteGuard<'_>> {
        self.acquire_write_lock(0, cancel)?;
        Ok(WriteGuard {
            nd: self,
            released: false,
        })
    }
}

pub struct ReadGuard<'a> {
    nd: &'a Nd,
}

impl std::ops::Deref for ReadGuard<'_> {
    type Target = Nd;

    fn deref(&self) -> &Nd {
        self.nd
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.nd.release_read_lock();
    }
}

pub struct WriteGuard<'a> {
    nd: &'a Nd,
    released: bool,
}

impl WriteGuard<'_> {
    pub fn finish(mut self) -> Result<()> {
        self.released = true;
        self.nd.release_write_lock(0)
    }
}

impl std::ops::Deref for WriteGuard<'_> {
    type Target = Nd;

    fn deref(&self) -> &Nd {
        self.nd
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.nd.release_write_lock(0) {
                error!("releasing write lock on drop failed: {}", e);
            }
        }
    }
}
