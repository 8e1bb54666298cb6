//! Fair reader/writer scheduling around a single connection.
//!
//! Requests are admitted strictly in arrival order with one relaxation: a run
//! of consecutive reads at the head of the queue is admitted together. Once a
//! write is queued, everything queued after it waits until that write has
//! run and released, so a steady stream of readers cannot starve a writer.
//!
//! Waiting is done through `Waker`s, so the scheduler works under any
//! executor.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

/// The kind of access a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("read"),
            Access::Write => f.write_str("write"),
        }
    }
}

/// A point-in-time view of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockStats {
    /// Read holders currently running.
    pub active_readers: usize,
    /// Whether a write holder is currently running.
    pub writer_active: bool,
    /// Read requests waiting in the queue.
    pub queued_reads: usize,
    /// Write requests waiting in the queue.
    pub queued_writes: usize,
}

impl LockStats {
    pub fn is_idle(&self) -> bool {
        self.active_readers == 0 && !self.writer_active
    }

    pub fn queued(&self) -> usize {
        self.queued_reads + self.queued_writes
    }
}

struct Waiter {
    id: u64,
    access: Access,
    waker: Waker,
}

#[derive(Default)]
struct State {
    readers: usize,
    writer: bool,
    queue: VecDeque<Waiter>,
    /// Requests admitted by `dispatch` whose future has not observed it yet.
    granted: HashSet<u64>,
    next_id: u64,
}

impl State {
    fn admits(&self, access: Access) -> bool {
        match access {
            Access::Read => !self.writer,
            Access::Write => !self.writer && self.readers == 0,
        }
    }

    fn occupy(&mut self, access: Access) {
        match access {
            Access::Read => self.readers += 1,
            Access::Write => self.writer = true,
        }
    }

    fn vacate(&mut self, access: Access) {
        match access {
            Access::Read => self.readers = self.readers.saturating_sub(1),
            Access::Write => self.writer = false,
        }
    }

    /// Admit requests from the head of the queue, returning the wakers to fire.
    fn dispatch(&mut self) -> Vec<Waker> {
        let mut wake = Vec::new();
        while let Some(head) = self.queue.front() {
            if !self.admits(head.access) {
                break;
            }
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            self.occupy(waiter.access);
            self.granted.insert(waiter.id);
            tracing::trace!(id = waiter.id, access = %waiter.access, readers = self.readers, "lock granted to waiter");
            wake.push(waiter.waker);
            if waiter.access == Access::Write {
                break;
            }
        }
        wake
    }

    fn stats(&self) -> LockStats {
        let queued_writes = self
            .queue
            .iter()
            .filter(|w| w.access == Access::Write)
            .count();
        LockStats {
            active_readers: self.readers,
            writer_active: self.writer,
            queued_reads: self.queue.len() - queued_writes,
            queued_writes,
        }
    }
}

fn wake_all(wakers: Vec<Waker>) {
    for waker in wakers {
        waker.wake();
    }
}

/// Fair reader/writer lock.
///
/// ```rust,ignore
/// let lock = LockScheduler::new();
/// {
///     let _shared = lock.read().await;
///     // other readers may run here, writers wait
/// }
/// let total = lock.with_write(|| async { 42 }).await;
/// ```
#[derive(Default)]
pub struct LockScheduler {
    state: Mutex<State>,
}

impl fmt::Debug for LockScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockScheduler")
            .field("stats", &self.stats())
            .finish()
    }
}

impl LockScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for shared access.
    pub fn read(&self) -> Acquire<'_> {
        Acquire::new(self, Access::Read)
    }

    /// Wait for exclusive access.
    pub fn write(&self) -> Acquire<'_> {
        Acquire::new(self, Access::Write)
    }

    /// Run `operation` with shared access, releasing it afterwards.
    pub async fn with_read<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.read().await;
        operation().await
    }

    /// Run `operation` with exclusive access, releasing it afterwards.
    pub async fn with_write<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.write().await;
        operation().await
    }

    pub fn stats(&self) -> LockStats {
        self.state().stats()
    }

    fn release(&self, access: Access) {
        let wakers = {
            let mut state = self.state();
            state.vacate(access);
            tracing::trace!(access = %access, readers = state.readers, queued = state.queue.len(), "lock released");
            state.dispatch()
        };
        wake_all(wakers);
    }
}

/// Future returned by [`LockScheduler::read`] and [`LockScheduler::write`].
///
/// Dropping it before it completes withdraws the request; if the request had
/// already been admitted, the admission is released.
#[must_use = "futures do nothing unless polled"]
pub struct Acquire<'a> {
    lock: &'a LockScheduler,
    access: Access,
    /// Queue ticket, once the request had to wait.
    ticket: Option<u64>,
    done: bool,
}

impl<'a> Acquire<'a> {
    fn new(lock: &'a LockScheduler, access: Access) -> Self {
        Self {
            lock,
            access,
            ticket: None,
            done: false,
        }
    }

    fn guard(&mut self) -> Guard<'a> {
        self.done = true;
        Guard {
            lock: self.lock,
            access: self.access,
        }
    }
}

impl<'a> Future for Acquire<'a> {
    type Output = Guard<'a>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let lock = this.lock;
        let mut state = lock.state();

        match this.ticket {
            None => {
                if state.queue.is_empty() && state.admits(this.access) {
                    state.occupy(this.access);
                    tracing::trace!(access = %this.access, readers = state.readers, "lock granted");
                    drop(state);
                    return Poll::Ready(this.guard());
                }
                let id = state.next_id;
                state.next_id += 1;
                state.queue.push_back(Waiter {
                    id,
                    access: this.access,
                    waker: cx.waker().clone(),
                });
                this.ticket = Some(id);
                tracing::trace!(id, access = %this.access, queued = state.queue.len(), "lock request queued");
                Poll::Pending
            }
            Some(id) => {
                if state.granted.remove(&id) {
                    drop(state);
                    return Poll::Ready(this.guard());
                }
                if let Some(waiter) = state.queue.iter_mut().find(|w| w.id == id) {
                    waiter.waker.clone_from(cx.waker());
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let Some(id) = self.ticket else {
            return;
        };
        let wakers = {
            let mut state = self.lock.state();
            if state.granted.remove(&id) {
                state.vacate(self.access);
            } else {
                state.queue.retain(|w| w.id != id);
            }
            tracing::trace!(id, access = %self.access, "lock request withdrawn");
            // A withdrawn writer at the head may have been holding back readers
            state.dispatch()
        };
        wake_all(wakers);
    }
}

/// Held access. Dropping it releases the slot and admits the next requests.
#[must_use = "dropping the guard releases the lock immediately"]
pub struct Guard<'a> {
    lock: &'a LockScheduler,
    access: Access,
}

impl Guard<'_> {
    pub fn access(&self) -> Access {
        self.access
    }
}

impl fmt::Debug for Guard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard").field("access", &self.access).finish()
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.access);
    }
}

/// Shared access guard.
pub type ReadGuard<'a> = Guard<'a>;

/// Exclusive access guard.
pub type WriteGuard<'a> = Guard<'a>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::pin::pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let mut cx = Context::from_waker(Waker::noop());
        Pin::new(fut).poll(&mut cx)
    }

    fn ready<F: Future + Unpin>(mut fut: F) -> F::Output {
        match poll_once(&mut fut) {
            Poll::Ready(out) => out,
            Poll::Pending => panic!("expected the lock to be granted immediately"),
        }
    }

    #[test]
    fn readers_share() {
        let lock = LockScheduler::new();
        let r1 = ready(lock.read());
        let r2 = ready(lock.read());
        assert_eq!(lock.stats().active_readers, 2);
        drop(r1);
        drop(r2);
        assert!(lock.stats().is_idle());
    }

    #[test]
    fn writer_excludes_everyone() {
        let lock = LockScheduler::new();
        let w = ready(lock.write());
        let mut r = lock.read();
        let mut w2 = lock.write();
        assert!(poll_once(&mut r).is_pending());
        assert!(poll_once(&mut w2).is_pending());
        assert_eq!(
            lock.stats(),
            LockStats {
                active_readers: 0,
                writer_active: true,
                queued_reads: 1,
                queued_writes: 1,
            }
        );

        drop(w);
        let r = match poll_once(&mut r) {
            Poll::Ready(g) => g,
            Poll::Pending => panic!("reader at head should be admitted"),
        };
        assert!(poll_once(&mut w2).is_pending());
        drop(r);
        assert!(poll_once(&mut w2).is_ready());
    }

    #[test]
    fn queued_writer_blocks_later_readers() {
        let lock = LockScheduler::new();
        let r1 = ready(lock.read());

        let mut w = lock.write();
        assert!(poll_once(&mut w).is_pending());

        // Readers are running, but a writer is waiting: new readers queue up
        let mut r2 = lock.read();
        assert!(poll_once(&mut r2).is_pending());

        drop(r1);
        let w = match poll_once(&mut w) {
            Poll::Ready(g) => g,
            Poll::Pending => panic!("writer should be admitted once readers drain"),
        };
        assert!(poll_once(&mut r2).is_pending());
        drop(w);
        assert!(poll_once(&mut r2).is_ready());
    }

    #[test]
    fn consecutive_reads_are_admitted_together() {
        let lock = LockScheduler::new();
        let w = ready(lock.write());

        let mut r1 = lock.read();
        let mut r2 = lock.read();
        let mut w2 = lock.write();
        let mut r3 = lock.read();
        for fut in [&mut r1, &mut r2, &mut w2, &mut r3] {
            assert!(poll_once(fut).is_pending());
        }

        drop(w);
        let g1 = match poll_once(&mut r1) {
            Poll::Ready(g) => g,
            Poll::Pending => panic!("first queued read should be admitted"),
        };
        let g2 = match poll_once(&mut r2) {
            Poll::Ready(g) => g,
            Poll::Pending => panic!("second queued read should be admitted with the first"),
        };
        assert_eq!(lock.stats().active_readers, 2);
        assert!(poll_once(&mut w2).is_pending());
        assert!(poll_once(&mut r3).is_pending());

        drop(g1);
        assert!(poll_once(&mut w2).is_pending());
        drop(g2);
        let g3 = match poll_once(&mut w2) {
            Poll::Ready(g) => g,
            Poll::Pending => panic!("writer should follow the read batch"),
        };
        assert!(poll_once(&mut r3).is_pending());
        drop(g3);
        assert!(poll_once(&mut r3).is_ready());
    }

    #[test]
    fn release_wakes_the_next_waiter() {
        let lock = LockScheduler::new();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));

        let r = ready(lock.read());
        let mut w = lock.write();
        assert!(Pin::new(&mut w).poll(&mut Context::from_waker(&waker)).is_pending());
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        drop(r);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(poll_once(&mut w).is_ready());
    }

    #[test]
    fn withdrawn_writer_unblocks_readers_behind_it() {
        let lock = LockScheduler::new();
        let r1 = ready(lock.read());
        let mut w = lock.write();
        let mut r2 = lock.read();
        assert!(poll_once(&mut w).is_pending());
        assert!(poll_once(&mut r2).is_pending());

        drop(w);
        assert_eq!(lock.stats().queued_writes, 0);
        assert!(poll_once(&mut r2).is_ready());
        drop(r1);
    }

    #[test]
    fn dropped_grant_is_released() {
        let lock = LockScheduler::new();
        let w = ready(lock.write());
        let mut r = lock.read();
        assert!(poll_once(&mut r).is_pending());

        drop(w);
        // Admitted by dispatch, but the future never observed it
        assert_eq!(lock.stats().active_readers, 1);
        drop(r);
        assert!(lock.stats().is_idle());
        assert!(poll_once(&mut lock.write()).is_ready());
    }

    #[test]
    fn guard_released_on_panic() {
        let lock = LockScheduler::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _g = ready(lock.write());
            panic!("holder failed");
        }));
        assert!(result.is_err());
        assert!(lock.stats().is_idle());
    }

    #[test]
    fn closure_wrappers_release_on_completion() {
        let lock = LockScheduler::new();
        let mut fut = pin!(lock.with_read(|| async { 5 }));
        let mut cx = Context::from_waker(Waker::noop());
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(5));
        assert!(lock.stats().is_idle());

        let held = ready(lock.read());
        let mut fut = pin!(lock.with_write(|| async { "done" }));
        assert!(fut.as_mut().poll(&mut cx).is_pending());
        assert_eq!(lock.stats().queued_writes, 1);
        drop(held);
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready("done"));
        assert!(lock.stats().is_idle());
    }
}
