//! # Synchronization Primitives
//!
//! Mutexes, counting semaphores and message queues built on the task
//! table's block/wake mechanism, plus the critical-section wrapper that
//! makes every kernel call atomic with respect to the tick interrupt.
//!
//! ## Blocking Contract
//!
//! A `take`/`send`/`receive` either completes at once
//! ([`Outcome::Complete`]), fails with [`Error::Timeout`] when `timeout` is
//! zero, or blocks the calling task ([`Outcome::Blocked`]). A blocked task
//! is released by a matching `give`/`send`/`receive`, by its countdown
//! expiring, or by the object being deleted; it then collects the result
//! with [`Scheduler::complete_wait`].
//!
//! A release always goes to the earliest arrival in the object's wait set
//! (FIFO), and the resource is handed over directly: the woken task does
//! not have to compete for it again.
//!
//! [`Error::Timeout`]: crate::Error::Timeout
//! [`Scheduler::complete_wait`]: crate::Scheduler::complete_wait

pub mod mutex;
pub mod queue;
pub mod semaphore;

pub use mutex::MutexId;
pub use queue::QueueId;
pub use semaphore::SemaphoreId;

use critical_section::CriticalSection;
use heapless::Vec;

use crate::arch::ContextSwitch;
use crate::config::MAX_TASKS;
use crate::error::fatal;
use crate::scheduler::Scheduler;
use crate::task::{TaskId, WaitTarget};

/// Result of a potentially blocking call that did not fail.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation finished without blocking.
    Complete,
    /// The calling task is now Blocked; its result arrives later.
    Blocked,
}

/// Execute a closure within a critical section (interrupts disabled).
///
/// This is the primary mechanism for safely accessing shared mutable state
/// in the TickOS kernel. Interrupts are disabled on entry and restored on
/// exit, ensuring atomicity of the enclosed operation.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     // Access shared state safely
/// });
/// ```
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// Tasks blocked on one object, in arrival order.
pub(crate) struct WaitList {
    tasks: Vec<TaskId, MAX_TASKS>,
}

impl WaitList {
    pub(crate) const fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Append a waiter. A task waits on at most one object, so the list
    /// can never outgrow the task table.
    pub(crate) fn push(&mut self, id: TaskId) {
        if self.tasks.push(id).is_err() {
            fatal("wait list overflow");
        }
    }

    /// Earliest arrival.
    pub(crate) fn pop_front(&mut self) -> Option<TaskId> {
        if self.tasks.is_empty() {
            None
        } else {
            Some(self.tasks.remove(0))
        }
    }

    /// Remove a specific waiter. Returns `false` if it was not waiting.
    pub(crate) fn remove(&mut self, id: TaskId) -> bool {
        match self.tasks.iter().position(|t| *t == id) {
            Some(i) => {
                self.tasks.remove(i);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Take every waiter out, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<TaskId, MAX_TASKS> {
        core::mem::take(&mut self.tasks)
    }
}

impl<P: ContextSwitch> Scheduler<P> {
    /// Take a blocked task out of the wait set it is queued on.
    pub(crate) fn detach_waiter(&mut self, id: TaskId, target: WaitTarget) {
        let removed = match target {
            WaitTarget::Delay => true,
            WaitTarget::Mutex(m) => self
                .mutexes
                .get_mut(m.0)
                .is_some_and(|m| m.waiters.remove(id)),
            WaitTarget::Semaphore(s) => self
                .semaphores
                .get_mut(s.0)
                .is_some_and(|s| s.waiters.remove(id)),
            WaitTarget::QueueSend(q) => self
                .queues
                .get_mut(q.0)
                .is_some_and(|q| q.senders.remove(id)),
            WaitTarget::QueueReceive(q) => self
                .queues
                .get_mut(q.0)
                .is_some_and(|q| q.receivers.remove(id)),
        };
        if !removed {
            fatal("blocked task missing from its wait set");
        }
    }

    /// Release every task in `waiters` with the same result.
    pub(crate) fn release_all(&mut self, waiters: Vec<TaskId, MAX_TASKS>, result: crate::Result<()>) {
        for id in waiters {
            self.release_waiter(id, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use core::cell::Cell;

    fn ids(n: usize) -> Vec<TaskId, MAX_TASKS> {
        let mut arena: Arena<(), MAX_TASKS> = Arena::new();
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(TaskId(arena.insert_with(|_| ()).unwrap())).unwrap();
        }
        out
    }

    #[test]
    fn test_wait_list_fifo() {
        let t = ids(3);
        let mut list = WaitList::new();
        for id in &t {
            list.push(*id);
        }
        assert_eq!(list.len(), 3);
        assert_eq!(list.pop_front(), Some(t[0]));
        assert_eq!(list.pop_front(), Some(t[1]));
        assert_eq!(list.pop_front(), Some(t[2]));
        assert_eq!(list.pop_front(), None);
    }

    #[test]
    fn test_wait_list_remove_keeps_order() {
        let t = ids(3);
        let mut list = WaitList::new();
        for id in &t {
            list.push(*id);
        }
        assert!(list.remove(t[1]));
        assert!(!list.remove(t[1]));
        let drained = list.drain();
        assert_eq!(drained.as_slice(), &[t[0], t[2]]);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_critical_section_runs_closure() {
        let shared = critical_section::Mutex::new(Cell::new(0u32));
        let out = critical_section(|cs| {
            let cell = shared.borrow(cs);
            cell.set(cell.get() + 1);
            cell.get()
        });
        assert_eq!(out, 1);
    }
}
