//! Counting semaphore
//!
//! A count bounded by `[0, max_count]`. `take` consumes a unit or waits for
//! one; `give` hands a unit to the earliest waiter, or adds it to the count
//! if nobody waits. Giving past `max_count` is rejected and leaves the count
//! unchanged.
//!
//! `give` and non-blocking `take` need no calling task, so interrupt
//! handlers may use them.

use log::debug;

use super::{Outcome, WaitList};
use crate::arch::ContextSwitch;
use crate::arena::Key;
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use crate::task::WaitTarget;

/// Handle to a semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreId(pub(crate) Key);

pub(crate) struct Semaphore {
    count: u32,
    max_count: u32,
    pub(crate) waiters: WaitList,
}

impl<P: ContextSwitch> Scheduler<P> {
    /// Create a semaphore holding `initial` units out of `max_count`.
    pub fn create_semaphore(&mut self, initial: u32, max_count: u32) -> Result<SemaphoreId> {
        if max_count == 0 || initial > max_count {
            return Err(Error::InvalidOperation);
        }
        let key = self
            .semaphores
            .insert_with(|_| Semaphore {
                count: initial,
                max_count,
                waiters: WaitList::new(),
            })
            .ok_or(Error::TableFull)?;
        debug!("semaphore {:?} created ({}/{})", key, initial, max_count);
        Ok(SemaphoreId(key))
    }

    /// Destroy a semaphore. Tasks still waiting on it are released with
    /// `InvalidHandle`.
    pub fn delete_semaphore(&mut self, id: SemaphoreId) -> Result<()> {
        let mut sem = self.semaphores.remove(id.0).ok_or(Error::InvalidHandle)?;
        let waiters = sem.waiters.drain();
        self.release_all(waiters, Err(Error::InvalidHandle));
        debug!("semaphore {:?} deleted", id.0);
        Ok(())
    }

    /// Take one unit, waiting up to `timeout` ticks.
    pub fn semaphore_take(&mut self, id: SemaphoreId, timeout: u32) -> Result<Outcome> {
        let sem = self.semaphores.get_mut(id.0).ok_or(Error::InvalidHandle)?;
        if sem.count > 0 {
            sem.count -= 1;
            return Ok(Outcome::Complete);
        }
        if timeout == 0 {
            return Err(Error::Timeout);
        }

        let me = self.calling_task()?;
        if let Some(sem) = self.semaphores.get_mut(id.0) {
            sem.waiters.push(me);
        }
        self.block_task(me, WaitTarget::Semaphore(id), timeout);
        self.dispatch();
        Ok(Outcome::Blocked)
    }

    /// Return one unit.
    pub fn semaphore_give(&mut self, id: SemaphoreId) -> Result<()> {
        let sem = self.semaphores.get_mut(id.0).ok_or(Error::InvalidHandle)?;
        if let Some(next) = sem.waiters.pop_front() {
            self.release_waiter(next, Ok(()));
            return Ok(());
        }
        if sem.count >= sem.max_count {
            return Err(Error::InvalidOperation);
        }
        sem.count += 1;
        Ok(())
    }

    /// Units currently available.
    pub fn semaphore_count(&self, id: SemaphoreId) -> Result<u32> {
        self.semaphores
            .get(id.0)
            .map(|s| s.count)
            .ok_or(Error::InvalidHandle)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{MAX_SEMAPHORES, WAIT_FOREVER};
    use crate::scheduler::tests::{scheduler, spawn};
    use crate::sync::Outcome;
    use crate::task::{Priority, TaskState};
    use crate::Error;

    #[test]
    fn test_create_validates_bounds() {
        let mut sched = scheduler();
        assert_eq!(sched.create_semaphore(0, 0), Err(Error::InvalidOperation));
        assert_eq!(sched.create_semaphore(3, 2), Err(Error::InvalidOperation));
        let s = sched.create_semaphore(2, 2).unwrap();
        assert_eq!(sched.semaphore_count(s), Ok(2));
    }

    #[test]
    fn test_take_decrements_until_empty() {
        let mut sched = scheduler();
        let s = sched.create_semaphore(2, 5).unwrap();
        // Non-blocking takes need no task
        assert_eq!(sched.semaphore_take(s, 0), Ok(Outcome::Complete));
        assert_eq!(sched.semaphore_take(s, 0), Ok(Outcome::Complete));
        assert_eq!(sched.semaphore_count(s), Ok(0));
        assert_eq!(sched.semaphore_take(s, 0), Err(Error::Timeout));
        // Blocking needs one
        assert_eq!(sched.semaphore_take(s, 5), Err(Error::InvalidOperation));
    }

    #[test]
    fn test_give_bounded_by_max() {
        let mut sched = scheduler();
        let s = sched.create_semaphore(1, 2).unwrap();
        sched.semaphore_give(s).unwrap();
        assert_eq!(sched.semaphore_count(s), Ok(2));
        assert_eq!(sched.semaphore_give(s), Err(Error::InvalidOperation));
        assert_eq!(sched.semaphore_count(s), Ok(2));
    }

    #[test]
    fn test_take_times_out_after_three_ticks() {
        let mut sched = scheduler();
        let waiter = spawn(&mut sched, "waiter", Priority::High);
        sched.start().unwrap();
        let s = sched.create_semaphore(0, 1).unwrap();

        assert_eq!(sched.semaphore_take(s, 3), Ok(Outcome::Blocked));
        sched.tick();
        sched.tick();
        assert_eq!(sched.task_state(waiter), Ok(TaskState::Blocked));
        assert_eq!(sched.wait_result(waiter), None);
        sched.tick();
        assert_eq!(sched.task_state(waiter), Ok(TaskState::Running));
        assert_eq!(sched.complete_wait(waiter, &mut []), Err(Error::Timeout));

        // The timed-out waiter no longer absorbs gives
        sched.semaphore_give(s).unwrap();
        assert_eq!(sched.semaphore_count(s), Ok(1));
    }

    #[test]
    fn test_give_on_tick_two_releases_waiter() {
        let mut sched = scheduler();
        let waiter = spawn(&mut sched, "waiter", Priority::High);
        sched.start().unwrap();
        let s = sched.create_semaphore(0, 1).unwrap();

        assert_eq!(sched.semaphore_take(s, 3), Ok(Outcome::Blocked));
        sched.tick();
        sched.tick();
        // An interrupt handler gives
        sched.semaphore_give(s).unwrap();
        assert_eq!(sched.task_state(waiter), Ok(TaskState::Ready));
        assert_eq!(sched.semaphore_count(s), Ok(0));
        sched.tick();
        assert_eq!(sched.current_task(), Some(waiter));
        assert_eq!(sched.complete_wait(waiter, &mut []), Ok(()));
        // Consumed
        assert_eq!(sched.complete_wait(waiter, &mut []), Err(Error::InvalidOperation));
    }

    #[test]
    fn test_waiters_released_in_arrival_order() {
        let mut sched = scheduler();
        let a = spawn(&mut sched, "a", Priority::High);
        let b = spawn(&mut sched, "b", Priority::High);
        let c = spawn(&mut sched, "c", Priority::High);
        sched.start().unwrap();
        let s = sched.create_semaphore(0, 3).unwrap();

        for expected in [a, b, c] {
            assert_eq!(sched.current_task(), Some(expected));
            assert_eq!(sched.semaphore_take(s, WAIT_FOREVER), Ok(Outcome::Blocked));
        }
        sched.semaphore_give(s).unwrap();
        assert_eq!(sched.task_state(a), Ok(TaskState::Ready));
        assert_eq!(sched.task_state(b), Ok(TaskState::Blocked));
        sched.semaphore_give(s).unwrap();
        assert_eq!(sched.task_state(b), Ok(TaskState::Ready));
        assert_eq!(sched.task_state(c), Ok(TaskState::Blocked));
    }

    #[test]
    fn test_delete_semaphore_releases_waiters() {
        let mut sched = scheduler();
        let waiter = spawn(&mut sched, "waiter", Priority::Normal);
        sched.start().unwrap();
        let s = sched.create_semaphore(0, 1).unwrap();
        assert_eq!(sched.semaphore_take(s, WAIT_FOREVER), Ok(Outcome::Blocked));

        sched.delete_semaphore(s).unwrap();
        assert_eq!(sched.task_state(waiter), Ok(TaskState::Ready));
        assert_eq!(sched.complete_wait(waiter, &mut []), Err(Error::InvalidHandle));
        assert_eq!(sched.semaphore_give(s), Err(Error::InvalidHandle));
    }

    #[test]
    fn test_suspend_cancels_wait() {
        let mut sched = scheduler();
        let waiter = spawn(&mut sched, "waiter", Priority::Normal);
        sched.start().unwrap();
        let s = sched.create_semaphore(0, 1).unwrap();
        assert_eq!(sched.semaphore_take(s, WAIT_FOREVER), Ok(Outcome::Blocked));

        sched.suspend_task(waiter).unwrap();
        assert_eq!(sched.task_state(waiter), Ok(TaskState::Suspended));
        assert_eq!(sched.wait_result(waiter), Some(Err(Error::Timeout)));
        sched.semaphore_give(s).unwrap();
        assert_eq!(sched.semaphore_count(s), Ok(1));
    }

    #[test]
    fn test_semaphore_table_full() {
        let mut sched = scheduler();
        for _ in 0..MAX_SEMAPHORES {
            sched.create_semaphore(0, 1).unwrap();
        }
        assert_eq!(sched.create_semaphore(0, 1), Err(Error::TableFull));
    }
}
