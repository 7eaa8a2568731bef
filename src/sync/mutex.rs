//! Mutex
//!
//! Binary ownership lock. No recursion and no priority inheritance: a
//! second `take` by the owner fails with `WouldDeadlock`, and only the
//! owner may `give`. Releasing with waiters queued hands ownership straight
//! to the earliest of them.

use heapless::Vec;
use log::debug;

use super::{Outcome, WaitList};
use crate::arch::ContextSwitch;
use crate::arena::Key;
use crate::config::MAX_TASKS;
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use crate::task::{TaskId, WaitTarget};

/// Handle to a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId(pub(crate) Key);

pub(crate) struct Mutex {
    owner: Option<TaskId>,
    pub(crate) waiters: WaitList,
}

impl Mutex {
    const fn new() -> Self {
        Self {
            owner: None,
            waiters: WaitList::new(),
        }
    }
}

impl<P: ContextSwitch> Scheduler<P> {
    pub fn create_mutex(&mut self) -> Result<MutexId> {
        let key = self
            .mutexes
            .insert_with(|_| Mutex::new())
            .ok_or(Error::TableFull)?;
        debug!("mutex {:?} created", key);
        Ok(MutexId(key))
    }

    /// Destroy a mutex. Tasks still waiting on it are released with
    /// `InvalidHandle`.
    pub fn delete_mutex(&mut self, id: MutexId) -> Result<()> {
        let mut mutex = self.mutexes.remove(id.0).ok_or(Error::InvalidHandle)?;
        let waiters = mutex.waiters.drain();
        self.release_all(waiters, Err(Error::InvalidHandle));
        debug!("mutex {:?} deleted", id.0);
        Ok(())
    }

    /// Acquire the mutex for the running task, waiting up to `timeout`
    /// ticks.
    pub fn mutex_take(&mut self, id: MutexId, timeout: u32) -> Result<Outcome> {
        let me = self.calling_task()?;
        let mutex = self.mutexes.get_mut(id.0).ok_or(Error::InvalidHandle)?;
        match mutex.owner {
            None => {
                mutex.owner = Some(me);
                return Ok(Outcome::Complete);
            }
            Some(owner) if owner == me => return Err(Error::WouldDeadlock),
            Some(_) => {}
        }
        if timeout == 0 {
            return Err(Error::Timeout);
        }

        mutex.waiters.push(me);
        self.block_task(me, WaitTarget::Mutex(id), timeout);
        self.dispatch();
        Ok(Outcome::Blocked)
    }

    /// Release the mutex. Only the owner may do this.
    pub fn mutex_give(&mut self, id: MutexId) -> Result<()> {
        let me = self.calling_task()?;
        let mutex = self.mutexes.get_mut(id.0).ok_or(Error::InvalidHandle)?;
        if mutex.owner != Some(me) {
            return Err(Error::InvalidOperation);
        }
        let next = mutex.waiters.pop_front();
        mutex.owner = next;
        if let Some(next) = next {
            self.release_waiter(next, Ok(()));
        }
        Ok(())
    }

    /// Current owner, if any.
    pub fn mutex_owner(&self, id: MutexId) -> Result<Option<TaskId>> {
        self.mutexes
            .get(id.0)
            .map(|m| m.owner)
            .ok_or(Error::InvalidHandle)
    }

    /// Hand every mutex owned by a departing task to its next waiter.
    pub(crate) fn release_mutexes_owned_by(&mut self, id: TaskId) {
        let mut woken: Vec<TaskId, MAX_TASKS> = Vec::new();
        for (_, mutex) in self.mutexes.iter_mut() {
            if mutex.owner != Some(id) {
                continue;
            }
            mutex.owner = mutex.waiters.pop_front();
            if let Some(next) = mutex.owner {
                // Each task waits on one object at most, so this fits
                let _ = woken.push(next);
            }
        }
        for next in woken {
            self.release_waiter(next, Ok(()));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::arch::sim::SimPort;
    use crate::config::{MAX_MUTEXES, WAIT_FOREVER};
    use crate::scheduler::tests::{scheduler, spawn};
    use crate::scheduler::Scheduler;
    use crate::sync::Outcome;
    use crate::task::{Priority, TaskId, TaskState};
    use crate::Error;

    /// Start with `high` running and `low` Ready.
    fn two_tasks(sched: &mut Scheduler<SimPort>) -> (TaskId, TaskId) {
        let high = spawn(sched, "high", Priority::High);
        let low = spawn(sched, "low", Priority::Low);
        sched.start().unwrap();
        (high, low)
    }

    #[test]
    fn test_take_and_give() {
        let mut sched = scheduler();
        let (high, _) = two_tasks(&mut sched);
        let m = sched.create_mutex().unwrap();

        assert_eq!(sched.mutex_take(m, 0), Ok(Outcome::Complete));
        assert_eq!(sched.mutex_owner(m), Ok(Some(high)));
        sched.mutex_give(m).unwrap();
        assert_eq!(sched.mutex_owner(m), Ok(None));
    }

    #[test]
    fn test_recursive_take_would_deadlock() {
        let mut sched = scheduler();
        two_tasks(&mut sched);
        let m = sched.create_mutex().unwrap();
        assert_eq!(sched.mutex_take(m, 0), Ok(Outcome::Complete));
        assert_eq!(sched.mutex_take(m, 10), Err(Error::WouldDeadlock));
    }

    #[test]
    fn test_give_by_non_owner_rejected() {
        let mut sched = scheduler();
        let (high, low) = two_tasks(&mut sched);
        let m = sched.create_mutex().unwrap();

        // Unowned
        assert_eq!(sched.mutex_give(m), Err(Error::InvalidOperation));

        // Owned by `low`, given by `high`
        sched.delay(1);
        assert_eq!(sched.current_task(), Some(low));
        assert_eq!(sched.mutex_take(m, 0), Ok(Outcome::Complete));
        sched.tick();
        assert_eq!(sched.current_task(), Some(high));
        assert_eq!(sched.mutex_give(m), Err(Error::InvalidOperation));
        assert_eq!(sched.mutex_owner(m), Ok(Some(low)));
    }

    #[test]
    fn test_contended_take_blocks_then_owns() {
        let mut sched = scheduler();
        let (high, low) = two_tasks(&mut sched);
        let m = sched.create_mutex().unwrap();

        // `low` takes the mutex while `high` sleeps
        sched.delay(2);
        assert_eq!(sched.mutex_take(m, 0), Ok(Outcome::Complete));
        sched.tick();
        sched.tick();
        assert_eq!(sched.current_task(), Some(high));

        // `high` blocks, `low` runs and releases
        assert_eq!(sched.mutex_take(m, 0), Err(Error::Timeout));
        assert_eq!(sched.mutex_take(m, WAIT_FOREVER), Ok(Outcome::Blocked));
        assert_eq!(sched.task_state(high), Ok(TaskState::Blocked));
        assert_eq!(sched.current_task(), Some(low));

        sched.mutex_give(m).unwrap();
        assert_eq!(sched.mutex_owner(m), Ok(Some(high)));
        assert_eq!(sched.task_state(high), Ok(TaskState::Ready));
        sched.tick();
        assert_eq!(sched.current_task(), Some(high));
        assert_eq!(sched.complete_wait(high, &mut []), Ok(()));
    }

    #[test]
    fn test_take_timeout() {
        let mut sched = scheduler();
        let (high, low) = two_tasks(&mut sched);
        let m = sched.create_mutex().unwrap();

        sched.delay(1);
        assert_eq!(sched.mutex_take(m, 0), Ok(Outcome::Complete));
        sched.tick();

        assert_eq!(sched.mutex_take(m, 2), Ok(Outcome::Blocked));
        sched.tick();
        assert_eq!(sched.task_state(high), Ok(TaskState::Blocked));
        sched.tick();
        assert_eq!(sched.wait_result(high), Some(Err(Error::Timeout)));
        assert_eq!(sched.current_task(), Some(high));
        assert_eq!(sched.complete_wait(high, &mut []), Err(Error::Timeout));
        assert_eq!(sched.mutex_owner(m), Ok(Some(low)));
    }

    #[test]
    fn test_waiters_released_fifo() {
        let mut sched = scheduler();
        let owner = spawn(&mut sched, "owner", Priority::Critical);
        let first = spawn(&mut sched, "first", Priority::Low);
        let second = spawn(&mut sched, "second", Priority::High);
        sched.start().unwrap();
        let m = sched.create_mutex().unwrap();

        assert_eq!(sched.mutex_take(m, 0), Ok(Outcome::Complete));
        sched.suspend_task(owner).unwrap();
        // `second` (High) runs first; suspend it after it queues so `first`
        // can queue behind it, then bring it back.
        assert_eq!(sched.current_task(), Some(second));
        sched.suspend_task(second).unwrap();
        assert_eq!(sched.current_task(), Some(first));
        assert_eq!(sched.mutex_take(m, WAIT_FOREVER), Ok(Outcome::Blocked));
        sched.resume_task(second).unwrap();
        sched.tick();
        assert_eq!(sched.current_task(), Some(second));
        assert_eq!(sched.mutex_take(m, WAIT_FOREVER), Ok(Outcome::Blocked));

        // Arrival order wins over priority
        sched.resume_task(owner).unwrap();
        sched.tick();
        assert_eq!(sched.current_task(), Some(owner));
        sched.mutex_give(m).unwrap();
        assert_eq!(sched.mutex_owner(m), Ok(Some(first)));
        assert_eq!(sched.task_state(second), Ok(TaskState::Blocked));
    }

    #[test]
    fn test_delete_owner_hands_off() {
        let mut sched = scheduler();
        let (high, low) = two_tasks(&mut sched);
        let m = sched.create_mutex().unwrap();

        sched.delay(1);
        assert_eq!(sched.mutex_take(m, 0), Ok(Outcome::Complete));
        sched.tick();
        assert_eq!(sched.mutex_take(m, WAIT_FOREVER), Ok(Outcome::Blocked));

        sched.delete_task(low).unwrap();
        assert_eq!(sched.mutex_owner(m), Ok(Some(high)));
        assert_eq!(sched.task_state(high), Ok(TaskState::Running));
    }

    #[test]
    fn test_delete_blocked_task_leaves_wait_set() {
        let mut sched = scheduler();
        let (high, low) = two_tasks(&mut sched);
        let m = sched.create_mutex().unwrap();

        sched.delay(1);
        assert_eq!(sched.mutex_take(m, 0), Ok(Outcome::Complete));
        sched.tick();
        assert_eq!(sched.mutex_take(m, WAIT_FOREVER), Ok(Outcome::Blocked));
        sched.delete_task(high).unwrap();

        assert_eq!(sched.current_task(), Some(low));
        sched.mutex_give(m).unwrap();
        assert_eq!(sched.mutex_owner(m), Ok(None));
    }

    #[test]
    fn test_delete_mutex_releases_waiters() {
        let mut sched = scheduler();
        let (high, _) = two_tasks(&mut sched);
        let m = sched.create_mutex().unwrap();

        sched.delay(1);
        assert_eq!(sched.mutex_take(m, 0), Ok(Outcome::Complete));
        sched.tick();
        assert_eq!(sched.mutex_take(m, WAIT_FOREVER), Ok(Outcome::Blocked));

        sched.delete_mutex(m).unwrap();
        assert_eq!(sched.wait_result(high), Some(Err(Error::InvalidHandle)));
        assert_eq!(sched.mutex_take(m, 0), Err(Error::InvalidHandle));
        assert_eq!(sched.delete_mutex(m), Err(Error::InvalidHandle));
    }

    #[test]
    fn test_take_outside_task_rejected() {
        let mut sched = scheduler();
        let m = sched.create_mutex().unwrap();
        assert_eq!(sched.mutex_take(m, 0), Err(Error::InvalidOperation));
    }

    #[test]
    fn test_mutex_table_full() {
        let mut sched = scheduler();
        for _ in 0..MAX_MUTEXES {
            sched.create_mutex().unwrap();
        }
        assert_eq!(sched.create_mutex(), Err(Error::TableFull));
    }
}
