//! # Scheduler
//!
//! Core scheduling logic for TickOS: the task table, the tick handler and
//! the dispatcher. A [`Scheduler`] is a plain value; the kernel wraps one
//! instance in a critical-section mutex, tests create as many as they like.
//!
//! ## Tick Algorithm
//!
//! At each tick:
//! 1. **Advance time**: increment the tick counter
//! 2. **Expire waits**: decrement every Blocked task's countdown; at zero
//!    the task becomes Ready (a timed-out object wait completes with
//!    [`Error::Timeout`] and leaves the object's wait set)
//! 3. **Select**: the Ready or Running task with the strictly highest
//!    priority wins; ties go to the first task in slot order
//! 4. **Switch**: if the winner is not the running task, demote the running
//!    task to Ready (unless it blocked or was suspended), promote the winner
//!    and invoke the port's context-switch hook
//! 5. **Idle**: with nothing Ready, the idle context runs
//!
//! Steps 3–5 also run immediately whenever the running task stops being
//! runnable (delay, blocking wait, yield, self-suspension, deletion).
//! Tasks made Ready by a give, a resume or a creation are picked up on the
//! next tick.

use heapless::Vec;
use log::{debug, trace, warn};

use crate::arch::{idle_entry, ContextSwitch, SavedContext};
use crate::arena::Arena;
use crate::config::{
    IDLE_STACK_WORDS, MAX_MUTEXES, MAX_QUEUES, MAX_SEMAPHORES, MAX_TASKS, MIN_STACK_WORDS,
    WAIT_FOREVER,
};
use crate::error::{fatal, Error, Result};
use crate::stack::StackPool;
use crate::sync::mutex::Mutex;
use crate::sync::queue::Queue;
use crate::sync::semaphore::Semaphore;
use crate::task::{Priority, TaskControlBlock, TaskEntry, TaskId, TaskState, WaitTarget};

/// What currently owns the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Running {
    /// The scheduler has not dispatched anything yet, or the running task
    /// was just deleted.
    Nothing,
    /// No task is Ready; the idle context runs.
    Idle,
    Task(TaskId),
}

/// Scheduler statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Context switches requested from the port.
    pub context_switches: u64,
    /// Switches that landed on the idle context.
    pub idle_dispatches: u64,
}

#[repr(align(8))]
struct IdleStack([u32; IDLE_STACK_WORDS]);

/// The central scheduler state: task table, stack pool, synchronization
/// object tables and the dispatch state.
pub struct Scheduler<P: ContextSwitch> {
    pub(crate) port: P,
    pub(crate) tasks: Arena<TaskControlBlock, MAX_TASKS>,
    pub(crate) stacks: StackPool,
    pub(crate) mutexes: Arena<Mutex, MAX_MUTEXES>,
    pub(crate) semaphores: Arena<Semaphore, MAX_SEMAPHORES>,
    pub(crate) queues: Arena<Queue, MAX_QUEUES>,
    idle_stack: IdleStack,
    idle_context: SavedContext,
    running: Running,
    started: bool,
    tick_count: u64,
    stats: SchedulerStats,
}

impl<P: ContextSwitch> Scheduler<P> {
    /// Create an empty scheduler driving the given port. Call
    /// [`init`](Self::init) before use.
    pub const fn new(port: P) -> Self {
        Self {
            port,
            tasks: Arena::new(),
            stacks: StackPool::new(),
            mutexes: Arena::new(),
            semaphores: Arena::new(),
            queues: Arena::new(),
            idle_stack: IdleStack([0; IDLE_STACK_WORDS]),
            idle_context: SavedContext { stack_pointer: 0 },
            running: Running::Nothing,
            started: false,
            tick_count: 0,
            stats: SchedulerStats {
                context_switches: 0,
                idle_dispatches: 0,
            },
        }
    }

    /// Reset the scheduler to its initial state: every task and object is
    /// dropped (outstanding handles become stale), all stacks return to the
    /// pool, the tick counter restarts at zero and the idle context is
    /// rebuilt.
    pub fn init(&mut self) {
        self.tasks.clear();
        self.mutexes.clear();
        self.semaphores.clear();
        self.queues.clear();
        self.stacks.reset();
        self.running = Running::Nothing;
        self.started = false;
        self.tick_count = 0;
        self.stats = SchedulerStats::default();
        self.idle_context = self.port.init_context(&mut self.idle_stack.0, idle_entry);
        debug!("scheduler initialized");
    }

    /// Dispatch the first task (or idle). Fails if already started.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::InvalidOperation);
        }
        self.started = true;
        debug!("scheduler started with {} tasks", self.tasks.len());
        self.dispatch();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Task table
    // -----------------------------------------------------------------------

    /// Create a task in the Ready state.
    ///
    /// `stack_words` is the stack size in 32-bit words. On failure nothing
    /// changes: the table, the stack pool and the port are untouched.
    pub fn create_task(
        &mut self,
        entry: TaskEntry,
        name: &str,
        stack_words: usize,
        priority: Priority,
    ) -> Result<TaskId> {
        if self.tasks.is_full() {
            warn!("create_task({}): task table full", name);
            return Err(Error::TableFull);
        }
        if stack_words < MIN_STACK_WORDS {
            warn!("create_task({}): stack of {} words below minimum", name, stack_words);
            return Err(Error::AllocationFailed);
        }
        let Some(stack) = self.stacks.allocate(stack_words) else {
            warn!("create_task({}): no room for {} stack words", name, stack_words);
            return Err(Error::AllocationFailed);
        };

        let context = self.port.init_context(self.stacks.slice_mut(stack), entry);
        let inserted = self.tasks.insert_with(|key| {
            TaskControlBlock::new(TaskId(key), name, priority, stack, context)
        });
        match inserted {
            Some(key) => {
                debug!("task {:?} '{}' created at {:?}", key, name, priority);
                Ok(TaskId(key))
            }
            None => {
                self.stacks.free(stack);
                Err(Error::TableFull)
            }
        }
    }

    /// Delete a task: it leaves any wait set, hands off any mutex it owns
    /// and returns its stack to the pool. Deleting the running task
    /// reschedules at once.
    pub fn delete_task(&mut self, id: TaskId) -> Result<()> {
        let waiting_on = self.task(id)?.waiting_on;
        if let Some(target) = waiting_on {
            self.detach_waiter(id, target);
        }
        self.release_mutexes_owned_by(id);

        let Some(tcb) = self.tasks.remove(id.0) else {
            return Err(Error::InvalidHandle);
        };
        if !self.stacks.free(tcb.stack) {
            fatal("task stack freed twice");
        }
        debug!("task {:?} '{}' deleted", id, tcb.name());

        if self.running == Running::Task(id) {
            self.running = Running::Nothing;
            self.dispatch();
        }
        Ok(())
    }

    /// Park a task until [`resume_task`](Self::resume_task). A pending
    /// wait is cancelled: the task leaves the wait set, its countdown is
    /// cleared and the wait completes with [`Error::Timeout`].
    pub fn suspend_task(&mut self, id: TaskId) -> Result<()> {
        let (state, waiting_on) = {
            let tcb = self.task(id)?;
            (tcb.state, tcb.waiting_on)
        };
        if state == TaskState::Suspended {
            return Ok(());
        }

        match waiting_on {
            Some(WaitTarget::Delay) => {
                let tcb = self.tcb_mut(id);
                tcb.waiting_on = None;
                tcb.wake_in = 0;
            }
            Some(target) => {
                self.detach_waiter(id, target);
                self.tcb_mut(id).release(Err(Error::Timeout));
            }
            None => {}
        }
        self.tcb_mut(id).state = TaskState::Suspended;
        trace!("task {:?} suspended", id);

        if self.running == Running::Task(id) {
            self.dispatch();
        }
        Ok(())
    }

    /// Make a Suspended task Ready. Any other state is left alone.
    pub fn resume_task(&mut self, id: TaskId) -> Result<()> {
        let tcb = self.tasks.get_mut(id.0).ok_or(Error::InvalidHandle)?;
        if tcb.state == TaskState::Suspended {
            tcb.state = TaskState::Ready;
            trace!("task {:?} resumed", id);
        }
        Ok(())
    }

    /// Block the running task for `ticks` ticks. `0`, or no running task,
    /// is a no-op.
    pub fn delay(&mut self, ticks: u32) {
        if ticks == 0 {
            return;
        }
        let Some(id) = self.current_task() else {
            return;
        };
        self.tcb_mut(id).block(WaitTarget::Delay, ticks);
        trace!("task {:?} delayed {} ticks", id, ticks);
        self.dispatch();
    }

    /// Give up the CPU. The running task stays Ready and competes again
    /// under the usual rules.
    pub fn yield_now(&mut self) {
        if let Some(id) = self.current_task() {
            self.tcb_mut(id).state = TaskState::Ready;
            self.dispatch();
        }
    }

    /// The running task's entry point returned: delete it.
    pub fn exit_current(&mut self) {
        if let Some(id) = self.current_task() {
            debug!("task {:?} returned from its entry point", id);
            if self.delete_task(id).is_err() {
                fatal("running task missing from the task table");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tick and dispatch
    // -----------------------------------------------------------------------

    /// Called once per tick by the time source.
    pub fn tick(&mut self) {
        self.tick_count += 1;

        let mut expired: Vec<(TaskId, WaitTarget), MAX_TASKS> = Vec::new();
        for (key, tcb) in self.tasks.iter_mut() {
            if !tcb.count_down() {
                continue;
            }
            match tcb.waiting_on {
                Some(WaitTarget::Delay) | None => tcb.release(Ok(())),
                Some(target) => {
                    // Capacity equals the task table size
                    let _ = expired.push((TaskId(key), target));
                }
            }
        }
        for (id, target) in expired {
            self.detach_waiter(id, target);
            self.tcb_mut(id).release(Err(Error::Timeout));
            trace!("task {:?} wait timed out", id);
        }

        self.dispatch();
    }

    /// Highest-priority runnable task, first in slot order on ties.
    fn select(&self) -> Option<TaskId> {
        let mut best: Option<(TaskId, Priority)> = None;
        for (key, tcb) in self.tasks.iter() {
            if !matches!(tcb.state, TaskState::Ready | TaskState::Running) {
                continue;
            }
            if best.map_or(true, |(_, p)| tcb.priority() > p) {
                best = Some((TaskId(key), tcb.priority()));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Pick the next task and switch to it if it is not already running.
    pub(crate) fn dispatch(&mut self) {
        if !self.started {
            return;
        }
        let next = match self.select() {
            Some(id) => Running::Task(id),
            None => Running::Idle,
        };

        if next == self.running {
            // A yielding task that wins again just keeps the CPU
            if let Running::Task(id) = next {
                self.tcb_mut(id).state = TaskState::Running;
            }
            return;
        }

        let prev = self.running;
        if let Running::Task(prev_id) = prev {
            if let Some(tcb) = self.tasks.get_mut(prev_id.0) {
                if tcb.state == TaskState::Running {
                    tcb.state = TaskState::Ready;
                }
            }
        }

        let load = match next {
            Running::Task(id) => {
                let tcb = self.tcb_mut(id);
                tcb.state = TaskState::Running;
                tcb.context
            }
            _ => {
                self.stats.idle_dispatches += 1;
                self.idle_context
            }
        };

        trace!("dispatch {:?} -> {:?} at tick {}", prev, next, self.tick_count);
        self.running = next;
        self.stats.context_switches += 1;

        let save = match prev {
            Running::Task(prev_id) => self.tasks.get_mut(prev_id.0).map(|t| &mut t.context),
            Running::Idle => Some(&mut self.idle_context),
            Running::Nothing => None,
        };
        self.port.switch_context(save, &load);
    }

    // -----------------------------------------------------------------------
    // Blocking support for the synchronization primitives
    // -----------------------------------------------------------------------

    /// The running task, or `InvalidOperation` outside task context.
    pub(crate) fn calling_task(&self) -> Result<TaskId> {
        self.current_task().ok_or(Error::InvalidOperation)
    }

    /// Block `id` on `target`. `timeout` is in ticks; [`WAIT_FOREVER`]
    /// means no countdown.
    pub(crate) fn block_task(&mut self, id: TaskId, target: WaitTarget, timeout: u32) {
        let ticks = if timeout == WAIT_FOREVER { 0 } else { timeout };
        self.tcb_mut(id).block(target, ticks);
        trace!("task {:?} blocked on {:?}", id, target);
    }

    /// Release a task taken off a wait set.
    pub(crate) fn release_waiter(&mut self, id: TaskId, result: Result<()>) {
        self.tcb_mut(id).release(result);
    }

    /// Control block of a task that must be live. A miss means the table
    /// and its bookkeeping disagree.
    pub(crate) fn tcb_mut(&mut self, id: TaskId) -> &mut TaskControlBlock {
        match self.tasks.get_mut(id.0) {
            Some(tcb) => tcb,
            None => fatal("live task missing from the task table"),
        }
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn task(&self, id: TaskId) -> Result<&TaskControlBlock> {
        self.tasks.get(id.0).ok_or(Error::InvalidHandle)
    }

    pub fn task_state(&self, id: TaskId) -> Result<TaskState> {
        self.task(id).map(|t| t.state())
    }

    /// Live tasks (idle excluded).
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Live tasks in slot order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskControlBlock> {
        self.tasks.iter().map(|(_, t)| t)
    }

    pub fn current_task(&self) -> Option<TaskId> {
        match self.running {
            Running::Task(id) => Some(id),
            _ => None,
        }
    }

    pub fn running(&self) -> Running {
        self.running
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Saved context of the idle context.
    pub fn idle_context(&self) -> SavedContext {
        self.idle_context
    }

    /// Words of the stack pool currently owned by tasks.
    pub fn stack_words_in_use(&self) -> usize {
        self.stacks.used_words()
    }

    /// Outcome of the task's last completed wait, without consuming it.
    pub fn wait_result(&self, id: TaskId) -> Option<Result<()>> {
        self.tasks.get(id.0).and_then(|t| t.wait_result)
    }

    /// Consume the outcome of a completed wait. For a queue receive the
    /// delivered item is copied into `out`; other waits ignore `out`.
    ///
    /// Fails with `InvalidOperation` if the wait has not completed yet.
    pub fn complete_wait(&mut self, id: TaskId, out: &mut [u8]) -> Result<()> {
        let tcb = self.tasks.get_mut(id.0).ok_or(Error::InvalidHandle)?;
        let result = tcb.wait_result.take().ok_or(Error::InvalidOperation)?;
        result?;
        if !tcb.parcel.is_empty() {
            let len = tcb.parcel.len();
            let dst = out.get_mut(..len).ok_or(Error::InvalidOperation)?;
            dst.copy_from_slice(&tcb.parcel);
            tcb.parcel.clear();
        }
        Ok(())
    }

    pub fn port(&self) -> &P {
        &self.port
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
