//! # Kernel
//!
//! The process-wide scheduler instance and the task-facing API on top of
//! it. Every call runs inside a critical section, so the tick handler
//! never observes a half-finished operation.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()        ← Reset the scheduler
//!         ├─► kernel::create_*()    ← Tasks, mutexes, semaphores, queues
//!         └─► kernel::start()       ← Launch scheduler (no return)
//!               ├─► Configure SysTick
//!               ├─► Set interrupt priorities
//!               └─► Dispatch the first task (PendSV)
//! ```
//!
//! ## Blocking Calls
//!
//! The blocking wrappers here return only once the operation has finished.
//! When the underlying call blocks, PendSV switches away as soon as the
//! critical section closes; execution resumes in the wrapper after the
//! task is released, and the wrapper then collects the result.

use core::cell::RefCell;

use critical_section::Mutex;
use log::warn;

use crate::arch::cortex_m4::{self, CortexM4};
use crate::error::Result;
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::sync::{self, MutexId, Outcome, QueueId, SemaphoreId};
use crate::task::{Priority, TaskEntry, TaskId};

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

static SCHEDULER: Mutex<RefCell<Scheduler<CortexM4>>> =
    Mutex::new(RefCell::new(Scheduler::new(CortexM4::new())));

/// Run `f` on the global scheduler inside a critical section.
fn with<F, R>(f: F) -> R
where
    F: FnOnce(&mut Scheduler<CortexM4>) -> R,
{
    sync::critical_section(|cs| f(&mut SCHEDULER.borrow_ref_mut(cs)))
}

/// Finish a call that may have blocked the calling task.
fn finish(outcome: Outcome, out: &mut [u8]) -> Result<()> {
    match outcome {
        Outcome::Complete => Ok(()),
        // Back from the switch: the wait is over
        Outcome::Blocked => with(|s| {
            let me = s.current_task().ok_or(crate::Error::InvalidOperation)?;
            s.complete_wait(me, out)
        }),
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Reset the kernel. Drops every task and object.
pub fn init() {
    with(|s| s.init());
}

/// Start the scheduler. **Does not return.**
///
/// Configures SysTick and the exception priorities, then dispatches the
/// highest-priority Ready task (or idle when there is none).
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    cortex_m4::configure_systick(&mut core_peripherals.SYST);
    cortex_m4::set_interrupt_priorities(&mut core_peripherals.SCB);

    if let Err(e) = with(|s| s.start()) {
        warn!("scheduler start failed: {}", e);
    }

    // The first switch happened when the critical section closed; the main
    // stack only serves interrupts from here on.
    loop {
        cortex_m::asm::wfi();
    }
}

/// Tick entry point for the SysTick handler.
pub(crate) fn tick() {
    with(|s| s.tick());
}

/// Called when a task's entry point returns.
pub(crate) fn exit_current() {
    with(|s| s.exit_current());
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Create a task with a stack of `stack_words` 32-bit words.
pub fn create_task(
    entry: TaskEntry,
    name: &str,
    stack_words: usize,
    priority: Priority,
) -> Result<TaskId> {
    with(|s| s.create_task(entry, name, stack_words, priority))
}

pub fn delete_task(id: TaskId) -> Result<()> {
    with(|s| s.delete_task(id))
}

pub fn suspend_task(id: TaskId) -> Result<()> {
    with(|s| s.suspend_task(id))
}

pub fn resume_task(id: TaskId) -> Result<()> {
    with(|s| s.resume_task(id))
}

/// Sleep the calling task for `ticks` ticks.
pub fn delay(ticks: u32) {
    with(|s| s.delay(ticks));
}

/// Voluntarily give up the CPU.
pub fn yield_task() {
    with(|s| s.yield_now());
}

pub fn current_task() -> Option<TaskId> {
    with(|s| s.current_task())
}

pub fn tick_count() -> u64 {
    with(|s| s.tick_count())
}

pub fn stats() -> SchedulerStats {
    with(|s| s.stats())
}

// ---------------------------------------------------------------------------
// Mutexes
// ---------------------------------------------------------------------------

pub fn create_mutex() -> Result<MutexId> {
    with(|s| s.create_mutex())
}

pub fn delete_mutex(id: MutexId) -> Result<()> {
    with(|s| s.delete_mutex(id))
}

/// Lock, waiting up to `timeout` ticks.
pub fn mutex_take(id: MutexId, timeout: u32) -> Result<()> {
    let outcome = with(|s| s.mutex_take(id, timeout))?;
    finish(outcome, &mut [])
}

pub fn mutex_give(id: MutexId) -> Result<()> {
    with(|s| s.mutex_give(id))
}

// ---------------------------------------------------------------------------
// Semaphores
// ---------------------------------------------------------------------------

pub fn create_semaphore(initial: u32, max_count: u32) -> Result<SemaphoreId> {
    with(|s| s.create_semaphore(initial, max_count))
}

pub fn delete_semaphore(id: SemaphoreId) -> Result<()> {
    with(|s| s.delete_semaphore(id))
}

/// Take one unit, waiting up to `timeout` ticks.
pub fn semaphore_take(id: SemaphoreId, timeout: u32) -> Result<()> {
    let outcome = with(|s| s.semaphore_take(id, timeout))?;
    finish(outcome, &mut [])
}

/// Return one unit. Safe to call from interrupt handlers.
pub fn semaphore_give(id: SemaphoreId) -> Result<()> {
    with(|s| s.semaphore_give(id))
}

pub fn semaphore_count(id: SemaphoreId) -> Result<u32> {
    with(|s| s.semaphore_count(id))
}

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

pub fn create_queue(item_size: usize, capacity: usize) -> Result<QueueId> {
    with(|s| s.create_queue(item_size, capacity))
}

pub fn delete_queue(id: QueueId) -> Result<()> {
    with(|s| s.delete_queue(id))
}

/// Send a copy of `item`, waiting up to `timeout` ticks for room.
pub fn queue_send(id: QueueId, item: &[u8], timeout: u32) -> Result<()> {
    let outcome = with(|s| s.queue_send(id, item, timeout))?;
    finish(outcome, &mut [])
}

/// Receive the oldest item into `out`, waiting up to `timeout` ticks.
pub fn queue_receive(id: QueueId, out: &mut [u8], timeout: u32) -> Result<()> {
    let outcome = with(|s| s.queue_receive(id, out, timeout))?;
    finish(outcome, out)
}

pub fn queue_len(id: QueueId) -> Result<usize> {
    with(|s| s.queue_len(id))
}
