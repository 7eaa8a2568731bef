//! # Task Control Block
//!
//! Defines the task model for TickOS. Each task has a fixed priority, an
//! owned stack region, a saved context and a position in the scheduler's
//! state machine. Tasks are referenced by [`TaskId`], a generation-checked
//! handle that stays valid for the task's whole life and is detectably
//! stale afterwards.

use heapless::{String, Vec};

use crate::arch::SavedContext;
use crate::arena::Key;
use crate::config::{MAX_ITEM_SIZE, MAX_TASK_NAME_LEN};
use crate::error::Result;
use crate::stack::StackRegion;
use crate::sync::{MutexId, QueueId, SemaphoreId};

/// Task entry point. Task bodies are expected to loop forever; one that
/// returns is deleted.
pub type TaskEntry = extern "C" fn();

/// Bounded task name.
pub type TaskName = String<MAX_TASK_NAME_LEN>;

// ---------------------------------------------------------------------------
// Identity, priority and state
// ---------------------------------------------------------------------------

/// Stable handle to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) Key);

impl TaskId {
    /// Table slot of this task. Also its position in the tie-break order.
    pub fn slot(&self) -> usize {
        self.0.index()
    }
}

/// Fixed task priority. Higher values win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Priority {
    #[inline]
    pub const fn value(self) -> u8 {
        self as u8
    }
}

/// Execution state of a task in the scheduler's state machine.
///
/// ```text
///   ┌──────────┐     dispatch        ┌─────────┐
///   │  Ready   │ ──────────────────► │ Running │
///   └──────────┘ ◄────────────────── └─────────┘
///     ▲     │      preempt / yield        │
///     │     │ suspend                     │ delay / wait
///     │     ▼                             ▼
///     │  ┌───────────┐  suspend     ┌──────────┐
///     └──│ Suspended │ ◄─────────── │ Blocked  │
/// resume └───────────┘              └──────────┘
///                                     │ timer / resource
///                                     └──────────► Ready
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Task is ready to run and waiting to be selected.
    Ready,
    /// Task is currently executing on the CPU.
    Running,
    /// Task is waiting for a delay to expire or a resource.
    Blocked,
    /// Task is parked until explicitly resumed.
    Suspended,
}

/// What a blocked task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitTarget {
    Delay,
    Mutex(MutexId),
    Semaphore(SemaphoreId),
    QueueSend(QueueId),
    QueueReceive(QueueId),
}

/// Truncate `name` to at most [`MAX_TASK_NAME_LEN`] bytes on a character
/// boundary.
pub fn task_name(name: &str) -> TaskName {
    let mut out = TaskName::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB): everything the scheduler knows about a task.
pub struct TaskControlBlock {
    id: TaskId,
    name: TaskName,
    priority: Priority,
    pub(crate) state: TaskState,

    /// Saved execution context. Written by the port only.
    pub(crate) context: SavedContext,

    /// Stack region owned by this task until deletion.
    pub(crate) stack: StackRegion,

    /// Remaining ticks of a timed wait; `0` means no countdown.
    pub(crate) wake_in: u32,

    pub(crate) waiting_on: Option<WaitTarget>,

    /// Outcome of the last wait, set when the task is released.
    pub(crate) wait_result: Option<Result<()>>,

    /// Queue item parked while blocked in a send, or delivered while
    /// blocked in a receive.
    pub(crate) parcel: Vec<u8, MAX_ITEM_SIZE>,
}

impl TaskControlBlock {
    pub(crate) fn new(
        id: TaskId,
        name: &str,
        priority: Priority,
        stack: StackRegion,
        context: SavedContext,
    ) -> Self {
        Self {
            id,
            name: task_name(name),
            priority,
            state: TaskState::Ready,
            context,
            stack,
            wake_in: 0,
            waiting_on: None,
            wait_result: None,
            parcel: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    #[inline]
    pub fn context(&self) -> SavedContext {
        self.context
    }

    /// Stack size in words.
    #[inline]
    pub fn stack_words(&self) -> usize {
        self.stack.words()
    }

    /// Remaining ticks before a timed wait expires (`0` if none).
    #[inline]
    pub fn wake_in(&self) -> u32 {
        self.wake_in
    }

    /// Enter the Blocked state. `ticks == 0` means no countdown.
    pub(crate) fn block(&mut self, target: WaitTarget, ticks: u32) {
        // Only a blocked send carries an item into the wait
        if !matches!(target, WaitTarget::QueueSend(_)) {
            self.parcel.clear();
        }
        self.state = TaskState::Blocked;
        self.waiting_on = Some(target);
        self.wake_in = ticks;
        self.wait_result = None;
    }

    /// Leave the Blocked state with the given outcome.
    pub(crate) fn release(&mut self, result: Result<()>) {
        self.state = TaskState::Ready;
        self.waiting_on = None;
        self.wake_in = 0;
        if result.is_err() {
            // A parked item that never made it across is dropped
            self.parcel.clear();
        }
        self.wait_result = Some(result);
    }

    /// Advance the wait countdown by one tick. Returns `true` when it
    /// reaches zero on this tick.
    pub(crate) fn count_down(&mut self) -> bool {
        if self.state != TaskState::Blocked || self.wake_in == 0 {
            return false;
        }
        self.wake_in -= 1;
        self.wake_in == 0
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
