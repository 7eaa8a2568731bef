//! # TickOS
//!
//! A small preemptive priority scheduler for ARM Cortex-M4
//! microcontrollers, with mutexes, counting semaphores and message queues.
//!
//! ## Overview
//!
//! Tasks run at one of four fixed priorities. On every tick, and whenever
//! the running task blocks, yields or goes away, the highest-priority
//! runnable task gets the CPU; ties go to the task created into the lowest
//! table slot. When no task can run, an idle context waits for the next
//! interrupt.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                   │
//! ├────────────────────────────────────────────────────────┤
//! │            Kernel API (kernel.rs, ARM only)            │
//! │     global instance · critical sections · blocking     │
//! ├───────────────────────────┬────────────────────────────┤
//! │  Scheduler                │  Sync Primitives           │
//! │  scheduler.rs             │  sync/                     │
//! │  ─ tick()                 │  ─ mutex                   │
//! │  ─ dispatch()             │  ─ semaphore               │
//! │  ─ delay() · yield_now()  │  ─ queue                   │
//! ├───────────────────────────┴────────────────────────────┤
//! │   Task Model (task.rs) · Arena (arena.rs) · Stacks     │
//! │        TCB · Priority · TaskState · generation IDs     │
//! ├────────────────────────────────────────────────────────┤
//! │  Arch Port (arch/)          ContextSwitch trait        │
//! │  cortex_m4: PendSV · SysTick    sim: host recording    │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M4 Hardware (Thumb-2)               │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: every table has a compile-time capacity (see [`config`])
//! - **Task stacks** come from a fixed word pool owned by the scheduler
//! - **Handles** carry a generation, so a handle to a deleted task or
//!   object is rejected rather than aliasing its successor
//!
//! ## Testing
//!
//! [`Scheduler`] is a plain value parameterized by its port. Host tests
//! drive it with [`arch::sim::SimPort`], calling `tick()` by hand and
//! inspecting which context each switch loaded.

#![no_std]

pub mod arch;
pub mod arena;
pub mod config;
pub mod error;
pub mod hw;
pub mod scheduler;
pub mod stack;
pub mod sync;
pub mod task;

#[cfg(target_arch = "arm")]
pub mod kernel;

pub use arch::{ContextSwitch, SavedContext};
pub use error::{Error, Result};
pub use scheduler::{Running, Scheduler, SchedulerStats};
pub use sync::{MutexId, Outcome, QueueId, SemaphoreId};
pub use task::{Priority, TaskId, TaskState};
