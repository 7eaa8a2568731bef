//! # TickOS Configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All limits are fixed at compile time; nothing is allocated dynamically.

/// Maximum number of application tasks alive at once. The idle context is
/// not counted against this limit.
pub const MAX_TASKS: usize = 16;

/// Capacity of the mutex table.
pub const MAX_MUTEXES: usize = 8;

/// Capacity of the semaphore table.
pub const MAX_SEMAPHORES: usize = 8;

/// Capacity of the queue table.
pub const MAX_QUEUES: usize = 4;

/// Size of the shared task stack pool, in 32-bit words (32 KiB).
/// Task stacks are carved out of this pool at creation and returned
/// to it on deletion.
pub const STACK_POOL_WORDS: usize = 8 * 1024;

/// Smallest stack a task may request, in words. Must leave room for the
/// initial exception frame (8 words) and the software-saved R4–R11
/// (8 words) plus some headroom for the entry function.
pub const MIN_STACK_WORDS: usize = 64;

/// Stack size of the idle context, in words.
pub const IDLE_STACK_WORDS: usize = 64;

/// Longest task name kept, in bytes. Longer names are truncated.
pub const MAX_TASK_NAME_LEN: usize = 15;

/// Largest queue item, in bytes. Bounds the per-task parking buffer used
/// by blocked queue senders and receivers.
pub const MAX_ITEM_SIZE: usize = 128;

/// Backing storage reserved for each queue, in bytes.
pub const QUEUE_STORAGE_BYTES: usize = 1024;

/// SysTick frequency in Hz. One tick is one scheduler quantum.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Timeout value meaning "block until satisfied, no countdown".
pub const WAIT_FOREVER: u32 = u32::MAX;
