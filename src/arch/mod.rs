//! # Architecture Abstraction Layer
//!
//! Provides the hardware abstraction boundary for the scheduler: the
//! context-switch hook. The scheduling algorithm only decides *which*
//! context runs next; saving and restoring CPU state is the port's job.
//!
//! Two ports exist:
//! - [`cortex_m4`]: PendSV-driven switching on ARM Cortex-M4 (ARM builds only).
//! - [`sim`]: a host-side simulation that records every switch, used to
//!   test the scheduler without hardware.

#[cfg(target_arch = "arm")]
pub mod cortex_m4;
pub mod sim;

use crate::task::TaskEntry;

/// Saved execution context of a task (or of the idle context).
///
/// The value is opaque to the scheduler. Both ports store the task's saved
/// stack pointer here; only the port's [`ContextSwitch`] methods write it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SavedContext {
    pub stack_pointer: usize,
}

/// The context-switch hook supplied by the execution substrate.
pub trait ContextSwitch {
    /// Build the initial frame on a freshly allocated stack so that the
    /// first dispatch begins executing `entry`. Returns the context to
    /// store in the task's control block.
    fn init_context(&mut self, stack: &mut [u32], entry: TaskEntry) -> SavedContext;

    /// Save the outgoing context into `save` and transfer control to
    /// `load`.
    ///
    /// `save` is `None` when there is nothing to preserve: before the
    /// first dispatch, or when the outgoing task has just been deleted.
    fn switch_context(&mut self, save: Option<&mut SavedContext>, load: &SavedContext);
}

/// Body of the idle context: wait for the next interrupt, forever.
pub extern "C" fn idle_entry() {
    loop {
        #[cfg(target_arch = "arm")]
        cortex_m::asm::wfi();
        #[cfg(not(target_arch = "arm"))]
        core::hint::spin_loop();
    }
}
