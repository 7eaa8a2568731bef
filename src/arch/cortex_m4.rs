//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! context switching via PendSV, SysTick tick source and interrupt
//! priorities.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by the kernel startup path and
//!   interrupt handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry, the hardware stacks R0–R3, R12, LR, PC and xPSR onto
//! the process stack. PendSV saves and restores R4–R11 by hand, so a
//! suspended task's stack holds its complete register file and
//! [`SavedContext::stack_pointer`] points at the saved R4.
//!
//! [`ContextSwitch::switch_context`] only records which slot to save into
//! and which stack to load, then pends PendSV. The switch itself happens
//! when the caller leaves its critical section (or when the tick handler
//! returns, since PendSV tail-chains behind SysTick).
//!
//! ## Interrupt Priorities
//!
//! - SysTick: 0xFF (lowest)
//! - PendSV: 0xFF (lowest), so a switch never preempts an application ISR
//!
//! Tasks must not use the FPU: only the basic (non-FP) exception frame is
//! handled.

use core::arch::naked_asm;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use super::{ContextSwitch, SavedContext};
use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::task::TaskEntry;

/// Words in the initial frame: R4–R11, then the hardware frame.
const FRAME_WORDS: usize = 16;
/// Thumb state bit; the only xPSR bit a fresh task needs.
const INITIAL_XPSR: u32 = 0x0100_0000;

// Offsets into the frame, from the saved stack pointer
const FRAME_LR: usize = 13;
const FRAME_PC: usize = 14;
const FRAME_XPSR: usize = 15;

/// Where PendSV stores the outgoing PSP; null when nothing is saved.
static SAVE_SLOT: AtomicPtr<usize> = AtomicPtr::new(ptr::null_mut());
/// PSP PendSV restores from.
static LOAD_SP: AtomicUsize = AtomicUsize::new(0);

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the core clock.
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set PendSV and SysTick to the lowest interrupt priority.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // SAFETY: lowering kernel exception priorities cannot break a
    // priority-based critical section
    unsafe {
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// PendSV-based context switching.
#[derive(Debug)]
pub struct CortexM4 {
    _private: (),
}

impl CortexM4 {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl ContextSwitch for CortexM4 {
    fn init_context(&mut self, stack: &mut [u32], entry: TaskEntry) -> SavedContext {
        let base = stack.len() - FRAME_WORDS;
        let frame = &mut stack[base..];
        frame.fill(0);
        frame[FRAME_LR] = task_exit as usize as u32;
        // Exception return wants the PC without the Thumb bit
        frame[FRAME_PC] = entry as usize as u32 & !1;
        frame[FRAME_XPSR] = INITIAL_XPSR;
        SavedContext {
            stack_pointer: frame.as_ptr() as usize,
        }
    }

    fn switch_context(&mut self, save: Option<&mut SavedContext>, load: &SavedContext) {
        if SCB::is_pendsv_pending() {
            // The CPU is still in the context the pending switch will save
            let slot = SAVE_SLOT.load(Ordering::Relaxed);
            // SAFETY: a non-null slot points into the scheduler's static
            // task table or idle context
            if !slot.is_null() && unsafe { *slot } == load.stack_pointer {
                // Switching back before PendSV ran: nothing to do
                SCB::clear_pendsv();
                SAVE_SLOT.store(ptr::null_mut(), Ordering::Relaxed);
                return;
            }
            LOAD_SP.store(load.stack_pointer, Ordering::Relaxed);
            return;
        }

        let slot = save.map_or(ptr::null_mut(), |ctx| &mut ctx.stack_pointer as *mut usize);
        SAVE_SLOT.store(slot, Ordering::Relaxed);
        LOAD_SP.store(load.stack_pointer, Ordering::Relaxed);
        SCB::set_pendsv();
    }
}

/// Return address of every task: a task whose entry point returns is
/// deleted.
extern "C" fn task_exit() {
    crate::kernel::exit_current();
    // PendSV switches away as soon as the critical section above closes
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler.
///
/// ## Sequence
/// 1. If a save slot is set, push R4–R11 onto the outgoing stack (PSP) and
///    store the PSP into the slot
/// 2. Clear the save slot
/// 3. Pop R4–R11 from the incoming stack and make it the PSP
/// 4. Return to Thread mode on the process stack (hardware restores the
///    rest)
///
/// # Safety
/// Entered by the NVIC only. Must not touch R4–R11 before they are saved.
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "ldr     r1, ={save_slot}",
        "ldr     r2, [r1]",
        "cbz     r2, 1f",

        // Stack the outgoing task
        "mrs     r0, psp",
        "stmdb   r0!, {{r4-r11}}",
        "str     r0, [r2]",

        "1:",
        "movs    r3, #0",
        "str     r3, [r1]",

        // Unstack the incoming one
        "ldr     r1, ={load_sp}",
        "ldr     r0, [r1]",
        "ldmia   r0!, {{r4-r11}}",
        "msr     psp, r0",

        // Thread mode, process stack
        "mov     lr, #0xFFFFFFFD",
        "bx      lr",
        save_slot = sym SAVE_SLOT,
        load_sp = sym LOAD_SP,
    );
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler: one scheduler tick. Any switch it decides on
/// runs in PendSV right after this returns.
#[unsafe(no_mangle)]
pub extern "C" fn SysTick() {
    crate::kernel::tick();
}
