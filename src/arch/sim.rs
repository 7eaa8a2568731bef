//! # Simulated Port
//!
//! A host-side [`ContextSwitch`] that performs no real register handling.
//! It lays out a recognizable initial frame, keeps track of which context
//! is "loaded" and records a bounded history of switches so tests can
//! check exactly what the scheduler asked the substrate to do.

use heapless::Deque;

use super::{ContextSwitch, SavedContext};
use crate::task::TaskEntry;

/// Fill pattern written over a fresh stack.
pub const STACK_FILL: u32 = 0xDEAD_BEEF;

/// Words in the simulated initial frame (R0–R12, LR, PC, xPSR).
pub const FRAME_WORDS: usize = 16;

/// Number of switches remembered by [`SimPort::history`].
const HISTORY_LEN: usize = 32;

/// One recorded context switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    /// Stack pointer that was saved, if the outgoing context was kept.
    pub saved: Option<usize>,
    /// Stack pointer that was loaded.
    pub loaded: usize,
}

/// Recording port for host tests and simulation.
pub struct SimPort {
    live: Option<SavedContext>,
    switches: u32,
    history: Deque<Switch, HISTORY_LEN>,
}

impl SimPort {
    pub const fn new() -> Self {
        Self {
            live: None,
            switches: 0,
            history: Deque::new(),
        }
    }

    /// Context currently "executing", if any has been loaded.
    pub fn loaded(&self) -> Option<SavedContext> {
        self.live
    }

    /// Total switches performed.
    pub fn switch_count(&self) -> u32 {
        self.switches
    }

    /// Most recent switch.
    pub fn last_switch(&self) -> Option<Switch> {
        self.history.back().copied()
    }

    /// Recent switches, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Switch> {
        self.history.iter()
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextSwitch for SimPort {
    fn init_context(&mut self, stack: &mut [u32], entry: TaskEntry) -> SavedContext {
        stack.fill(STACK_FILL);

        let top = stack.len();
        let base = top.saturating_sub(FRAME_WORDS);
        for word in &mut stack[base..top] {
            *word = 0;
        }
        // PC slot sits just below xPSR, as on a real exception frame
        if top >= 2 {
            stack[top - 2] = entry as usize as u32;
            stack[top - 1] = 0x0100_0000;
        }

        SavedContext {
            stack_pointer: stack.as_ptr() as usize + base * core::mem::size_of::<u32>(),
        }
    }

    fn switch_context(&mut self, save: Option<&mut SavedContext>, load: &SavedContext) {
        let saved = match (save, self.live) {
            (Some(slot), Some(live)) => {
                *slot = live;
                Some(live.stack_pointer)
            }
            _ => None,
        };
        self.live = Some(*load);
        self.switches += 1;

        if self.history.is_full() {
            self.history.pop_front();
        }
        let _ = self.history.push_back(Switch {
            saved,
            loaded: load.stack_pointer,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn entry() {}

    #[test]
    fn test_init_context_frame() {
        let mut port = SimPort::new();
        let mut stack = [0u32; 64];
        let ctx = port.init_context(&mut stack, entry);

        assert_eq!(stack[0], STACK_FILL);
        assert_eq!(stack[63], 0x0100_0000);
        assert_eq!(stack[62], entry as usize as u32);
        assert_eq!(
            ctx.stack_pointer,
            stack.as_ptr() as usize + (64 - FRAME_WORDS) * 4
        );
    }

    #[test]
    fn test_switch_records_history() {
        let mut port = SimPort::new();
        let a = SavedContext { stack_pointer: 0x100 };
        let b = SavedContext { stack_pointer: 0x200 };
        let mut slot_a = a;

        port.switch_context(None, &a);
        assert_eq!(port.loaded(), Some(a));
        assert_eq!(
            port.last_switch(),
            Some(Switch {
                saved: None,
                loaded: 0x100
            })
        );

        port.switch_context(Some(&mut slot_a), &b);
        assert_eq!(slot_a, a);
        assert_eq!(port.loaded(), Some(b));
        assert_eq!(port.switch_count(), 2);
        assert_eq!(port.history().count(), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut port = SimPort::new();
        for sp in 0..(HISTORY_LEN + 5) {
            port.switch_context(None, &SavedContext { stack_pointer: sp });
        }
        assert_eq!(port.history().count(), HISTORY_LEN);
        assert_eq!(port.history().next().unwrap().loaded, 5);
    }
}
