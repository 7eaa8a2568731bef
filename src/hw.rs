//! # Register Access
//!
//! Word-wide memory-mapped register access. Drivers are written against
//! [`RegisterAccess`] so that they run unchanged on hardware ([`Mmio`]) and
//! against a register model in host tests.

/// 32-bit register reads and writes by absolute address.
pub trait RegisterAccess {
    fn read(&self, addr: u32) -> u32;

    fn write(&mut self, addr: u32, value: u32);

    /// Read-modify-write.
    fn modify<F>(&mut self, addr: u32, f: F)
    where
        F: FnOnce(u32) -> u32,
    {
        let value = self.read(addr);
        self.write(addr, f(value));
    }

    #[inline]
    fn set_bits(&mut self, addr: u32, mask: u32) {
        self.modify(addr, |v| v | mask);
    }

    #[inline]
    fn clear_bits(&mut self, addr: u32, mask: u32) {
        self.modify(addr, |v| v & !mask);
    }

    /// `true` if every bit of `mask` is set.
    #[inline]
    fn test_bits(&self, addr: u32, mask: u32) -> bool {
        self.read(addr) & mask == mask
    }
}

/// Volatile access to physical addresses.
#[derive(Debug)]
pub struct Mmio {
    _private: (),
}

impl Mmio {
    /// # Safety
    ///
    /// Every address later passed to [`read`](RegisterAccess::read) or
    /// [`write`](RegisterAccess::write) must be a valid, 4-byte aligned
    /// device register for the lifetime of this value.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RegisterAccess for Mmio {
    #[inline]
    fn read(&self, addr: u32) -> u32 {
        // SAFETY: validity of `addr` is the constructor's contract
        unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
    }

    #[inline]
    fn write(&mut self, addr: u32, value: u32) {
        // SAFETY: as above
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::FnvIndexMap;

    /// Sparse register file; unwritten registers read as zero.
    #[derive(Default)]
    struct RegisterFile {
        regs: FnvIndexMap<u32, u32, 16>,
        writes: usize,
    }

    impl RegisterAccess for RegisterFile {
        fn read(&self, addr: u32) -> u32 {
            self.regs.get(&addr).copied().unwrap_or(0)
        }

        fn write(&mut self, addr: u32, value: u32) {
            self.regs.insert(addr, value).unwrap();
            self.writes += 1;
        }
    }

    const CTRL: u32 = 0x1000_0004;

    #[test]
    fn test_set_and_clear_bits() {
        let mut bus = RegisterFile::default();
        bus.set_bits(CTRL, 0b0110);
        bus.set_bits(CTRL, 0b0001);
        assert_eq!(bus.read(CTRL), 0b0111);
        bus.clear_bits(CTRL, 0b0010);
        assert_eq!(bus.read(CTRL), 0b0101);
        assert_eq!(bus.writes, 3);
    }

    #[test]
    fn test_test_bits_needs_whole_mask() {
        let mut bus = RegisterFile::default();
        bus.write(CTRL, 0b0100);
        assert!(bus.test_bits(CTRL, 0b0100));
        assert!(!bus.test_bits(CTRL, 0b0110));
    }

    #[test]
    fn test_mmio_round_trip() {
        let mut cell = 0u32;
        let addr = &mut cell as *mut u32 as usize;
        // Only meaningful where addresses fit in 32 bits
        if let Ok(addr) = u32::try_from(addr) {
            let mut mmio = unsafe { Mmio::new() };
            mmio.write(addr, 0xA5A5_0001);
            assert_eq!(mmio.read(addr), 0xA5A5_0001);
        }
    }
}
