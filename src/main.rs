//! # TickOS Link Firmware
//!
//! Demonstrates the scheduler with four tasks supervising a serial link
//! peripheral:
//!
//! | Task | Priority | Period | Behavior |
//! |------|----------|--------|----------|
//! | `packet_processor_task` | Critical | 10 ticks | Counts received packets, reports link errors |
//! | `link_monitor_task` | High | 100 ticks | Re-initializes a dropped link, counts sent packets |
//! | `error_handler_task` | Normal | 50 ticks | Classifies and clears error status |
//! | `self_test_task` | Low | 5000 ticks | Loopback test pattern |
//!
//! Link statistics are shared under a kernel mutex. The packet processor
//! reports errors through a queue that the error handler drains; when the
//! queue stays empty for a whole period, the error handler polls the status
//! register instead.

#![no_std]
#![no_main]

use core::cell::{Cell, UnsafeCell};

use cortex_m_rt::entry;
use panic_halt as _;

use tickos::config::WAIT_FOREVER;
use tickos::hw::{Mmio, RegisterAccess};
use tickos::{kernel, Error, MutexId, Priority, QueueId};

// ---------------------------------------------------------------------------
// Link peripheral
// ---------------------------------------------------------------------------

const LINK_STATUS_REG: u32 = 0x1000_0000;
const LINK_CONTROL_REG: u32 = 0x1000_0004;
const ERROR_STATUS_REG: u32 = 0x1000_0008;
const ERROR_MASK_REG: u32 = 0x1000_000C;
const SELF_TEST_REG: u32 = 0x1000_0010;

// Link status bits
const LINK_UP: u32 = 1 << 0;
const LINK_ACTIVE: u32 = 1 << 1;
const LINK_ERROR: u32 = 1 << 2;

// Link control bits
const LINK_RESET: u32 = 1 << 0;
const LINK_ENABLE: u32 = 1 << 1;
const LINK_TEST_MODE: u32 = 1 << 2;
const LINK_LOOPBACK: u32 = 1 << 3;

// Error status bits
const ERROR_CRC: u32 = 1 << 0;
const ERROR_TIMEOUT: u32 = 1 << 1;
const ERROR_OVERFLOW: u32 = 1 << 2;
const ERROR_UNDERFLOW: u32 = 1 << 3;
const ERROR_ALL: u32 = ERROR_CRC | ERROR_TIMEOUT | ERROR_OVERFLOW | ERROR_UNDERFLOW;

/// Errors tolerated before the link is reset.
const ERROR_RESET_THRESHOLD: u32 = 1000;

const TASK_STACK_WORDS: usize = 512;
const ERROR_QUEUE_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum LinkFault {
    Clear = 0,
    LinkDown,
    CrcFail,
    Timeout,
    Overflow,
    Underflow,
}

impl LinkFault {
    /// Highest-precedence fault flagged in an error status word.
    fn from_status(status: u32) -> Self {
        if status & ERROR_CRC != 0 {
            LinkFault::CrcFail
        } else if status & ERROR_TIMEOUT != 0 {
            LinkFault::Timeout
        } else if status & ERROR_OVERFLOW != 0 {
            LinkFault::Overflow
        } else if status & ERROR_UNDERFLOW != 0 {
            LinkFault::Underflow
        } else {
            LinkFault::Clear
        }
    }
}

const TEST_HEADER: u32 = 0xAA55_AA55;
/// Fixed check word; the link does not verify it in loopback.
const TEST_CRC: u32 = 0x1234_5678;
const PAYLOAD_LEN: usize = 64;

/// Loopback test frame: header, counting payload, check word.
struct TestPacket {
    header: u32,
    payload: [u8; PAYLOAD_LEN],
    crc: u32,
}

impl TestPacket {
    fn pattern() -> Self {
        let mut payload = [0u8; PAYLOAD_LEN];
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte = i as u8;
        }
        Self {
            header: TEST_HEADER,
            payload,
            crc: TEST_CRC,
        }
    }

    /// Push the frame through the self-test port, one word at a time.
    fn transmit(&self, bus: &mut impl RegisterAccess) {
        bus.write(SELF_TEST_REG, self.header);
        for chunk in self.payload.chunks_exact(4) {
            bus.write(SELF_TEST_REG, u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        bus.write(SELF_TEST_REG, self.crc);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LinkStats {
    packets_sent: u32,
    packets_received: u32,
    errors_detected: u32,
    crc_errors: u32,
    timeout_errors: u32,
    self_tests: u32,
    last_fault: Option<LinkFault>,
    initialized: bool,
}

/// Link statistics, only touched while holding the link mutex.
struct Guarded(UnsafeCell<LinkStats>);

// SAFETY: every access goes through `with_link`, which holds LINK_LOCK
unsafe impl Sync for Guarded {}

static LINK_STATS: Guarded = Guarded(UnsafeCell::new(LinkStats {
    packets_sent: 0,
    packets_received: 0,
    errors_detected: 0,
    crc_errors: 0,
    timeout_errors: 0,
    self_tests: 0,
    last_fault: None,
    initialized: false,
}));

static LINK_LOCK: critical_section::Mutex<Cell<Option<MutexId>>> =
    critical_section::Mutex::new(Cell::new(None));
static ERROR_QUEUE: critical_section::Mutex<Cell<Option<QueueId>>> =
    critical_section::Mutex::new(Cell::new(None));

fn regs() -> Mmio {
    // SAFETY: only the link register block above is accessed
    unsafe { Mmio::new() }
}

/// Run `f` on the link statistics with the link mutex held.
fn with_link<R>(f: impl FnOnce(&mut LinkStats) -> R) -> Option<R> {
    let lock = critical_section::with(|cs| LINK_LOCK.borrow(cs).get())?;
    kernel::mutex_take(lock, WAIT_FOREVER).ok()?;
    // SAFETY: LINK_LOCK is held
    let out = f(unsafe { &mut *LINK_STATS.0.get() });
    let _ = kernel::mutex_give(lock);
    Some(out)
}

fn error_queue() -> Option<QueueId> {
    critical_section::with(|cs| ERROR_QUEUE.borrow(cs).get())
}

/// Reset the link, wait for it to come up and unmask all error sources.
fn link_init(bus: &mut impl RegisterAccess, stats: &mut LinkStats) {
    bus.write(LINK_CONTROL_REG, LINK_RESET);
    while bus.test_bits(LINK_STATUS_REG, LINK_UP) {}

    bus.write(LINK_CONTROL_REG, LINK_ENABLE);
    while !bus.test_bits(LINK_STATUS_REG, LINK_UP) {}

    bus.write(ERROR_MASK_REG, ERROR_ALL);
    stats.initialized = true;
}

/// Classify and acknowledge pending errors. Resets the link once too many
/// have accumulated.
fn handle_errors(bus: &mut impl RegisterAccess, stats: &mut LinkStats) {
    let status = bus.read(ERROR_STATUS_REG);
    let fault = LinkFault::from_status(status);
    match fault {
        LinkFault::CrcFail => stats.crc_errors += 1,
        LinkFault::Timeout => stats.timeout_errors += 1,
        _ => {}
    }
    if fault != LinkFault::Clear {
        stats.last_fault = Some(fault);
    }
    stats.errors_detected += 1;

    // Write-one-to-clear
    bus.write(ERROR_STATUS_REG, status);

    if stats.errors_detected > ERROR_RESET_THRESHOLD {
        link_init(bus, stats);
        stats.errors_detected = 0;
    }
}

/// Account for an incoming packet. Returns `true` if the link flagged an
/// error with it.
fn process_packet(bus: &mut impl RegisterAccess, stats: &mut LinkStats) -> bool {
    if !stats.initialized || !bus.test_bits(LINK_STATUS_REG, LINK_ACTIVE) {
        return false;
    }
    stats.packets_received += 1;
    bus.test_bits(LINK_STATUS_REG, LINK_ERROR)
}

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

/// **Link Monitor** (High, every 100 ticks)
extern "C" fn link_monitor_task() {
    let mut bus = regs();
    loop {
        with_link(|stats| {
            if !bus.test_bits(LINK_STATUS_REG, LINK_UP) {
                stats.last_fault = Some(LinkFault::LinkDown);
                link_init(&mut bus, stats);
            }
            if bus.test_bits(LINK_STATUS_REG, LINK_ACTIVE) {
                stats.packets_sent += 1;
            }
        });
        kernel::delay(100);
    }
}

/// **Error Handler** (Normal, every 50 ticks)
///
/// Waits on the error queue for up to one period; falls back to polling
/// the status register when nothing was reported.
extern "C" fn error_handler_task() {
    let mut bus = regs();
    let mut report = [0u8; 1];
    loop {
        let reported = match error_queue() {
            Some(q) => kernel::queue_receive(q, &mut report, 50),
            None => {
                kernel::delay(50);
                Err(Error::Timeout)
            }
        };
        if reported.is_ok() || bus.read(ERROR_STATUS_REG) != 0 {
            with_link(|stats| handle_errors(&mut bus, stats));
        }
    }
}

/// **Self-Test** (Low, every 5000 ticks)
///
/// Puts the link in loopback and pushes one test packet through.
extern "C" fn self_test_task() {
    let mut bus = regs();
    let packet = TestPacket::pattern();
    loop {
        with_link(|stats| {
            bus.write(LINK_CONTROL_REG, LINK_TEST_MODE | LINK_LOOPBACK);
            packet.transmit(&mut bus);
            stats.self_tests += 1;
            if process_packet(&mut bus, stats) {
                handle_errors(&mut bus, stats);
            }
            bus.write(LINK_CONTROL_REG, LINK_ENABLE);
        });
        kernel::delay(5000);
    }
}

/// **Packet Processor** (Critical, every 10 ticks)
extern "C" fn packet_processor_task() {
    let mut bus = regs();
    loop {
        let errored = with_link(|stats| process_packet(&mut bus, stats)).unwrap_or(false);
        if errored {
            if let Some(q) = error_queue() {
                // A full queue already has the error handler's attention
                let fault = LinkFault::from_status(bus.read(ERROR_STATUS_REG));
                let _ = kernel::queue_send(q, &[fault as u8], 0);
            }
        }
        kernel::delay(10);
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();

    let mut bus = regs();
    bus.write(LINK_CONTROL_REG, LINK_RESET);
    bus.write(ERROR_MASK_REG, 0);
    bus.write(ERROR_STATUS_REG, 0);
    // SAFETY: no task is running yet
    link_init(&mut bus, unsafe { &mut *LINK_STATS.0.get() });

    kernel::init();

    let lock = kernel::create_mutex().unwrap();
    let errors = kernel::create_queue(1, ERROR_QUEUE_DEPTH).unwrap();
    critical_section::with(|cs| {
        LINK_LOCK.borrow(cs).set(Some(lock));
        ERROR_QUEUE.borrow(cs).set(Some(errors));
    });

    kernel::create_task(link_monitor_task, "LinkMonitor", TASK_STACK_WORDS, Priority::High).unwrap();
    kernel::create_task(error_handler_task, "ErrorHandler", TASK_STACK_WORDS, Priority::Normal).unwrap();
    kernel::create_task(self_test_task, "SelfTest", TASK_STACK_WORDS, Priority::Low).unwrap();
    kernel::create_task(packet_processor_task, "PacketProc", TASK_STACK_WORDS, Priority::Critical).unwrap();

    kernel::start(cp);
}
