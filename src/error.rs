//! # Errors
//!
//! Every fallible kernel operation reports one of these outcomes to its
//! caller. Recovery policy (retry, degrade, reset a subsystem) belongs to
//! the application; the kernel never halts on them.

use core::fmt;

/// Failure outcome of a kernel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The task or object table has no free slot.
    TableFull,
    /// The stack pool or queue storage cannot satisfy the request.
    AllocationFailed,
    /// The handle does not name a live task or object (never issued, or
    /// its owner has been deleted since).
    InvalidHandle,
    /// A wait ended before the resource became available.
    Timeout,
    /// The calling task already holds the mutex it tried to take.
    WouldDeadlock,
    /// The request is malformed or not permitted in the current state.
    InvalidOperation,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::TableFull => "table full",
            Error::AllocationFailed => "allocation failed",
            Error::InvalidHandle => "invalid handle",
            Error::Timeout => "timed out",
            Error::WouldDeadlock => "would deadlock",
            Error::InvalidOperation => "invalid operation",
        };
        f.write_str(msg)
    }
}

/// Kernel result type.
pub type Result<T> = core::result::Result<T, Error>;

/// Internal invariant violated (stack freed twice, wait bookkeeping out of
/// step with the task table). State can no longer be trusted, so stop; on
/// target the panic handler halts the core.
#[cold]
pub(crate) fn fatal(what: &str) -> ! {
    log::error!("kernel invariant violated: {}", what);
    panic!("kernel invariant violated: {}", what)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::string::ToString;

    #[test]
    fn test_display() {
        assert_eq!(Error::TableFull.to_string(), "table full");
        assert_eq!(Error::WouldDeadlock.to_string(), "would deadlock");
    }
}
