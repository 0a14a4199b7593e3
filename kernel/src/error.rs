//! Kernel error types
//!
//! Replaces ad-hoc numeric codes with a typed `KernelError`, propagated with
//! `?` up to the syscall/exception boundary.

/// Errors returned by fallible core operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Null pointer, bad alignment, out-of-range enum.
    InvalidArgument { reason: &'static str },
    /// Map range collision.
    Overlap,
    /// Physical region rejected by `add_region` (overflow, too small after
    /// alignment, or overlapping an existing region).
    InvalidRegion { reason: &'static str },
    /// Free of a frame that was never allocated, or already freed.
    InvalidFree,
    /// Handle miss, page not mapped.
    NotFound,
    /// Epoch or type mismatch on a handle.
    StaleHandle,
    /// Pool empty.
    InsufficientMemory { requested: usize, available: usize },
    /// Invariant violated. Callers that can determine a `Fatal` condition
    /// should prefer `Console::panic` directly; this variant exists for
    /// the few APIs (e.g. the VM manager) that must let the caller decide
    /// whether a violation is fatal in context.
    Fatal { reason: &'static str },
}

pub type KernelResult<T> = Result<T, KernelError>;

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KernelError::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            KernelError::Overlap => write!(f, "range overlap"),
            KernelError::InvalidRegion { reason } => write!(f, "invalid region: {reason}"),
            KernelError::InvalidFree => write!(f, "invalid free"),
            KernelError::NotFound => write!(f, "not found"),
            KernelError::StaleHandle => write!(f, "stale handle"),
            KernelError::InsufficientMemory {
                requested,
                available,
            } => write!(
                f,
                "insufficient memory: requested {requested}, available {available}"
            ),
            KernelError::Fatal { reason } => write!(f, "fatal: {reason}"),
        }
    }
}
