//! Safe global initialization.
//!
//! `kernel_map`, `PhysicalAllocator`, `VmManager` and `HandleManager` are all
//! process-wide singletons with a single-writer init phase and many-reader
//! steady state (spec §9, "Global mutable state"). `GlobalState<T>` models
//! that cell without `static mut`: it is backed by an `AtomicPtr` to a leaked
//! `Box<T>`, set exactly once.

use core::{
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use alloc::boxed::Box;

/// A cell that is written at most once and read many times afterward.
///
/// Unlike `std::sync::OnceLock` this has no blocking fast path for
/// concurrent initializers to wait on each other; the core never needs that
/// because every singleton here is initialized from a single bootstrap path
/// before any other CPU is brought up (spec §4.1, "not thread-safe during
/// init").
pub struct GlobalState<T> {
    inner: AtomicPtr<T>,
}

impl<T> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GlobalState<T> {
    pub const fn new() -> Self {
        Self {
            inner: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Returns the value if `init` has already run.
    pub fn get(&self) -> Option<&'static T> {
        let ptr = self.inner.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: a non-null pointer was only ever stored by `init`,
            // which leaks a `Box<T>` via `Box::into_raw`. The Acquire load
            // synchronizes-with the Release store in `init`, so the pointee
            // is fully initialized here. The allocation is never freed, so
            // the 'static lifetime is sound.
            Some(unsafe { &*ptr })
        }
    }

    /// Returns the value, panicking if `init` has not run yet.
    pub fn get_or_fatal(&self, what: &'static str) -> &'static T {
        self.get()
            .unwrap_or_else(|| panic!("{what} used before initialization"))
    }

    /// Initializes the cell. Calling this a second time is a programming
    /// error (spec §9: "double-init is fatal") and panics rather than
    /// silently discarding the new value or returning an error the caller
    /// might ignore.
    pub fn init(&self, value: T) {
        let boxed = Box::new(value);
        let ptr = Box::into_raw(boxed);
        match self
            .inner
            .compare_exchange(ptr::null_mut(), ptr, Ordering::Release, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(_) => {
                // SAFETY: `ptr` came from the `Box::into_raw` above and the
                // exchange failed, so nothing else has taken ownership of it.
                drop(unsafe { Box::from_raw(ptr) });
                panic!("global cell double-initialized");
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        !self.inner.load(Ordering::Acquire).is_null()
    }
}

// SAFETY: `T: Sync` is required to hand out `&T` across threads; `T: Send`
// is required because `init` may run on a different CPU than later `get`s.
unsafe impl<T: Send + Sync> Sync for GlobalState<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_returns_none() {
        let cell: GlobalState<u32> = GlobalState::new();
        assert_eq!(cell.get(), None);
    }

    #[test]
    fn init_then_get_roundtrips() {
        let cell: GlobalState<u32> = GlobalState::new();
        cell.init(42);
        assert_eq!(cell.get(), Some(&42));
    }

    // Double-init panics (see `init`'s doc comment). Not exercised here with
    // `#[should_panic]`: the workspace builds with `panic = "abort"`, under
    // which an aborting test takes the whole harness down rather than
    // failing in isolation.
}
