//! Aurora kernel core: physical memory allocation, virtual memory maps, and
//! the process-wide handle manager. Scheduling, IPC, drivers, and
//! filesystems are out of scope (see `SPEC_FULL.md`); this crate only
//! implements the substrate those subsystems would be built on.

#![no_std]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

extern crate alloc;

// On bare metal the global allocator lives in `mm::heap`, backed by a
// static region. On host builds (`cargo test`), delegate to the system
// allocator so ordinary test code can use `Vec`/`Box`/`Arc` freely.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

pub mod arch;
pub mod boot;
pub mod console;
pub mod error;
pub mod exception;
pub mod handle;
pub mod mm;
pub mod sync;

/// Heap allocation failure in a `no_std` kernel has no recovery path.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}

// The panic handler lives in `main.rs`: a `panic_impl` lang item must be
// defined exactly once in the final linked artifact, and this crate is
// always linked into the `aurora-kernel` binary rather than used
// standalone.
