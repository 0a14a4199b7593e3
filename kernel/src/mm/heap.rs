//! Kernel heap. Backs the `alloc` crate's global allocator with a fixed
//! static region (spec §4.1's allocator governs *physical* frames; this is
//! the bootstrap heap the rest of the core allocates `Box`/`Vec`/`Arc`
//! from before any higher-level virtual memory is set up). Grounded on the
//! teacher's `mm/heap.rs` static-array approach, without its slab layer —
//! `linked_list_allocator` alone is enough for this core's needs.

use linked_list_allocator::LockedHeap;

/// 4 MiB, matching the teacher's initial bootstrap heap size.
pub const HEAP_SIZE: usize = 4 * 1024 * 1024;

#[cfg(target_os = "none")]
static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Initializes the global allocator over the static heap region.
///
/// # Safety
/// Must be called exactly once, before the first allocation.
#[cfg(target_os = "none")]
pub unsafe fn init() {
    // SAFETY: `HEAP_MEMORY` is only ever referenced here and the caller
    // guarantees single-call semantics.
    let base = unsafe { core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8 };
    // SAFETY: `base` points to `HEAP_SIZE` bytes of static storage that
    // live for the program's entire duration.
    unsafe {
        ALLOCATOR.lock().init(base, HEAP_SIZE);
    }
}

#[cfg(not(target_os = "none"))]
pub fn init() {}
