//! VM map entry (spec §4.4, §9 "Inheritance → tagged variants").
//!
//! The original source models this as an abstract base class with virtual
//! `addedTo`/`handleFault` methods. Re-architected here as a tagged
//! variant behind a small trait-like match, per the spec's own design
//! note: the refcount (the `Arc` wrapping `MapEntryInner`) is shared state
//! common to every variant, and only the two per-variant behaviors differ.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::PageTable;
use crate::mm::phys::PhysicalPool;
use crate::mm::{AccessMode, PhysicalAddress, VirtualAddress, PAGE_SIZE};

/// Per-variant mutable state. Held behind a `Mutex` so that faulting in a
/// page (which mutates `Anonymous::frames`) doesn't need the entry's
/// containing map's write lock.
enum MapEntryKind {
    /// Zero-initialized pages drawn from the physical allocator on first
    /// touch. `added_to` installs no PTEs; `handle_fault` demand-pages.
    Anonymous {
        frames: BTreeMap<u64, PhysicalAddress>,
    },
    /// Fixed range of physical addresses (e.g. device MMIO). Installed
    /// eagerly in `added_to`; any fault reaching it afterward is a
    /// programming error.
    PhysicalMap {
        phys_base: PhysicalAddress,
        installed: bool,
    },
    /// Like `Anonymous` but backed by one contiguous physical allocation
    /// performed at `added_to` time.
    Contiguous {
        phys_base: Option<PhysicalAddress>,
    },
}

struct MapEntryInner {
    length: usize,
    base_mode: AccessMode,
    kind: Mutex<MapEntryKind>,
}

/// Reference-counted, polymorphic VM object covering a virtual range
/// (spec §3 "MapEntry"). Cloning shares the same underlying object; the
/// entry itself never holds a strong reference back to a map it lives in
/// (spec §9, "Reference-counted cyclic risk") — `base`/`map`/`page_table`
/// are passed in per call instead of stored.
#[derive(Clone)]
pub struct MapEntry(Arc<MapEntryInner>);

/// Non-zero fault outcome: propagate upward (spec §4.4's "non-zero code").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultError;

impl MapEntry {
    fn new(length: usize, base_mode: AccessMode, kind: MapEntryKind) -> Self {
        Self(Arc::new(MapEntryInner {
            length,
            base_mode,
            kind: Mutex::new(kind),
        }))
    }

    pub fn anonymous(length: usize, base_mode: AccessMode) -> Self {
        Self::new(
            length,
            base_mode,
            MapEntryKind::Anonymous {
                frames: BTreeMap::new(),
            },
        )
    }

    pub fn physical_map(length: usize, base_mode: AccessMode, phys_base: PhysicalAddress) -> Self {
        Self::new(
            length,
            base_mode,
            MapEntryKind::PhysicalMap {
                phys_base,
                installed: false,
            },
        )
    }

    pub fn contiguous(length: usize, base_mode: AccessMode) -> Self {
        Self::new(
            length,
            base_mode,
            MapEntryKind::Contiguous { phys_base: None },
        )
    }

    pub fn length(&self) -> usize {
        self.0.length
    }

    /// Per-map protection. Always the entry's base mode in this core; a
    /// richer implementation could override this per containing map.
    pub fn access_mode(&self) -> AccessMode {
        self.0.base_mode
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Called once by `Map::add` after the entry has been recorded at
    /// `base`. `PhysicalMap`/`Contiguous` populate the page table eagerly
    /// here; `Anonymous` does nothing and waits for a fault.
    pub fn added_to(
        &self,
        base: VirtualAddress,
        page_table: &PageTable,
        pool: &PhysicalPool,
    ) -> KernelResult<()> {
        let mut kind = self.0.kind.lock();
        match &mut *kind {
            MapEntryKind::Anonymous { .. } => Ok(()),
            MapEntryKind::PhysicalMap {
                phys_base,
                installed,
            } => {
                let pages = self.0.length / PAGE_SIZE;
                for i in 0..pages {
                    let virt = VirtualAddress::new(base.as_u64() + (i * PAGE_SIZE) as u64);
                    let phys = PhysicalAddress::new(phys_base.as_u64() + (i * PAGE_SIZE) as u64);
                    page_table.map(virt, phys, self.0.base_mode)?;
                }
                *installed = true;
                Ok(())
            }
            MapEntryKind::Contiguous { phys_base } => {
                let pages = self.0.length / PAGE_SIZE;
                let order = pages.next_power_of_two().trailing_zeros();
                let block = pool.allocate_large(order)?;
                for i in 0..pages {
                    let virt = VirtualAddress::new(base.as_u64() + (i * PAGE_SIZE) as u64);
                    let phys = PhysicalAddress::new(block.as_u64() + (i * PAGE_SIZE) as u64);
                    page_table.map(virt, phys, self.0.base_mode)?;
                }
                *phys_base = Some(block);
                Ok(())
            }
        }
    }

    /// Invoked by the VM manager for a fault at `virt` (relative to
    /// `base`) within this entry's range. Returns `Ok(())` to resume the
    /// faulting instruction, or `Err(FaultError)` to propagate upward
    /// (spec §4.4/§4.5).
    pub fn handle_fault(
        &self,
        base: VirtualAddress,
        virt: VirtualAddress,
        page_table: &PageTable,
        pool: &PhysicalPool,
    ) -> Result<(), FaultError> {
        let mut kind = self.0.kind.lock();
        match &mut *kind {
            MapEntryKind::Anonymous { frames } => {
                let page_index = (virt.as_u64() - base.as_u64()) / PAGE_SIZE as u64;
                let page_virt =
                    VirtualAddress::new(base.as_u64() + page_index * PAGE_SIZE as u64);
                let frame = match frames.get(&page_index) {
                    Some(&frame) => frame,
                    None => {
                        // No frames left: fail the fault rather than
                        // panicking, so the caller can terminate the
                        // offending task instead of taking down the whole
                        // kernel (spec §4.5, §5).
                        let Ok(allocated) = pool.allocate_pages(1) else {
                            return Err(FaultError);
                        };
                        let frame = allocated[0];
                        frames.insert(page_index, frame);
                        frame
                    }
                };
                // Zeroing happens through the real physical-memory offset
                // mapping on hardware; the in-memory mock page table has
                // no backing bytes to zero, the frame is logically zero by
                // construction of a fresh allocation.
                match page_table.map(page_virt, frame, self.0.base_mode) {
                    Ok(()) => Ok(()),
                    Err(KernelError::InvalidArgument { .. }) => Ok(()), // already resolved
                    Err(_) => Err(FaultError),
                }
            }
            MapEntryKind::PhysicalMap { .. } | MapEntryKind::Contiguous { .. } => {
                // Eagerly installed in `added_to`; reaching a fault here is
                // a programming error, surfaced as a propagated fault
                // rather than panicking inside entry code (the caller
                // decides fatality based on fault origin, per spec §4.5).
                Err(FaultError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::phys::PhysicalPool;

    fn pool() -> PhysicalPool {
        let pool = PhysicalPool::new(4096, [None, None, None, None]);
        pool.add_region(PhysicalAddress::new(0), 4096 * 64).unwrap();
        pool
    }

    #[test]
    fn anonymous_added_to_installs_nothing() {
        let table = PageTable::new(None);
        let pool = pool();
        let entry = MapEntry::anonymous(PAGE_SIZE, AccessMode::USER_READ | AccessMode::USER_WRITE);
        let base = VirtualAddress::new(0x4000);
        entry.added_to(base, &table, &pool).unwrap();
        assert_eq!(table.translate(base), None);
    }

    #[test]
    fn anonymous_fault_then_resident_is_no_fault() {
        let table = PageTable::new(None);
        let pool = pool();
        let entry = MapEntry::anonymous(PAGE_SIZE, AccessMode::USER_READ | AccessMode::USER_WRITE);
        let base = VirtualAddress::new(0x4000);
        entry.added_to(base, &table, &pool).unwrap();
        assert!(table.translate(base).is_none());

        entry.handle_fault(base, base, &table, &pool).unwrap();
        assert!(table.translate(base).is_some());
        assert_eq!(pool.allocated_frames(), 1);

        // Second access to the same address does not fault again (it's
        // already resident); handle_fault should be a harmless no-op.
        entry.handle_fault(base, base, &table, &pool).unwrap();
        assert_eq!(pool.allocated_frames(), 1);
    }

    #[test]
    fn physical_map_fault_after_install_is_fatal_to_caller() {
        let table = PageTable::new(None);
        let pool = pool();
        let entry = MapEntry::physical_map(
            PAGE_SIZE,
            AccessMode::KERNEL_READ | AccessMode::KERNEL_WRITE,
            PhysicalAddress::new(0xFEE0_0000),
        );
        let base = VirtualAddress::new(0x5000);
        entry.added_to(base, &table, &pool).unwrap();
        assert!(table.translate(base).is_some());
        assert!(entry.handle_fault(base, base, &table, &pool).is_err());
    }

    #[test]
    fn anonymous_fault_with_exhausted_pool_is_non_fatal() {
        let table = PageTable::new(None);
        // No region added: the pool has zero frames to give out.
        let pool = PhysicalPool::new(4096, [None, None, None, None]);
        let entry = MapEntry::anonymous(PAGE_SIZE, AccessMode::USER_READ | AccessMode::USER_WRITE);
        let base = VirtualAddress::new(0x4000);
        entry.added_to(base, &table, &pool).unwrap();

        assert!(entry.handle_fault(base, base, &table, &pool).is_err());
        assert!(table.translate(base).is_none());
    }
}
