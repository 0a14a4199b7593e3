//! VM map / address space (spec §4.3).
//!
//! Reference-counted; holds a page table and an ordered collection of map
//! entries. The first map created in the kernel's lifetime becomes the
//! `kernel_map` and is the implicit parent of every later map (spec §3,
//! §9 "Global mutable state").

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use spin::RwLock;

use crate::error::{KernelError, KernelResult};
use crate::mm::map_entry::MapEntry;
use crate::mm::page_table::PageTable;
use crate::mm::phys::PhysicalPool;
use crate::mm::{VirtualAddress, PAGE_SIZE};
use crate::sync::GlobalState;

struct MapInner {
    /// Entries ordered by base virtual address; an external `BTreeMap`
    /// rather than an intrusive list, satisfying the "logarithmic or
    /// better `find`" requirement (spec §9, "Intrusive list vs.
    /// container") with none of the intrusive-pointer bookkeeping.
    entries: BTreeMap<u64, MapEntry>,
}

struct MapData {
    parent: Option<Map>,
    page_table: Arc<PageTable>,
    inner: RwLock<MapInner>,
}

/// Reference-counted address space. Cloning increments the refcount;
/// dropping the last clone releases every contained entry, then the
/// parent (spec §4.3).
#[derive(Clone)]
pub struct Map(Arc<MapData>);

static KERNEL_MAP: GlobalState<Map> = GlobalState::new();

impl Map {
    /// Creates an address space. If `parent` is `None` and a kernel map
    /// already exists, that kernel map is used as the parent; if no
    /// kernel map exists yet, the new map becomes the kernel map.
    pub fn new(parent: Option<Map>) -> Self {
        let parent = parent.or_else(|| KERNEL_MAP.get().cloned());
        let map = Self::build(parent);
        if !KERNEL_MAP.is_initialized() {
            KERNEL_MAP.init(map.clone());
        }
        map
    }

    /// Builds a map with exactly the given parent, touching no global
    /// state. Used by `new` and, in tests, directly — `KERNEL_MAP` is a
    /// single process-wide cell shared by the whole test binary, so unit
    /// tests that need a deterministic, un-promoted root map go through
    /// this instead of racing every other test for the "first map ever"
    /// slot.
    fn build(parent: Option<Map>) -> Self {
        let page_table = Arc::new(PageTable::new(parent.as_ref().map(|p| p.0.page_table.clone())));
        Self(Arc::new(MapData {
            parent,
            page_table,
            inner: RwLock::new(MapInner {
                entries: BTreeMap::new(),
            }),
        }))
    }

    /// Test-only constructor equivalent to `new`, except it never reads or
    /// writes the global `KERNEL_MAP` cell. `pub(crate)` so other modules'
    /// tests (e.g. the VM manager's) can build deterministic maps too.
    #[cfg(test)]
    pub(crate) fn new_isolated(parent: Option<Map>) -> Self {
        Self::build(parent)
    }

    pub fn kernel_map() -> Option<Map> {
        KERNEL_MAP.get().cloned()
    }

    pub fn page_table(&self) -> &PageTable {
        &self.0.page_table
    }

    pub fn activate(&self) {
        self.0.page_table.activate();
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Places `entry` at virtual `base`. Preconditions: `base` is
    /// page-aligned, `[base, base+entry.length)` does not overlap any
    /// existing entry. On success the entry is retained (cloned into the
    /// map's collection) and its `added_to` hook runs.
    pub fn add(&self, base: VirtualAddress, entry: MapEntry, pool: &PhysicalPool) -> KernelResult<()> {
        if !base.is_page_aligned() || entry.length() % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument {
                reason: "misaligned base or length",
            });
        }
        let end = base
            .checked_add(entry.length() as u64)
            .ok_or(KernelError::InvalidArgument {
                reason: "range overflows address space",
            })?;

        let mut inner = self.0.inner.write();
        if Self::overlaps(&inner.entries, base.as_u64(), end.as_u64()) {
            return Err(KernelError::Overlap);
        }
        entry.added_to(base, &self.0.page_table, pool)?;
        inner.entries.insert(base.as_u64(), entry);
        Ok(())
    }

    fn overlaps(entries: &BTreeMap<u64, MapEntry>, base: u64, end: u64) -> bool {
        // An entry starting before `end` that also ends after `base`
        // overlaps. `range(..end)` bounds the scan to candidates that
        // could possibly start before our end.
        entries.range(..end).next_back().is_some_and(|(&b, e)| {
            let e_end = b + e.length() as u64;
            b < end && e_end > base
        }) || entries.range(base..end).next().is_some()
    }

    /// Returns the entry covering `addr`, if any. Used by the fault path.
    pub fn find(&self, addr: VirtualAddress) -> Option<MapEntry> {
        let inner = self.0.inner.read();
        let (&base, entry) = inner.entries.range(..=addr.as_u64()).next_back()?;
        if addr.as_u64() < base + entry.length() as u64 {
            Some(entry.clone())
        } else {
            None
        }
    }

    /// Returns the base of the entry covering `addr`, needed by fault
    /// handling to compute a page-relative offset.
    pub fn find_with_base(&self, addr: VirtualAddress) -> Option<(VirtualAddress, MapEntry)> {
        let inner = self.0.inner.read();
        let (&base, entry) = inner.entries.range(..=addr.as_u64()).next_back()?;
        if addr.as_u64() < base + entry.length() as u64 {
            Some((VirtualAddress::new(base), entry.clone()))
        } else {
            None
        }
    }

    /// Detaches and releases the entry at `base`.
    pub fn remove(&self, base: VirtualAddress) -> KernelResult<()> {
        let mut inner = self.0.inner.write();
        inner.entries.remove(&base.as_u64()).map(|_| ()).ok_or(KernelError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::map_entry::MapEntry;
    use crate::mm::phys::PhysicalPool;
    use crate::mm::AccessMode;

    fn pool() -> PhysicalPool {
        let pool = PhysicalPool::new(4096, [None, None, None, None]);
        pool.add_region(crate::mm::PhysicalAddress::new(0), 4096 * 64)
            .unwrap();
        pool
    }

    #[test]
    fn overlap_rejection_leaves_map_unchanged() {
        let map = Map::new_isolated(None);
        let pool = pool();
        let entry_a = MapEntry::anonymous(PAGE_SIZE * 2, AccessMode::USER_READ);
        map.add(VirtualAddress::new(0x1000), entry_a, &pool)
            .unwrap();

        let entry_b = MapEntry::anonymous(PAGE_SIZE, AccessMode::USER_READ);
        let err = map
            .add(VirtualAddress::new(0x2000), entry_b, &pool)
            .unwrap_err();
        assert_eq!(err, KernelError::Overlap);
        assert!(map.find(VirtualAddress::new(0x2000)).is_some());
    }

    #[test]
    fn find_returns_none_outside_any_entry() {
        let map = Map::new_isolated(None);
        assert!(map.find(VirtualAddress::new(0x9000)).is_none());
    }

    #[test]
    fn remove_detaches_entry() {
        let map = Map::new_isolated(None);
        let pool = pool();
        let entry = MapEntry::anonymous(PAGE_SIZE, AccessMode::USER_READ);
        map.add(VirtualAddress::new(0x1000), entry, &pool).unwrap();
        map.remove(VirtualAddress::new(0x1000)).unwrap();
        assert!(map.find(VirtualAddress::new(0x1000)).is_none());
    }

    #[test]
    fn map_refcount_tracks_children() {
        let base = Map::new_isolated(None);
        assert_eq!(base.strong_count(), 1);
        let child = Map::new_isolated(Some(base.clone()));
        assert_eq!(base.strong_count(), 2);
        drop(child);
        assert_eq!(base.strong_count(), 1);
    }

    #[test]
    fn child_shares_parent_kernel_half_mapping_without_further_action() {
        let parent = Map::new_isolated(None);
        let pool = pool();
        let entry = MapEntry::physical_map(
            PAGE_SIZE,
            AccessMode::KERNEL_READ,
            crate::mm::PhysicalAddress::new(0xB800_0000),
        );
        parent
            .add(VirtualAddress::new(crate::mm::KERNEL_BOUNDARY), entry, &pool)
            .unwrap();

        let child_a = Map::new_isolated(Some(parent.clone()));
        let child_b = Map::new_isolated(Some(parent.clone()));
        let kernel_addr = VirtualAddress::new(crate::mm::KERNEL_BOUNDARY);
        assert!(child_a.page_table().translate(kernel_addr).is_some());
        assert!(child_b.page_table().translate(kernel_addr).is_some());
    }
}
