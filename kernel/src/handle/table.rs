//! `HandleTable<T>` (spec §3/§4.6): a growable, indexed vector of slots
//! protected by a readers-writer lock.

use alloc::vec::Vec;
use spin::RwLock;

use super::{Handle, HandleType, EPOCH_RETIRE_AT};

struct Slot<T> {
    object: Option<T>,
    epoch: u8,
    /// Once a slot's epoch reaches `EPOCH_RETIRE_AT` it is never reused
    /// (spec §4.6, "Epoch wrap"); `allocate` skips retired slots entirely.
    retired: bool,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self {
            object: None,
            epoch: 0,
            retired: false,
        }
    }
}

pub struct HandleTable<T> {
    slots: RwLock<Vec<Slot<T>>>,
    handle_type: HandleType,
}

impl<T> HandleTable<T> {
    pub const fn new(handle_type: HandleType) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            handle_type,
        }
    }

    /// Scans from slot 0 for the first free, non-retired slot; stores
    /// `object` there, leaves the slot's existing epoch untouched, and
    /// returns a handle combining `(type, index, epoch)`. If none is
    /// free, appends a fresh slot (spec §4.6).
    pub fn allocate(&self, object: T) -> Handle {
        let mut slots = self.slots.write();
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.object.is_none() && !slot.retired {
                slot.object = Some(object);
                return Handle::new(self.handle_type, index as u32, slot.epoch);
            }
        }
        let mut slot = Slot::empty();
        slot.object = Some(object);
        let index = slots.len() as u32;
        let epoch = slot.epoch;
        slots.push(slot);
        Handle::new(self.handle_type, index, epoch)
    }

    /// Decodes `h`; returns `None` on type mismatch, out-of-range index,
    /// empty slot, or epoch mismatch. Otherwise runs `f` on the object
    /// under the read lock and returns its result (spec §4.6 `Get`,
    /// adapted to a closure since a raw pointer outliving the lock isn't
    /// expressible safely).
    pub fn with<R>(&self, h: Handle, f: impl FnOnce(&T) -> R) -> Option<R> {
        if h.handle_type() != Some(self.handle_type) {
            return None;
        }
        let slots = self.slots.read();
        let slot = slots.get(h.index() as usize)?;
        if slot.epoch != h.epoch() {
            return None;
        }
        slot.object.as_ref().map(f)
    }

    /// Validates as in `with`, then clears the object and increments the
    /// slot's epoch, retiring it once the epoch reaches
    /// `EPOCH_RETIRE_AT`. Returns whether `h` was valid.
    pub fn release(&self, h: Handle) -> bool {
        if h.handle_type() != Some(self.handle_type) {
            return false;
        }
        let mut slots = self.slots.write();
        let Some(slot) = slots.get_mut(h.index() as usize) else {
            return false;
        };
        if slot.epoch != h.epoch() || slot.object.is_none() {
            return false;
        }
        slot.object = None;
        if slot.epoch >= EPOCH_RETIRE_AT {
            slot.retired = true;
        } else {
            slot.epoch += 1;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniqueness_of_successive_allocations() {
        let table: HandleTable<u32> = HandleTable::new(HandleType::Task);
        let h1 = table.allocate(1);
        let h2 = table.allocate(2);
        assert_ne!(h1, h2);
    }

    #[test]
    fn round_trip_allocate_get_release() {
        let table: HandleTable<u32> = HandleTable::new(HandleType::Task);
        let h1 = table.allocate(100);
        assert_eq!(table.with(h1, |v| *v), Some(100));
        assert!(table.release(h1));
        assert_eq!(table.with(h1, |v| *v), None);

        let h2 = table.allocate(200);
        assert_ne!(h1, h2);
        assert_eq!(table.with(h2, |v| *v), Some(200));
    }

    #[test]
    fn stale_handle_rejected_even_after_slot_reallocation() {
        let table: HandleTable<u32> = HandleTable::new(HandleType::Task);
        let h1 = table.allocate(1);
        assert!(table.release(h1));
        let h2 = table.allocate(2);
        // h2 reuses h1's slot (only one free slot exists) but with a
        // bumped epoch, so h1 must still read as invalid.
        assert_eq!(h1.index(), h2.index());
        assert_ne!(h1.epoch(), h2.epoch());
        assert_eq!(table.with(h1, |v| *v), None);
        assert_eq!(table.with(h2, |v| *v), Some(2));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let tasks: HandleTable<u32> = HandleTable::new(HandleType::Task);
        let threads: HandleTable<u32> = HandleTable::new(HandleType::Thread);
        let h = tasks.allocate(1);
        assert_eq!(threads.with(h, |v| *v), None);
        assert!(!threads.release(h));
    }

    #[test]
    fn epoch_wrap_retires_slot_instead_of_reusing() {
        let table: HandleTable<u32> = HandleTable::new(HandleType::Task);
        // Allocate/release the same slot 128 times, driving its epoch from
        // 0 up through EPOCH_RETIRE_AT, at which point it retires.
        let mut last_index = None;
        for i in 0..128u32 {
            let h = table.allocate(i);
            assert_eq!(h.index(), 0, "all 128 should land on slot 0 until retirement");
            last_index = Some(h.index());
            assert!(table.release(h));
        }
        assert_eq!(last_index, Some(0));

        // The 129th allocation must land on a fresh slot, not slot 0.
        let h129 = table.allocate(999);
        assert_ne!(h129.index(), 0);
    }
}
