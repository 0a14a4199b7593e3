//! VM manager (spec §4.5): the singleton page-fault dispatcher.

use crate::arch::x86_64::context::ProcessorState;
use crate::exception::ExceptionType;
use crate::mm::map::Map;
use crate::mm::phys::PhysicalPool;
use crate::mm::{AccessMode, VirtualAddress, KERNEL_BOUNDARY};
use crate::sync::GlobalState;

/// Outcome of `handle_fault` that the exception dispatcher acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The fault was resolved; resume the faulting instruction.
    Resumed,
    /// Unresolved fault originating in user space; the caller terminates
    /// the offending task (out of scope here, per spec §4.5 step 4).
    NonRecovered,
}

pub struct VmManager {
    pool: &'static PhysicalPool,
}

static VM_MANAGER: GlobalState<VmManager> = GlobalState::new();

/// Initializes the singleton. Must run after the kernel map exists (spec
/// §4.5); double-init is fatal, enforced by `GlobalState`.
pub fn init(pool: &'static PhysicalPool) {
    VM_MANAGER.init(VmManager { pool });
}

pub fn manager() -> &'static VmManager {
    VM_MANAGER.get_or_fatal("VmManager")
}

impl VmManager {
    /// The only entry point (spec §4.5): given the current map and a
    /// faulting address, looks up the covering entry and invokes its fault
    /// handler, escalating to `AbortWithException` for kernel-mode faults
    /// with no covering entry or a propagated entry-level failure.
    pub fn handle_fault(
        &self,
        current_map: &Map,
        fault_addr: VirtualAddress,
        state: &ProcessorState,
    ) -> FaultOutcome {
        let is_kernel_origin = state.pc() >= KERNEL_BOUNDARY;

        let Some((base, entry)) = current_map.find_with_base(fault_addr) else {
            if is_kernel_origin {
                crate::exception::abort_with_exception(
                    ExceptionType::PageFault,
                    state,
                    fault_addr.as_u64(),
                );
            }
            return FaultOutcome::NonRecovered;
        };

        match entry.handle_fault(base, fault_addr, current_map.page_table(), self.pool) {
            Ok(()) => FaultOutcome::Resumed,
            Err(_) => {
                if is_kernel_origin {
                    crate::exception::abort_with_exception(
                        ExceptionType::PageFault,
                        state,
                        fault_addr.as_u64(),
                    );
                }
                FaultOutcome::NonRecovered
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::map_entry::MapEntry;
    use crate::mm::phys::PhysicalPool;
    use crate::mm::PAGE_SIZE;

    fn leaked_pool() -> &'static PhysicalPool {
        let pool = PhysicalPool::new(4096, [None, None, None, None]);
        pool.add_region(crate::mm::PhysicalAddress::new(0), 4096 * 64)
            .unwrap();
        alloc::boxed::Box::leak(alloc::boxed::Box::new(pool))
    }

    #[test]
    fn fault_restart_second_access_does_not_fault() {
        let pool = leaked_pool();
        let manager = VmManager { pool };
        let map = Map::new_isolated(None);
        let base = VirtualAddress::new(0x4000);
        let entry = MapEntry::anonymous(
            PAGE_SIZE,
            AccessMode::USER_READ | AccessMode::USER_WRITE,
        );
        map.add(base, entry, pool).unwrap();

        let outcome = manager.handle_fault(&map, base, &ProcessorState::synthetic(0x1000));
        assert_eq!(outcome, FaultOutcome::Resumed);
        assert!(map.page_table().translate(base).is_some());

        // Second access: already resident, still resumes without a second
        // physical allocation.
        let allocated_before = pool.allocated_frames();
        let outcome = manager.handle_fault(&map, base, &ProcessorState::synthetic(0x1000));
        assert_eq!(outcome, FaultOutcome::Resumed);
        assert_eq!(pool.allocated_frames(), allocated_before);
    }

    #[test]
    fn user_fault_with_no_entry_is_non_recovered() {
        let pool = leaked_pool();
        let manager = VmManager { pool };
        let map = Map::new_isolated(None);
        let outcome = manager.handle_fault(
            &map,
            VirtualAddress::new(0x9000),
            &ProcessorState::synthetic(0x1000), // user-space pc
        );
        assert_eq!(outcome, FaultOutcome::NonRecovered);
    }
}
