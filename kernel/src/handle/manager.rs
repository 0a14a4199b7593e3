//! Process-wide `HandleManager` singleton (spec §4.6). Placeholder opaque
//! object types stand in for the task/thread/port/VM-region objects the
//! surrounding (out-of-scope) subsystems would otherwise provide — this
//! core cares only about handle identity, not what a task or thread *is*
//! (spec §1 non-goals).

use alloc::sync::Arc;

use super::table::HandleTable;
use super::{Handle, HandleType};
use crate::error::KernelError;
use crate::sync::GlobalState;

/// Minimal opaque stand-ins. A full kernel would store real task/thread
/// control blocks, port endpoints, and VM-region descriptors here; this
/// core only needs something `Clone`-able behind a handle.
pub type TaskObject = Arc<u64>;
pub type ThreadObject = Arc<u64>;
pub type PortObject = Arc<u64>;
pub type VmRegionObject = Arc<u64>;

pub struct HandleManager {
    tasks: HandleTable<TaskObject>,
    threads: HandleTable<ThreadObject>,
    ports: HandleTable<PortObject>,
    vm_regions: HandleTable<VmRegionObject>,
}

impl HandleManager {
    pub const fn new() -> Self {
        Self {
            tasks: HandleTable::new(HandleType::Task),
            threads: HandleTable::new(HandleType::Thread),
            ports: HandleTable::new(HandleType::Port),
            vm_regions: HandleTable::new(HandleType::VmRegion),
        }
    }

    pub fn make_task_handle(&self, task: TaskObject) -> Handle {
        self.tasks.allocate(task)
    }

    pub fn get_task(&self, h: Handle) -> Option<TaskObject> {
        self.tasks.with(h, Arc::clone)
    }

    pub fn release_task(&self, h: Handle) -> Result<(), KernelError> {
        release_or_stale(self.tasks.release(h))
    }

    pub fn make_thread_handle(&self, thread: ThreadObject) -> Handle {
        self.threads.allocate(thread)
    }

    pub fn get_thread(&self, h: Handle) -> Option<ThreadObject> {
        self.threads.with(h, Arc::clone)
    }

    pub fn release_thread(&self, h: Handle) -> Result<(), KernelError> {
        release_or_stale(self.threads.release(h))
    }

    pub fn make_port_handle(&self, port: PortObject) -> Handle {
        self.ports.allocate(port)
    }

    pub fn get_port(&self, h: Handle) -> Option<PortObject> {
        self.ports.with(h, Arc::clone)
    }

    pub fn release_port(&self, h: Handle) -> Result<(), KernelError> {
        release_or_stale(self.ports.release(h))
    }

    pub fn make_vm_region_handle(&self, region: VmRegionObject) -> Handle {
        self.vm_regions.allocate(region)
    }

    pub fn get_vm_region(&self, h: Handle) -> Option<VmRegionObject> {
        self.vm_regions.with(h, Arc::clone)
    }

    pub fn release_vm_region(&self, h: Handle) -> Result<(), KernelError> {
        release_or_stale(self.vm_regions.release(h))
    }
}

impl Default for HandleManager {
    fn default() -> Self {
        Self::new()
    }
}

fn release_or_stale(valid: bool) -> Result<(), KernelError> {
    if valid {
        Ok(())
    } else {
        Err(KernelError::StaleHandle)
    }
}

static HANDLE_MANAGER: GlobalState<HandleManager> = GlobalState::new();

pub fn init() {
    HANDLE_MANAGER.init(HandleManager::new());
}

pub fn manager() -> &'static HandleManager {
    HANDLE_MANAGER.get_or_fatal("HandleManager")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_round_trip_scenario() {
        let hm = HandleManager::new();
        let task = Arc::new(1u64);
        let h1 = hm.make_task_handle(task.clone());
        assert!(Arc::ptr_eq(&hm.get_task(h1).unwrap(), &task));
        assert!(hm.release_task(h1).is_ok());
        assert!(hm.get_task(h1).is_none());

        let h2 = hm.make_task_handle(Arc::new(2u64));
        assert_ne!(h1, h2);
        assert_eq!(*hm.get_task(h2).unwrap(), 2);
    }

    #[test]
    fn type_safety_rejects_cross_type_lookup() {
        let hm = HandleManager::new();
        let h = hm.make_thread_handle(Arc::new(7u64));
        assert!(hm.get_task(h).is_none());
    }
}
