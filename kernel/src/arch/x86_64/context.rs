//! `ProcessorState` (spec §3): an opaque register snapshot exposing
//! `get_pc`, a text `format`, and a frame-pointer `backtrace`.

use alloc::vec::Vec;

/// Worst-case frames walked, bounding panic-path latency (spec supplement,
/// matching `original_source`'s fixed backtrace buffer size).
const MAX_BACKTRACE_FRAMES: usize = 32;

/// Snapshot of the registers at an exception/interrupt entry. The real
/// layout mirrors the interrupt stack frame `idt.rs` pushes; fields beyond
/// `pc`/`frame_pointer` are omitted here since the core only ever reads
/// those two (everything else is passed through to the eventual task
/// subsystem, out of scope for this core).
#[derive(Debug, Clone, Copy)]
pub struct ProcessorState {
    pc: u64,
    frame_pointer: u64,
}

impl ProcessorState {
    /// Constructs a state directly from a captured interrupt frame. Used
    /// by the real IDT stubs on bare metal.
    pub const fn from_frame(pc: u64, frame_pointer: u64) -> Self {
        Self { pc, frame_pointer }
    }

    /// Builds a state with no real frame-pointer chain, for use where only
    /// the program counter matters (tests, and the VM manager's
    /// kernel-vs-user-origin check).
    pub const fn synthetic(pc: u64) -> Self {
        Self {
            pc,
            frame_pointer: 0,
        }
    }

    /// Captures the calling frame's own `rbp`/return address, used by the
    /// panic path to backtrace from wherever the panic was triggered
    /// rather than from a captured exception frame.
    pub fn capture_current() -> Self {
        #[cfg(target_os = "none")]
        {
            let fp: u64;
            // SAFETY: reading the current `rbp` has no side effects; the
            // kernel is built with frame pointers retained.
            unsafe { core::arch::asm!("mov {}, rbp", out(reg) fp) };
            Self { pc: 0, frame_pointer: fp }
        }
        #[cfg(not(target_os = "none"))]
        {
            Self { pc: 0, frame_pointer: 0 }
        }
    }

    pub const fn pc(&self) -> u64 {
        self.pc
    }

    /// Renders `"pc=0x.. fp=0x.."` into a fixed-size buffer via the
    /// `core::fmt::Write` impl the caller supplies.
    pub fn format(&self, out: &mut dyn core::fmt::Write) {
        let _ = write!(out, "pc={:#018x} fp={:#018x}", self.pc, self.frame_pointer);
    }

    /// Walks the `rbp` frame-pointer chain starting at this state's frame
    /// pointer, capped at `MAX_BACKTRACE_FRAMES`. On the host test target
    /// (where `frame_pointer` is synthetic or simply not a real stack
    /// address) this returns an empty trace rather than dereferencing
    /// garbage.
    pub fn backtrace(&self) -> Vec<u64> {
        let mut frames = Vec::with_capacity(MAX_BACKTRACE_FRAMES);
        #[cfg(target_os = "none")]
        {
            let mut fp = self.frame_pointer;
            while fp != 0 && frames.len() < MAX_BACKTRACE_FRAMES {
                // SAFETY: `fp` originates from a live `rbp` chain captured
                // at an exception boundary on hardware that is built with
                // frame pointers retained; each frame stores the caller's
                // saved rbp at [fp] and the return address at [fp+8].
                let (saved_fp, return_addr) = unsafe {
                    let fp_ptr = fp as *const u64;
                    (core::ptr::read(fp_ptr), core::ptr::read(fp_ptr.add(1)))
                };
                if return_addr == 0 {
                    break;
                }
                frames.push(return_addr);
                fp = saved_fp;
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_state_reports_pc() {
        let state = ProcessorState::synthetic(0xFFFF_8000_0010_0000);
        assert_eq!(state.pc(), 0xFFFF_8000_0010_0000);
    }

    #[test]
    fn format_writes_pc_and_fp() {
        let state = ProcessorState::from_frame(0x1000, 0x2000);
        let mut out = alloc::string::String::new();
        state.format(&mut out);
        assert!(out.contains("pc=0x0000000000001000"));
        assert!(out.contains("fp=0x0000000000002000"));
    }

    #[test]
    fn backtrace_on_host_is_empty() {
        let state = ProcessorState::synthetic(0x1000);
        assert!(state.backtrace().is_empty());
    }
}
