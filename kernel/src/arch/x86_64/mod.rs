//! x86_64 platform primitives.

pub mod context;
pub mod gdt;
pub mod idt;

/// Halts every CPU. Uniprocessor today, so this halts the one CPU there
/// is; the name is kept plural to match the eventual SMP contract (spec §9
/// "SMP extension").
pub fn halt_all() -> ! {
    loop {
        #[cfg(target_os = "none")]
        // SAFETY: disabling interrupts and halting is the documented
        // terminal state reached only from an unrecoverable panic path.
        unsafe {
            core::arch::asm!("cli", "hlt");
        }
        #[cfg(not(target_os = "none"))]
        core::hint::spin_loop();
    }
}

/// Yields the current CPU until the next interrupt. Not a suspension point
/// in the sense of spec §5 — it's a busy-wait hint on the host test target.
pub fn idle() {
    #[cfg(target_os = "none")]
    // SAFETY: `hlt` with interrupts enabled simply waits for the next
    // interrupt; this is the standard idle-loop body.
    unsafe {
        core::arch::asm!("hlt");
    }
    #[cfg(not(target_os = "none"))]
    core::hint::spin_loop();
}
