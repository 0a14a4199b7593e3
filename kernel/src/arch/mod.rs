//! Architecture abstraction (spec §2's "Platform abstraction" leaf):
//! page-table primitives, TLB invalidation, IRQL raise/lower, idle,
//! halt-all. Only x86_64 is implemented; this is the sole supported
//! target (spec §1).

#[cfg(target_arch = "x86_64")]
pub mod x86_64;
