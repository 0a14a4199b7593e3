//! Synchronization primitives: singleton cells and the IRQL ladder.

pub mod irql;
pub mod once_lock;

pub use irql::Irql;
pub use once_lock::GlobalState;
