//! Register bus implementations
//!
//! - **MMIO** ([`crate::mmio::MmioWindow`]): `/dev/mem` mapping of the real
//!   control blocks
//! - **Fake** ([`FakeRegisterFile`]): in-memory register file with aliasing,
//!   scripted reads and write hooks, for tests and the simulator

pub mod fake;

pub use fake::{FakeRegisterFile, WriteHook, WRITE_LOG_LIMIT};
