//! Lockstep differential testing library.
//!
//! This crate runs an emulator under test (the DUT) alongside an independently built
//! reference emulator (REF) and finds the first instruction batch after which their
//! architectural state disagrees. It provides the following:
//! 1. **Backends:** The reference contract plus shared-library and TCP implementations.
//! 2. **Synchronization:** Byte-exact register and guest memory transfer in both directions.
//! 3. **Comparison:** Fixed-order register file and PC comparison with a first-mismatch report.
//! 4. **Session:** Lifecycle and the batch stepping controller with its halt states.
//! 5. **Support:** ISA descriptions, configuration, ELF symbols, and statistics.

/// Reference backend contract and its implementations (shared library, TCP).
pub mod backend;
/// Common types (addresses, errors, architectural state, constants).
pub mod common;
/// Architectural state comparison and divergence reports.
pub mod compare;
/// Session configuration (defaults, JSON deserialization, validation).
pub mod config;
/// Device-under-test contract and the backend-as-DUT adapter.
pub mod dut;
/// ISA descriptions: register count, word width, register names.
pub mod isa;
/// Guest memory with page-granular dirty tracking.
pub mod memory;
/// Session lifecycle and the lockstep stepping controller.
pub mod session;
/// Per-session counters.
pub mod stats;
/// Function symbols read from an ELF image.
pub mod symbols;

pub use crate::backend::{BackendLocator, Direction, RefBackend};
pub use crate::common::{ArchState, DifftestError, GuestAddr, Result};
pub use crate::compare::{DivergenceReport, MismatchKind, compare};
pub use crate::config::DifftestConfig;
pub use crate::dut::{BackendDut, Dut, DutStep};
pub use crate::isa::{Isa, Rv32, Rv64};
pub use crate::memory::GuestMemory;
pub use crate::session::{HaltReason, Session, SessionHandle, SessionState, StopHandle};
pub use crate::stats::DifftestStats;
pub use crate::symbols::FunctionTable;
