//! Common utilities and types used throughout the difftest core.
//!
//! This module provides the building blocks shared by the backends, the comparison
//! engine and the session controller. It includes:
//! 1. **Address Types:** A strong type for guest physical addresses.
//! 2. **Constants:** Wire and ABI constants, default channel and image size.
//! 3. **Error Handling:** The crate error taxonomy and `Result` alias.
//! 4. **Architectural State:** The register file plus PC that crosses the boundary.

/// Guest address type.
pub mod addr;

/// Common constants (ABI direction values, defaults, limits).
pub mod constants;

/// Error taxonomy.
pub mod error;

/// Architectural state (register file and program counter).
pub mod reg;

pub use addr::GuestAddr;
pub use error::{DifftestError, Result};
pub use reg::ArchState;
