//! Error taxonomy for the difftest core.
//!
//! Errors fall into three groups:
//! 1. **Contract violations:** A caller or protocol bug (bad direction byte, stepping an
//!    ended reference, an address outside guest memory). These end the session.
//! 2. **Unavailable backends:** The reference cannot be loaded or reached; raised before
//!    any stepping begins.
//! 3. **Transport and environment:** I/O, configuration and ELF failures.
//!
//! A divergence is not an error: it is reported through the session halt state.

use thiserror::Error;

use super::addr::GuestAddr;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, DifftestError>;

/// Errors produced by backends, the session controller and their helpers.
#[derive(Debug, Error)]
pub enum DifftestError {
    /// A protocol or caller contract was broken.
    #[error("contract violation in `{op}`: expected {expected}, got {actual}")]
    ContractViolation {
        /// Operation that detected the violation.
        op: &'static str,
        /// Condition the operation required.
        expected: String,
        /// Condition actually observed.
        actual: String,
    },

    /// The reference was stepped after it reached an end or abort state.
    #[error("reference has already ended: `{op}` called after termination")]
    ReferenceEnded {
        /// Operation that was attempted.
        op: &'static str,
    },

    /// A guest range does not resolve inside the guest memory buffer.
    #[error(
        "guest range {addr}+{len:#x} in `{op}` lies outside guest memory [{base}, {base}+{size:#x})"
    )]
    OutOfRange {
        /// Operation that attempted the access.
        op: &'static str,
        /// Start of the requested range.
        addr: GuestAddr,
        /// Length of the requested range in bytes.
        len: u64,
        /// Guest memory base.
        base: GuestAddr,
        /// Guest memory size in bytes.
        size: u64,
    },

    /// The reference backend could not be loaded or reached.
    #[error("reference backend `{locator}` unavailable: {reason}")]
    BackendUnavailable {
        /// Path or address the backend was looked up at.
        locator: String,
        /// Why loading failed.
        reason: String,
    },

    /// The remote reference reported a failure of its own.
    #[error("remote reference failed: {0}")]
    Remote(String),

    /// The session configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The host buffer backing guest memory could not be allocated.
    #[error("failed to allocate {size:#x} bytes of host memory for the guest")]
    HostMemory {
        /// Requested size in bytes.
        size: usize,
    },

    /// An ELF image could not be parsed for symbols.
    #[error("failed to read ELF symbols: {0}")]
    Symbols(#[from] object::read::Error),

    /// JSON could not be parsed or produced.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport or file I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl DifftestError {
    /// Builds a [`DifftestError::ContractViolation`].
    pub fn contract(op: &'static str, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ContractViolation {
            op,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Builds a [`DifftestError::BackendUnavailable`].
    pub fn unavailable(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors that indicate a caller or protocol bug.
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::ContractViolation { .. } | Self::ReferenceEnded { .. } | Self::OutOfRange { .. }
        )
    }

    /// Returns `true` when the error means the reference reached a terminal state.
    pub const fn is_reference_ended(&self) -> bool {
        matches!(self, Self::ReferenceEnded { .. })
    }
}
