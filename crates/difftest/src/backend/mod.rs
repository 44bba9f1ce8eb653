//! Reference backend contract.
//!
//! A reference emulator is driven through five operations: `init`, `exec`, `memcpy`,
//! `regcpy` and `raise_intr`. This module defines:
//! 1. **`Direction`:** Which side of a copy is the source.
//! 2. **`RefBackend`:** The capability trait every reference implements.
//! 3. **`BackendLocator`:** Runtime selection between a shared library and a TCP service.
//!
//! Implementations live in the submodules: [`dylib`] loads a reference from a shared
//! library, [`remote`] talks to one over TCP, and [`server`] exposes any backend on a port.

/// Shared-library backend resolved with `dlopen`.
pub mod dylib;
/// TCP client backend.
pub mod remote;
/// TCP server exposing an in-process backend.
pub mod server;
/// Wire codec shared by the client and server.
pub mod wire;

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::constants::{DIFFTEST_TO_DUT, DIFFTEST_TO_REF};
use crate::common::{ArchState, DifftestError, GuestAddr, Result};
use crate::config::DifftestConfig;
use crate::isa::Isa;

pub use dylib::DylibBackend;
pub use remote::RemoteBackend;

/// Source/destination selector for `memcpy` and `regcpy`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Copy from the reference into the caller's buffer.
    ToDut,
    /// Copy from the caller's buffer into the reference.
    ToRef,
}

impl Direction {
    /// Returns the C ABI boolean for this direction.
    pub const fn as_abi(self) -> bool {
        match self {
            Self::ToDut => DIFFTEST_TO_DUT,
            Self::ToRef => DIFFTEST_TO_REF,
        }
    }

    /// Returns the wire encoding of this direction.
    pub const fn to_wire(self) -> u8 {
        match self {
            Self::ToDut => 0,
            Self::ToRef => 1,
        }
    }

    /// Decodes a wire direction byte.
    ///
    /// # Errors
    ///
    /// Any byte other than `0` or `1` is a contract violation.
    pub fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::ToDut),
            1 => Ok(Self::ToRef),
            other => Err(DifftestError::contract(
                "direction",
                "0 (ToDut) or 1 (ToRef)",
                format!("{other}"),
            )),
        }
    }

    /// Returns the other direction.
    pub const fn inverse(self) -> Self {
        match self {
            Self::ToDut => Self::ToRef,
            Self::ToRef => Self::ToDut,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToDut => write!(f, "ToDut"),
            Self::ToRef => write!(f, "ToRef"),
        }
    }
}

/// The contract a reference emulator satisfies.
///
/// Each operation is synchronous and only touches the backend's own private state.
pub trait RefBackend<I: Isa> {
    /// Short description for logs (library path, socket address).
    fn name(&self) -> &str;

    /// Prepares backend memory and ISA state. Called once per session.
    ///
    /// # Errors
    ///
    /// A second call is a contract violation.
    fn init(&mut self, port: u16) -> Result<()>;

    /// Advances the reference by exactly `n` instructions.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::ReferenceEnded`] if the reference already ended or aborted.
    fn exec(&mut self, n: u64) -> Result<()>;

    /// Copies `buf.len()` bytes between reference memory at `addr` and `buf`.
    ///
    /// With [`Direction::ToDut`] the reference is the source and `buf` is overwritten; with
    /// [`Direction::ToRef`] `buf` is the source and is left unchanged.
    ///
    /// # Errors
    ///
    /// An address range outside the reference's guest memory is a contract violation.
    fn memcpy(&mut self, addr: GuestAddr, buf: &mut [u8], direction: Direction) -> Result<()>;

    /// Copies the whole register file and PC between the reference and `state`.
    ///
    /// # Errors
    ///
    /// Transport or layout failures.
    fn regcpy(&mut self, state: &mut ArchState<I>, direction: Direction) -> Result<()>;

    /// Makes the reference take interrupt `code` through its own vector logic.
    ///
    /// # Errors
    ///
    /// Transport failures, or a code the reference cannot represent.
    fn raise_intr(&mut self, code: u64) -> Result<()>;
}

impl<I: Isa, B: RefBackend<I> + ?Sized> RefBackend<I> for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn init(&mut self, port: u16) -> Result<()> {
        (**self).init(port)
    }

    fn exec(&mut self, n: u64) -> Result<()> {
        (**self).exec(n)
    }

    fn memcpy(&mut self, addr: GuestAddr, buf: &mut [u8], direction: Direction) -> Result<()> {
        (**self).memcpy(addr, buf, direction)
    }

    fn regcpy(&mut self, state: &mut ArchState<I>, direction: Direction) -> Result<()> {
        (**self).regcpy(state, direction)
    }

    fn raise_intr(&mut self, code: u64) -> Result<()> {
        (**self).raise_intr(code)
    }
}

/// Where a reference backend comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendLocator {
    /// A shared library exporting the `difftest_*` entry points.
    Library(PathBuf),
    /// A reference served over TCP.
    Remote(SocketAddr),
}

impl BackendLocator {
    /// Opens the backend.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::BackendUnavailable`] if the library or service cannot be
    /// reached or lacks an entry point.
    pub fn open<I: Isa>(&self, config: &DifftestConfig) -> Result<Box<dyn RefBackend<I>>> {
        match self {
            Self::Library(path) => Ok(Box::new(DylibBackend::<I>::load(path, config)?)),
            Self::Remote(addr) => Ok(Box::new(RemoteBackend::<I>::connect(*addr)?)),
        }
    }
}

impl FromStr for BackendLocator {
    type Err = DifftestError;

    /// Parses `tcp://host:port` as [`BackendLocator::Remote`]; anything else is a path.
    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("tcp://") {
            let addr = rest.parse::<SocketAddr>().map_err(|e| {
                DifftestError::Config(format!("bad reference address `{rest}`: {e}"))
            })?;
            return Ok(Self::Remote(addr));
        }
        if s.is_empty() {
            return Err(DifftestError::Config("empty reference locator".into()));
        }
        Ok(Self::Library(PathBuf::from(s)))
    }
}

impl fmt::Display for BackendLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Library(path) => write!(f, "{}", path.display()),
            Self::Remote(addr) => write!(f, "tcp://{addr}"),
        }
    }
}
