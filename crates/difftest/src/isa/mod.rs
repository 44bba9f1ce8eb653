//! ISA descriptions.
//!
//! The difftest core never interprets instructions. All it needs from an ISA is the shape
//! of its architectural state: how many general-purpose registers there are, how wide a
//! register is, and what each register is called. This module provides:
//! 1. **`Word`:** Register-width integer with little-endian byte conversion.
//! 2. **`Isa`:** Register count, word type and register names.
//! 3. **Stock ISAs:** [`Rv32`] and [`Rv64`].

use std::fmt;
use std::hash::Hash;

/// RISC-V register naming shared by the stock ISAs.
pub mod riscv;

pub use riscv::{Rv32, Rv64};

/// A register-width unsigned integer.
///
/// The byte order across every boundary (shared library, wire) is little-endian.
pub trait Word:
    Copy
    + Eq
    + Hash
    + Default
    + fmt::Debug
    + fmt::Display
    + fmt::LowerHex
    + Send
    + Sync
    + 'static
{
    /// Width of the word in bytes.
    const BYTES: usize;

    /// Zero-extends the word to 64 bits.
    fn to_u64(self) -> u64;

    /// Sign-extends the word to 64 bits (used for the decimal column of dumps).
    fn to_i64(self) -> i64;

    /// Narrows a 64-bit value, returning `None` if it does not fit.
    fn from_u64(value: u64) -> Option<Self>;

    /// Writes the word little-endian into the first `BYTES` bytes of `out`.
    fn write_le(self, out: &mut [u8]);

    /// Reads a word from the first `BYTES` bytes of `bytes`, little-endian.
    fn read_le(bytes: &[u8]) -> Self;
}

impl Word for u32 {
    const BYTES: usize = 4;

    fn to_u64(self) -> u64 {
        self as u64
    }

    fn to_i64(self) -> i64 {
        self as i32 as i64
    }

    fn from_u64(value: u64) -> Option<Self> {
        Self::try_from(value).ok()
    }

    fn write_le(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..4]);
        Self::from_le_bytes(raw)
    }
}

impl Word for u64 {
    const BYTES: usize = 8;

    fn to_u64(self) -> u64 {
        self
    }

    fn to_i64(self) -> i64 {
        self as i64
    }

    fn from_u64(value: u64) -> Option<Self> {
        Some(value)
    }

    fn write_le(self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        Self::from_le_bytes(raw)
    }
}

/// Shape of an ISA's architectural state.
///
/// Implementors are zero-sized marker types; all information is associated.
pub trait Isa: Copy + Eq + Default + fmt::Debug + Send + Sync + 'static {
    /// Register width.
    type Word: Word;

    /// Short name used in handshakes and diagnostics (e.g. `"riscv32"`).
    const NAME: &'static str;

    /// Number of general-purpose registers in the register file.
    const GPR_COUNT: usize;

    /// Name of general-purpose register `idx`.
    ///
    /// Callers only pass indices below [`Isa::GPR_COUNT`].
    fn gpr_name(idx: usize) -> &'static str;

    /// Register holding the guest's exit code when it ends, if the ISA has a convention.
    const EXIT_CODE_REG: Option<usize> = None;

    /// Size in bytes of the register file plus PC in the boundary layout.
    fn state_bytes() -> usize {
        (Self::GPR_COUNT + 1) * <Self::Word as Word>::BYTES
    }
}
