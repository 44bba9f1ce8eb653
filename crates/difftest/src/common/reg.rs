//! Architectural state.
//!
//! This module provides [`ArchState`], the externally visible register file plus program
//! counter of one machine. It provides:
//! 1. **Storage:** `I::GPR_COUNT` registers of `I::Word` and the PC.
//! 2. **Boundary Layout:** Conversion to and from the little-endian `CPU_state` prefix
//!    (`gpr[0..N]` followed by `pc`) used by shared-library and wire backends.
//! 3. **Observability:** Lookup by register name and a `name hex dec` register dump.
//!
//! Every transfer between DUT and REF copies an `ArchState`; neither side ever holds a
//! reference into the other's state.

use std::fmt;
use std::marker::PhantomData;

use crate::isa::{Isa, Word};

use super::error::{DifftestError, Result};

/// Register file and program counter of one machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchState<I: Isa> {
    gpr: Vec<I::Word>,
    pc: I::Word,
    _isa: PhantomData<I>,
}

impl<I: Isa> Default for ArchState<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Isa> ArchState<I> {
    /// Creates a state with every register and the PC set to zero.
    pub fn new() -> Self {
        Self {
            gpr: vec![I::Word::default(); I::GPR_COUNT],
            pc: I::Word::default(),
            _isa: PhantomData,
        }
    }

    /// Creates a state from an explicit register file and PC.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if `gpr` does not hold exactly `I::GPR_COUNT` values.
    pub fn from_parts(gpr: Vec<I::Word>, pc: I::Word) -> Result<Self> {
        if gpr.len() != I::GPR_COUNT {
            return Err(DifftestError::contract(
                "ArchState::from_parts",
                format!("{} registers for {}", I::GPR_COUNT, I::NAME),
                format!("{} registers", gpr.len()),
            ));
        }
        Ok(Self {
            gpr,
            pc,
            _isa: PhantomData,
        })
    }

    /// Reads general-purpose register `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= I::GPR_COUNT`.
    pub fn read(&self, idx: usize) -> I::Word {
        self.gpr[idx]
    }

    /// Writes general-purpose register `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= I::GPR_COUNT`.
    pub fn write(&mut self, idx: usize, val: I::Word) {
        self.gpr[idx] = val;
    }

    /// Returns the program counter.
    pub const fn pc(&self) -> I::Word {
        self.pc
    }

    /// Sets the program counter.
    pub fn set_pc(&mut self, pc: I::Word) {
        self.pc = pc;
    }

    /// Returns the register file in architectural order.
    pub fn gprs(&self) -> &[I::Word] {
        &self.gpr
    }

    /// Looks a register up by name.
    ///
    /// Accepts ABI names with or without a leading `$` (`sp`, `$sp`, `$0`) and `pc`.
    pub fn lookup(&self, name: &str) -> Option<I::Word> {
        let bare = name.strip_prefix('$').unwrap_or(name);
        if bare == "pc" {
            return Some(self.pc);
        }
        (0..I::GPR_COUNT)
            .find(|&idx| {
                let reg = I::gpr_name(idx);
                reg == name || reg.strip_prefix('$').unwrap_or(reg) == bare
            })
            .map(|idx| self.gpr[idx])
    }

    /// Serializes into the boundary layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; I::state_bytes()];
        self.encode_into(&mut out);
        out
    }

    /// Serializes into the front of `out`, leaving any trailing bytes untouched.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if `out` is shorter than the boundary layout.
    pub fn write_bytes(&self, out: &mut [u8]) -> Result<()> {
        check_len::<I>("ArchState::write_bytes", out.len())?;
        self.encode_into(out);
        Ok(())
    }

    /// Deserializes from the boundary layout; bytes past the layout are ignored.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if `bytes` is shorter than the boundary layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut state = Self::new();
        state.load_bytes(bytes)?;
        Ok(state)
    }

    /// Overwrites this state from the boundary layout.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if `bytes` is shorter than the boundary layout.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        check_len::<I>("ArchState::load_bytes", bytes.len())?;
        let width = <I::Word as Word>::BYTES;
        for (idx, reg) in self.gpr.iter_mut().enumerate() {
            *reg = I::Word::read_le(&bytes[idx * width..]);
        }
        self.pc = I::Word::read_le(&bytes[I::GPR_COUNT * width..]);
        Ok(())
    }

    fn encode_into(&self, out: &mut [u8]) {
        let width = <I::Word as Word>::BYTES;
        for (idx, reg) in self.gpr.iter().enumerate() {
            reg.write_le(&mut out[idx * width..]);
        }
        self.pc.write_le(&mut out[I::GPR_COUNT * width..]);
    }
}

fn check_len<I: Isa>(op: &'static str, len: usize) -> Result<()> {
    if len < I::state_bytes() {
        return Err(DifftestError::contract(
            op,
            format!("at least {} bytes of {} state", I::state_bytes(), I::NAME),
            format!("{len} bytes"),
        ));
    }
    Ok(())
}

impl<I: Isa> fmt::Display for ArchState<I> {
    /// One line per register: name, zero-padded hex, signed decimal; PC last.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = <I::Word as Word>::BYTES * 2 + 2;
        for (idx, reg) in self.gpr.iter().enumerate() {
            writeln!(
                f,
                "{:>8} {:#0digits$x} {}",
                I::gpr_name(idx),
                reg,
                reg.to_i64()
            )?;
        }
        write!(f, "{:>8} {:#0digits$x} {}", "pc", self.pc, self.pc.to_i64())
    }
}
