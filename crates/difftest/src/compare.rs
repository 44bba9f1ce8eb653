//! Architectural state comparison.
//!
//! The check order is fixed: general-purpose registers by ascending index, then the
//! program counter. The first unequal value wins, so the same pair of states always
//! produces the same report.

use std::fmt;

use serde::Serialize;

use crate::common::ArchState;
use crate::isa::{Isa, Word};
use crate::symbols::FunctionTable;

/// Where two states disagree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// General-purpose register at this index.
    Register(usize),
    /// Program counter, checked after every register matched.
    ProgramCounter,
}

/// First mismatch between DUT and REF.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DivergenceReport {
    /// Mismatching location.
    pub kind: MismatchKind,
    /// ABI name of the location (`a0`, `pc`).
    pub name: &'static str,
    /// REF's value.
    pub expected: u64,
    /// DUT's value.
    pub actual: u64,
    /// Instructions completed before the batch that diverged ended.
    pub instruction_index: u64,
    /// REF's program counter.
    pub pc: u64,
}

impl DivergenceReport {
    /// Returns the report stamped with `instruction_index`.
    #[must_use]
    pub const fn at_instruction(mut self, instruction_index: u64) -> Self {
        self.instruction_index = instruction_index;
        self
    }

    /// Renders the report with the function enclosing `pc` when it is known.
    pub fn render_with(&self, symbols: &FunctionTable) -> String {
        match symbols.lookup(self.pc) {
            Some(func) => format!("{self} in {}+{:#x}", func.name, self.pc - func.start),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for DivergenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MismatchKind::Register(idx) => write!(
                f,
                "register {} (x{idx}) differs after instruction {}: ref = {:#x}, dut = {:#x} at pc = {:#x}",
                self.name, self.instruction_index, self.expected, self.actual, self.pc
            ),
            MismatchKind::ProgramCounter => write!(
                f,
                "pc differs after instruction {}: ref = {:#x}, dut = {:#x}",
                self.instruction_index, self.expected, self.actual
            ),
        }
    }
}

/// Compares `dut` against `reference`.
///
/// # Returns
///
/// `Ok(())` if every register and the PC are bitwise equal. Otherwise the first
/// mismatch, with `instruction_index` left at zero for the caller to stamp.
///
/// # Errors
///
/// The error value is the [`DivergenceReport`] for the first mismatching location.
pub fn compare<I: Isa>(dut: &ArchState<I>, reference: &ArchState<I>) -> Result<(), DivergenceReport> {
    match mismatches(dut, reference).next() {
        Some(report) => Err(report),
        None => Ok(()),
    }
}

/// Every mismatching location in check order.
///
/// Used for diagnostics after a divergence; [`compare`] yields the first of these.
pub fn mismatches<'a, I: Isa>(
    dut: &'a ArchState<I>,
    reference: &'a ArchState<I>,
) -> impl Iterator<Item = DivergenceReport> + 'a {
    let pc = reference.pc().to_u64();
    let regs = dut
        .gprs()
        .iter()
        .zip(reference.gprs())
        .enumerate()
        .filter(|(_, (d, r))| d != r)
        .map(move |(idx, (d, r))| DivergenceReport {
            kind: MismatchKind::Register(idx),
            name: I::gpr_name(idx),
            expected: r.to_u64(),
            actual: d.to_u64(),
            instruction_index: 0,
            pc,
        });
    let pc_mismatch = (dut.pc() != reference.pc()).then(|| DivergenceReport {
        kind: MismatchKind::ProgramCounter,
        name: "pc",
        expected: pc,
        actual: dut.pc().to_u64(),
        instruction_index: 0,
        pc,
    });
    regs.chain(pc_mismatch)
}
