//! RISC-V register files.
//!
//! Both stock ISAs expose the 32 integer registers in architectural order followed by the
//! PC, which is the layout reference emulators use for their exported `CPU_state`.

use super::Isa;

/// ABI names of the 32 integer registers, indexed by register number.
///
/// `x0` is spelled `$0` so that it cannot collide with a user-visible name.
pub const GPR_NAMES: [&str; 32] = [
    "$0", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// RV32: 32 registers of 32 bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rv32;

/// RV64: 32 registers of 64 bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rv64;

impl Isa for Rv32 {
    type Word = u32;
    const NAME: &'static str = "riscv32";
    const GPR_COUNT: usize = 32;
    const EXIT_CODE_REG: Option<usize> = Some(10);

    fn gpr_name(idx: usize) -> &'static str {
        GPR_NAMES[idx]
    }
}

impl Isa for Rv64 {
    type Word = u64;
    const NAME: &'static str = "riscv64";
    const GPR_COUNT: usize = 32;
    const EXIT_CODE_REG: Option<usize> = Some(10);

    fn gpr_name(idx: usize) -> &'static str {
        GPR_NAMES[idx]
    }
}
