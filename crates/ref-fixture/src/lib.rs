//! Minimal RV32 reference exporting the difftest C entry points.
//!
//! Built as a `cdylib` so the shared-library backend can be driven end to end. The machine
//! has 64 KiB of memory at [`MEM_BASE`] and understands a single instruction:
//! 1. **`ebreak`:** Ends the machine without retiring; `pc` stays on it.
//! 2. **Anything else:** `a0 += 1; pc += 4`, and `mcycle` counts it.
//!
//! The exported state record is the 32 GPRs, `pc`, then four CSR words (see
//! [`STATE_BYTES`]). `difftest_exec` on an ended machine, or a copy outside guest memory,
//! aborts the process the way a real reference would panic.

use std::ffi::{c_int, c_void};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Guest memory base.
pub const MEM_BASE: u32 = 0x8000_0000;
/// Guest memory size.
pub const MEM_SIZE: usize = 64 * 1024;
/// Encoding of `ebreak`.
pub const EBREAK: u32 = 0x0010_0073;
/// Trap vector after `difftest_init`.
pub const RESET_MTVEC: u32 = MEM_BASE + 0x100;

const GPR_COUNT: usize = 32;
const A0: usize = 10;

/// Index of each CSR in the record tail.
pub mod csr {
    /// Trap vector.
    pub const MTVEC: usize = 0;
    /// PC of the last interrupt.
    pub const MEPC: usize = 1;
    /// Code of the last interrupt.
    pub const MCAUSE: usize = 2;
    /// Instructions retired since `difftest_init`.
    pub const MCYCLE: usize = 3;
    /// Number of CSR words.
    pub const COUNT: usize = 4;
}

/// Bytes in the exported state record.
pub const STATE_BYTES: usize = (GPR_COUNT + 1 + csr::COUNT) * 4;

struct Machine {
    gpr: [u32; GPR_COUNT],
    pc: u32,
    csr: [u32; csr::COUNT],
    mem: Vec<u8>,
    ended: bool,
}

impl Machine {
    fn new() -> Self {
        let mut csrs = [0; csr::COUNT];
        csrs[csr::MTVEC] = RESET_MTVEC;
        Self {
            gpr: [0; GPR_COUNT],
            pc: MEM_BASE,
            csr: csrs,
            mem: vec![0; MEM_SIZE],
            ended: false,
        }
    }

    fn fetch(&self) -> Option<u32> {
        let off = self.pc.checked_sub(MEM_BASE)? as usize;
        let word = self.mem.get(off..off.checked_add(4)?)?;
        Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
    }

    fn exec(&mut self, n: u64) {
        for _ in 0..n {
            match self.fetch() {
                Some(EBREAK) | None => {
                    self.ended = true;
                    return;
                }
                Some(_) => {
                    self.gpr[A0] = self.gpr[A0].wrapping_add(1);
                    self.pc = self.pc.wrapping_add(4);
                    self.csr[csr::MCYCLE] = self.csr[csr::MCYCLE].wrapping_add(1);
                }
            }
        }
    }

    fn record(&self) -> Vec<u8> {
        self.gpr
            .iter()
            .chain(std::iter::once(&self.pc))
            .chain(self.csr.iter())
            .flat_map(|word| word.to_le_bytes())
            .collect()
    }

    fn load_record(&mut self, record: &[u8]) {
        let mut words = record
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]));
        for reg in &mut self.gpr {
            *reg = words.next().unwrap_or_default();
        }
        self.pc = words.next().unwrap_or_default();
        for reg in &mut self.csr {
            *reg = words.next().unwrap_or_default();
        }
        self.gpr[0] = 0;
    }

    fn window(&mut self, addr: u32, n: usize) -> &mut [u8] {
        let slice = addr
            .checked_sub(MEM_BASE)
            .and_then(|off| self.mem.get_mut(off as usize..(off as usize).checked_add(n)?));
        match slice {
            Some(slice) => slice,
            None => std::process::abort(),
        }
    }
}

static MACHINE: Mutex<Option<Machine>> = Mutex::new(None);

fn machine() -> MutexGuard<'static, Option<Machine>> {
    MACHINE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resets the machine. The port is ignored.
#[unsafe(no_mangle)]
pub extern "C" fn difftest_init(_port: c_int) {
    *machine() = Some(Machine::new());
}

/// Executes up to `n` instructions, stopping early at `ebreak`.
#[unsafe(no_mangle)]
pub extern "C" fn difftest_exec(n: u64) {
    let mut guard = machine();
    if let Some(m) = guard.as_mut() {
        if m.ended {
            std::process::abort();
        }
        m.exec(n);
    }
}

/// Copies `n` bytes between guest memory at `addr` and `buf`.
///
/// # Safety
///
/// `buf` must be valid for `n` bytes of reads and writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn difftest_memcpy(addr: u32, buf: *mut c_void, n: usize, to_ref: bool) {
    if buf.is_null() || n == 0 {
        return;
    }
    // SAFETY: the caller guarantees `buf` spans `n` bytes.
    let buf = unsafe { std::slice::from_raw_parts_mut(buf.cast::<u8>(), n) };
    let mut guard = machine();
    if let Some(m) = guard.as_mut() {
        let guest = m.window(addr, n);
        if to_ref {
            guest.copy_from_slice(buf);
        } else {
            buf.copy_from_slice(guest);
        }
    }
}

/// Copies the whole state record between the machine and `dut`.
///
/// # Safety
///
/// `dut` must be valid for [`STATE_BYTES`] bytes of reads and writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn difftest_regcpy(dut: *mut c_void, to_ref: bool) {
    if dut.is_null() {
        return;
    }
    // SAFETY: the caller guarantees `dut` spans `STATE_BYTES` bytes.
    let record = unsafe { std::slice::from_raw_parts_mut(dut.cast::<u8>(), STATE_BYTES) };
    let mut guard = machine();
    if let Some(m) = guard.as_mut() {
        if to_ref {
            m.load_record(record);
        } else {
            record.copy_from_slice(&m.record());
        }
    }
}

/// Takes interrupt `no`: saves `pc` and the code, then jumps to `mtvec`.
#[unsafe(no_mangle)]
pub extern "C" fn difftest_raise_intr(no: u32) {
    let mut guard = machine();
    if let Some(m) = guard.as_mut() {
        m.csr[csr::MCAUSE] = no;
        m.csr[csr::MEPC] = m.pc;
        m.pc = m.csr[csr::MTVEC];
    }
}

/// Non-zero once the machine has reached `ebreak`.
#[unsafe(no_mangle)]
pub extern "C" fn difftest_ended() -> c_int {
    c_int::from(machine().as_ref().is_some_and(|m| m.ended))
}
