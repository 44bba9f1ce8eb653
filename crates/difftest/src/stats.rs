//! Session statistics.
//!
//! This module counts the work a session did to keep the two machines in lockstep. It
//! tracks:
//! 1. **Progress:** Batches completed, instructions executed, interrupts raised.
//! 2. **Synchronization:** Register copies in each direction and memory bytes pushed.
//! 3. **Coverage gaps:** Batches run with the reference skipped or detached.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Counters for one session.
#[derive(Clone, Debug, Serialize)]
pub struct DifftestStats {
    #[serde(skip)]
    start_time: Instant,
    /// Lockstep batches that completed.
    pub batches: u64,
    /// Instructions executed by the DUT and mirrored on the reference.
    pub instructions: u64,
    /// `regcpy` calls towards the reference.
    pub regcpy_to_ref: u64,
    /// `regcpy` calls back from the reference.
    pub regcpy_to_dut: u64,
    /// `memcpy` calls towards the reference.
    pub memcpy_to_ref: u64,
    /// Guest memory bytes pushed to the reference.
    pub bytes_to_ref: u64,
    /// Interrupts forwarded to both machines.
    pub interrupts: u64,
    /// Batches executed with the reference step skipped.
    pub skipped_batches: u64,
    /// Batches executed while the reference was detached.
    pub detached_batches: u64,
}

impl Default for DifftestStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            batches: 0,
            instructions: 0,
            regcpy_to_ref: 0,
            regcpy_to_dut: 0,
            memcpy_to_ref: 0,
            bytes_to_ref: 0,
            interrupts: 0,
            skipped_batches: 0,
            detached_batches: 0,
        }
    }
}

impl DifftestStats {
    /// Wall time since the session was created.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub(crate) const fn record_memcpy(&mut self, len: usize) {
        self.memcpy_to_ref += 1;
        self.bytes_to_ref += len as u64;
    }
}

impl fmt::Display for DifftestStats {
    /// Prints one `key value` line per counter, followed by the lockstep rate.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.elapsed().as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let rate = if seconds > 0.0 {
            self.instructions as f64 / seconds
        } else {
            0.0
        };
        writeln!(f, "host_seconds             {seconds:.4} s")?;
        writeln!(f, "difftest.batches         {}", self.batches)?;
        writeln!(f, "difftest.instructions    {}", self.instructions)?;
        writeln!(f, "difftest.skipped         {}", self.skipped_batches)?;
        writeln!(f, "difftest.detached        {}", self.detached_batches)?;
        writeln!(f, "difftest.interrupts      {}", self.interrupts)?;
        writeln!(f, "sync.regcpy_to_ref       {}", self.regcpy_to_ref)?;
        writeln!(f, "sync.regcpy_to_dut       {}", self.regcpy_to_dut)?;
        writeln!(f, "sync.memcpy_to_ref       {}", self.memcpy_to_ref)?;
        writeln!(f, "sync.bytes_to_ref        {}", self.bytes_to_ref)?;
        write!(f, "difftest.instr_per_sec   {rate:.0}")
    }
}
