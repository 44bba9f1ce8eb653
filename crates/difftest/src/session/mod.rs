//! Difftest session: owns the DUT and the reference side by side.
//!
//! This module drives both machines in lockstep. It provides:
//! 1. **Lifecycle:** `start` initializes the reference and mirrors the initial image and
//!    registers into it; `finish` tears the session down.
//! 2. **Stepping:** Each batch pushes DUT state into the reference, steps both machines by
//!    the same count, pulls the reference registers back, and compares.
//! 3. **Control:** Interrupt forwarding, skip-ref for unmodelled effects, detach/attach,
//!    and a stop handle checked at batch boundaries.
//!
//! The first divergence, reference termination, stop request or guest exit moves the
//! session to [`SessionState::Halted`], which is final.

mod state;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, error, info, warn};

use crate::backend::{Direction, RefBackend};
use crate::common::constants::PAGE_SIZE;
use crate::common::{ArchState, DifftestError, GuestAddr, Result};
use crate::compare::{DivergenceReport, compare};
use crate::config::DifftestConfig;
use crate::dut::{Dut, DutStep};
use crate::isa::Isa;
use crate::memory::MemRange;
use crate::stats::DifftestStats;

pub use state::{HaltReason, SessionState};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Largest chunk copied in one `memcpy` when mirroring the whole guest memory.
const ATTACH_CHUNK: usize = 256 * PAGE_SIZE;

/// Identifies a started session and the channel its reference was initialized with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: u64,
    port: u16,
}

impl SessionHandle {
    fn allocate(port: u16) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            port,
        }
    }

    /// Process-wide session number.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Channel port handed to the reference's `init`.
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}@{}", self.id, self.port)
    }
}

/// Requests a stop from outside the stepping loop.
///
/// Clones share one flag. The session reads it only at batch boundaries.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Asks the session to halt before its next batch.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once a stop was requested.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A lockstep session between a DUT and a reference backend.
pub struct Session<I: Isa, D: Dut<I>, B: RefBackend<I>> {
    config: DifftestConfig,
    dut: D,
    backend: B,
    state: SessionState,
    handle: Option<SessionHandle>,
    instructions: u64,
    stop: StopHandle,
    skip_next: bool,
    attached: bool,
    stats: DifftestStats,
    _isa: PhantomData<I>,
}

impl<I: Isa, D: Dut<I>, B: RefBackend<I>> Session<I, D, B> {
    /// Creates an idle session.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::Config`] if the configuration fails validation.
    pub fn new(config: DifftestConfig, dut: D, backend: B) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            dut,
            backend,
            state: SessionState::Idle,
            handle: None,
            instructions: 0,
            stop: StopHandle::default(),
            skip_next: false,
            attached: true,
            stats: DifftestStats::default(),
            _isa: PhantomData,
        })
    }

    /// Initializes the reference and mirrors the DUT's initial image, any memory the DUT
    /// wrote outside it, and its registers.
    ///
    /// The image range is checked against the DUT's memory before the reference is
    /// touched, so a failed start leaves the session idle.
    ///
    /// # Errors
    ///
    /// A non-idle session, or an image outside guest memory, is a contract violation.
    /// Backend failures are propagated.
    pub fn start(&mut self) -> Result<SessionHandle> {
        if self.state != SessionState::Idle {
            return Err(DifftestError::contract("start", "an idle session", self.state.to_string()));
        }
        let base = self.config.memory.base;
        let image_size = self.config.memory.image_size;
        let window = self.dut.memory_window();
        if !window.contains(base, image_size) {
            return Err(DifftestError::OutOfRange {
                op: "start",
                addr: base,
                len: image_size as u64,
                base: window.start,
                size: window.len as u64,
            });
        }

        let port = self.config.reference.port;
        self.backend.init(port)?;
        let mut image = vec![0u8; image_size];
        self.dut.read_memory(base, &mut image)?;
        self.backend.memcpy(base, &mut image, Direction::ToRef)?;
        self.stats.record_memcpy(image_size);
        self.push_dirty()?;
        self.push_registers()?;

        let handle = SessionHandle::allocate(port);
        self.handle = Some(handle);
        self.state = SessionState::Running;
        info!(
            %handle,
            reference = self.backend.name(),
            isa = I::NAME,
            image_bytes = image_size,
            "difftest session started"
        );
        Ok(handle)
    }

    /// Runs one batch of the configured size.
    ///
    /// # Errors
    ///
    /// Stepping a session that is not running is a contract violation. A failure inside
    /// the batch halts the session and is returned; reference termination halts it as
    /// [`HaltReason::BackendEnded`].
    pub fn step(&mut self) -> Result<&SessionState> {
        self.step_n(self.config.stepping.batch_size)
    }

    /// Runs batches until the session halts or `limit` instructions have executed.
    ///
    /// `None` falls back to the configured `max_instructions`. The last batch is shortened
    /// to land on the limit exactly.
    ///
    /// # Errors
    ///
    /// As [`Session::step`].
    pub fn run(&mut self, limit: Option<u64>) -> Result<&SessionState> {
        self.require_running("run")?;
        let limit = limit.or(self.config.stepping.max_instructions);
        let batch = self.config.stepping.batch_size;
        while self.state.is_running() {
            let n = match limit {
                Some(limit) => match limit.saturating_sub(self.instructions) {
                    0 => break,
                    left => batch.min(left),
                },
                None => batch,
            };
            let _ = self.step_n(n)?;
        }
        Ok(&self.state)
    }

    /// Forwards interrupt `code` to both machines and compares the result.
    ///
    /// # Errors
    ///
    /// As [`Session::step`].
    pub fn raise_interrupt(&mut self, code: u64) -> Result<&SessionState> {
        self.require_running("raise_interrupt")?;
        if let Err(e) = self.interrupt(code) {
            self.fail(&e);
            return Err(e);
        }
        Ok(&self.state)
    }

    /// Marks the next batch as executing something the reference cannot model.
    ///
    /// The reference is not stepped for that batch; the DUT's registers are copied into it
    /// afterwards and no comparison is made.
    pub const fn skip_ref(&mut self) {
        self.skip_next = true;
    }

    /// Stops synchronizing with the reference; batches step only the DUT.
    ///
    /// A pending [`Session::skip_ref`] is dropped.
    ///
    /// # Errors
    ///
    /// The session must be running.
    pub fn detach(&mut self) -> Result<()> {
        self.require_running("detach")?;
        self.skip_next = false;
        if self.attached {
            self.attached = false;
            info!("reference detached");
        }
        Ok(())
    }

    /// Mirrors the whole guest memory and the registers into the reference and resumes
    /// lockstep.
    ///
    /// # Errors
    ///
    /// The session must be running. Copy failures halt the session and are returned.
    pub fn attach(&mut self) -> Result<()> {
        self.require_running("attach")?;
        if self.attached {
            return Ok(());
        }
        self.skip_next = false;
        if let Err(e) = self.mirror_memory() {
            self.fail(&e);
            return Err(e);
        }
        self.attached = true;
        info!(instructions = self.instructions, "reference attached");
        Ok(())
    }

    /// Returns a handle that stops the session at the next batch boundary.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Current state.
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// The divergence report, if the session halted on one.
    pub fn report(&self) -> Option<&DivergenceReport> {
        self.state.divergence()
    }

    /// Instructions executed in lockstep so far.
    pub const fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Counters collected so far.
    pub const fn stats(&self) -> &DifftestStats {
        &self.stats
    }

    /// The handle of a started session that has not been torn down.
    pub const fn handle(&self) -> Option<SessionHandle> {
        self.handle
    }

    /// Returns `true` while the reference follows the DUT.
    pub const fn is_attached(&self) -> bool {
        self.attached
    }

    /// The configuration the session was created with.
    pub const fn config(&self) -> &DifftestConfig {
        &self.config
    }

    /// Borrows the DUT.
    pub const fn dut(&self) -> &D {
        &self.dut
    }

    /// Mutably borrows the DUT.
    pub const fn dut_mut(&mut self) -> &mut D {
        &mut self.dut
    }

    /// Borrows the reference backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Reads the reference's registers without comparing them.
    ///
    /// # Errors
    ///
    /// Requires a started session; propagates backend failures.
    pub fn reference_state(&mut self) -> Result<ArchState<I>> {
        if self.handle.is_none() {
            return Err(DifftestError::contract(
                "reference_state",
                "a started session",
                self.state.to_string(),
            ));
        }
        self.pull_registers()
    }

    /// Tears the session down and returns its final state and counters.
    pub fn finish(mut self) -> (SessionState, DifftestStats) {
        if let Some(handle) = self.handle.take() {
            info!(%handle, state = %self.state, instructions = self.instructions, "difftest session finished");
        }
        (self.state, self.stats)
    }

    fn step_n(&mut self, n: u64) -> Result<&SessionState> {
        self.require_running("step")?;
        if let Err(e) = self.batch(n) {
            self.fail(&e);
            return Err(e);
        }
        Ok(&self.state)
    }

    fn batch(&mut self, n: u64) -> Result<()> {
        if self.stop.is_requested() {
            info!(instructions = self.instructions, "stop requested");
            self.halt(HaltReason::UserStop);
            return Ok(());
        }

        if !self.attached {
            let step = self.dut_step(n)?;
            self.instructions += step.executed;
            self.stats.instructions += step.executed;
            self.stats.detached_batches += 1;
            if let Some(code) = step.exit {
                self.halt(HaltReason::GuestExit { code });
            }
            return Ok(());
        }

        self.push_dirty()?;
        self.push_registers()?;
        let step = self.dut_step(n)?;

        if self.skip_next {
            self.skip_next = false;
            self.push_registers()?;
            self.instructions += step.executed;
            self.stats.instructions += step.executed;
            self.stats.skipped_batches += 1;
            debug!(executed = step.executed, "reference skipped for batch");
            if let Some(code) = step.exit {
                self.halt(HaltReason::GuestExit { code });
            }
            return Ok(());
        }

        if step.executed > 0 {
            self.backend.exec(step.executed)?;
        }
        let dut_state = self.dut.arch_state()?;
        let ref_state = self.pull_registers()?;
        self.instructions += step.executed;
        self.stats.instructions += step.executed;
        self.stats.batches += 1;
        debug!(executed = step.executed, total = self.instructions, "batch compared");

        if let Err(report) = compare(&dut_state, &ref_state) {
            self.diverged(report);
            return Ok(());
        }
        if let Some(code) = step.exit {
            self.halt(HaltReason::GuestExit { code });
        }
        Ok(())
    }

    fn interrupt(&mut self, code: u64) -> Result<()> {
        self.dut.raise_intr(code)?;
        self.stats.interrupts += 1;
        if !self.attached {
            return Ok(());
        }
        self.backend.raise_intr(code)?;
        let dut_state = self.dut.arch_state()?;
        let ref_state = self.pull_registers()?;
        debug!(code, "interrupt raised on both machines");
        if let Err(report) = compare(&dut_state, &ref_state) {
            self.diverged(report);
        }
        Ok(())
    }

    fn dut_step(&mut self, n: u64) -> Result<DutStep> {
        let step = self.dut.step(n)?;
        if step.executed > n || (step.executed < n && step.exit.is_none()) {
            return Err(DifftestError::contract(
                "Dut::step",
                format!("{n} instructions, or fewer with a guest exit"),
                format!("{} instructions without an exit", step.executed),
            ));
        }
        Ok(step)
    }

    fn push_registers(&mut self) -> Result<()> {
        let mut regs = self.dut.arch_state()?;
        self.backend.regcpy(&mut regs, Direction::ToRef)?;
        self.stats.regcpy_to_ref += 1;
        Ok(())
    }

    fn pull_registers(&mut self) -> Result<ArchState<I>> {
        let mut regs = ArchState::new();
        self.backend.regcpy(&mut regs, Direction::ToDut)?;
        self.stats.regcpy_to_dut += 1;
        Ok(regs)
    }

    fn push_dirty(&mut self) -> Result<()> {
        for range in self.dut.take_dirty() {
            self.push_range(range)?;
        }
        Ok(())
    }

    fn push_range(&mut self, range: MemRange) -> Result<()> {
        let mut buf = vec![0u8; range.len.min(ATTACH_CHUNK)];
        let mut offset = 0usize;
        while offset < range.len {
            let len = (range.len - offset).min(ATTACH_CHUNK);
            let addr: GuestAddr = range.start + offset as u64;
            let chunk = &mut buf[..len];
            self.dut.read_memory(addr, chunk)?;
            self.backend.memcpy(addr, chunk, Direction::ToRef)?;
            self.stats.record_memcpy(len);
            offset += len;
        }
        Ok(())
    }

    fn mirror_memory(&mut self) -> Result<()> {
        let window = self.dut.memory_window();
        self.push_range(window)?;
        let _ = self.dut.take_dirty();
        self.push_registers()
    }

    fn require_running(&self, op: &'static str) -> Result<()> {
        if self.state.is_running() {
            Ok(())
        } else {
            Err(DifftestError::contract(op, "a running session", self.state.to_string()))
        }
    }

    fn diverged(&mut self, report: DivergenceReport) {
        let report = report.at_instruction(self.instructions);
        warn!(%report, "difftest divergence");
        self.halt(HaltReason::Diverged(Box::new(report)));
    }

    fn fail(&mut self, e: &DifftestError) {
        if e.is_reference_ended() {
            warn!(instructions = self.instructions, "reference ended");
            self.halt(HaltReason::BackendEnded);
            if let Some(handle) = self.handle.take() {
                info!(%handle, "session torn down after reference termination");
            }
        } else {
            error!(instructions = self.instructions, "batch failed: {e}");
            self.halt(HaltReason::Faulted { error: e.to_string() });
        }
    }

    fn halt(&mut self, reason: HaltReason) {
        debug!(%reason, "session halted");
        self.state = SessionState::Halted(reason);
    }
}

impl<I: Isa, D: Dut<I>, B: RefBackend<I>> fmt::Debug for Session<I, D, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("isa", &I::NAME)
            .field("reference", &self.backend.name())
            .field("state", &self.state)
            .field("handle", &self.handle)
            .field("instructions", &self.instructions)
            .field("attached", &self.attached)
            .finish_non_exhaustive()
    }
}
