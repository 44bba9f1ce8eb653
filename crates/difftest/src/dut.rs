//! Device under test.
//!
//! The session needs only a narrow view of the emulator being verified: step it, read its
//! architectural state and memory, raise an interrupt, and learn which memory it wrote.
//! [`Dut`] captures that view. [`BackendDut`] implements it on top of a reference
//! backend so two emulator builds can be compared against each other.

use std::fmt;
use std::marker::PhantomData;

use tracing::info;

use crate::backend::{Direction, RefBackend};
use crate::common::{ArchState, DifftestError, GuestAddr, Result};
use crate::config::DifftestConfig;
use crate::isa::{Isa, Word};
use crate::memory::MemRange;

/// Outcome of [`Dut::step`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DutStep {
    /// Instructions actually executed.
    pub executed: u64,
    /// Exit code if the guest program ended during the step.
    pub exit: Option<u64>,
}

impl DutStep {
    /// A step that ran `executed` instructions and did not end the guest.
    pub const fn ran(executed: u64) -> Self {
        Self { executed, exit: None }
    }

    /// A step that ended the guest with `code` after `executed` instructions.
    pub const fn exited(executed: u64, code: u64) -> Self {
        Self {
            executed,
            exit: Some(code),
        }
    }
}

/// The emulator being verified.
pub trait Dut<I: Isa> {
    /// Executes up to `n` instructions.
    ///
    /// Executing fewer than `n` is only allowed when the guest ends, which is reported
    /// through [`DutStep::exit`].
    ///
    /// # Errors
    ///
    /// Failures of the emulator itself.
    fn step(&mut self, n: u64) -> Result<DutStep>;

    /// Returns a copy of the current register file and PC.
    ///
    /// # Errors
    ///
    /// Failures reading the state.
    fn arch_state(&mut self) -> Result<ArchState<I>>;

    /// Takes interrupt `code`.
    ///
    /// # Errors
    ///
    /// Failures of the emulator itself.
    fn raise_intr(&mut self, code: u64) -> Result<()>;

    /// Copies guest memory at `addr` into `buf`.
    ///
    /// # Errors
    ///
    /// An address range outside guest memory is a contract violation.
    fn read_memory(&mut self, addr: GuestAddr, buf: &mut [u8]) -> Result<()>;

    /// Returns the memory written since the last call and forgets it.
    fn take_dirty(&mut self) -> Vec<MemRange>;

    /// The guest memory window.
    fn memory_window(&self) -> MemRange;
}

impl<I: Isa, D: Dut<I> + ?Sized> Dut<I> for Box<D> {
    fn step(&mut self, n: u64) -> Result<DutStep> {
        (**self).step(n)
    }

    fn arch_state(&mut self) -> Result<ArchState<I>> {
        (**self).arch_state()
    }

    fn raise_intr(&mut self, code: u64) -> Result<()> {
        (**self).raise_intr(code)
    }

    fn read_memory(&mut self, addr: GuestAddr, buf: &mut [u8]) -> Result<()> {
        (**self).read_memory(addr, buf)
    }

    fn take_dirty(&mut self) -> Vec<MemRange> {
        (**self).take_dirty()
    }

    fn memory_window(&self) -> MemRange {
        (**self).memory_window()
    }
}

/// A reference backend driven as the device under test.
///
/// The backend is initialized and loaded with the image on construction. Its memory
/// writes are invisible through the backend contract, so [`Dut::take_dirty`] is always
/// empty: both sides execute the same stores and only register state is pushed.
///
/// The guest has ended once the backend refuses to step with
/// [`DifftestError::ReferenceEnded`]; the exit code
/// is read from [`Isa::EXIT_CODE_REG`].
pub struct BackendDut<I: Isa, B: RefBackend<I>> {
    backend: B,
    window: MemRange,
    ended: Option<u64>,
    _isa: PhantomData<I>,
}

impl<I: Isa, B: RefBackend<I>> BackendDut<I, B> {
    /// Initializes `backend` and copies `image` to the memory base.
    ///
    /// # Errors
    ///
    /// Fails if `init` fails or the image does not fit the configured window.
    pub fn new(mut backend: B, config: &DifftestConfig, image: &[u8]) -> Result<Self> {
        let window = MemRange::new(config.memory.base, config.memory.size);
        if !window.contains(config.memory.base, image.len()) {
            return Err(DifftestError::OutOfRange {
                op: "BackendDut::new",
                addr: config.memory.base,
                len: image.len() as u64,
                base: window.start,
                size: window.len as u64,
            });
        }
        backend.init(config.reference.port)?;
        let mut image = image.to_vec();
        if !image.is_empty() {
            backend.memcpy(config.memory.base, &mut image, Direction::ToRef)?;
        }
        info!(backend = backend.name(), image_bytes = image.len(), "device under test ready");
        Ok(Self {
            backend,
            window,
            ended: None,
            _isa: PhantomData,
        })
    }

    /// Borrows the wrapped backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    fn exit_code(&mut self) -> Result<u64> {
        let state = self.arch_state()?;
        Ok(I::EXIT_CODE_REG.map_or(0, |idx| state.read(idx).to_u64()))
    }
}

impl<I: Isa, B: RefBackend<I>> Dut<I> for BackendDut<I, B> {
    fn step(&mut self, n: u64) -> Result<DutStep> {
        if let Some(code) = self.ended {
            return Ok(DutStep::exited(0, code));
        }
        match self.backend.exec(n) {
            Ok(()) => Ok(DutStep::ran(n)),
            Err(e) if e.is_reference_ended() => {
                let code = self.exit_code()?;
                self.ended = Some(code);
                Ok(DutStep::exited(0, code))
            }
            Err(e) => Err(e),
        }
    }

    fn arch_state(&mut self) -> Result<ArchState<I>> {
        let mut state = ArchState::new();
        self.backend.regcpy(&mut state, Direction::ToDut)?;
        Ok(state)
    }

    fn raise_intr(&mut self, code: u64) -> Result<()> {
        self.backend.raise_intr(code)
    }

    fn read_memory(&mut self, addr: GuestAddr, buf: &mut [u8]) -> Result<()> {
        self.backend.memcpy(addr, buf, Direction::ToDut)
    }

    fn take_dirty(&mut self) -> Vec<MemRange> {
        Vec::new()
    }

    fn memory_window(&self) -> MemRange {
        self.window
    }
}

impl<I: Isa, B: RefBackend<I>> fmt::Debug for BackendDut<I, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDut")
            .field("backend", &self.backend.name())
            .field("window", &self.window)
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}
