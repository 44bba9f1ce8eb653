use difftest_core::{DifftestConfig, GuestAddr, Session};
use tracing_subscriber::EnvFilter;

use crate::common::toy::{TOY_BASE, TOY_MEM, ToyDut, ToyIsa, ToyReference};

pub type ToySession = Session<ToyIsa, ToyDut, ToyReference>;

/// Installs a test-writer subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configuration matching the toy machines' memory window.
pub fn toy_config(batch_size: u64) -> DifftestConfig {
    let mut config = DifftestConfig::default();
    config.memory.base = GuestAddr(TOY_BASE);
    config.memory.size = TOY_MEM;
    config.stepping.batch_size = batch_size;
    config
}

/// Builder for a toy DUT/REF session.
pub struct Bench {
    pub config: DifftestConfig,
    pub dut: ToyDut,
    pub reference: ToyReference,
}

impl Default for Bench {
    fn default() -> Self {
        Self::new()
    }
}

impl Bench {
    pub fn new() -> Self {
        init_tracing();
        Self {
            config: toy_config(1),
            dut: ToyDut::default(),
            reference: ToyReference::default(),
        }
    }

    pub fn batch(mut self, n: u64) -> Self {
        self.config.stepping.batch_size = n;
        self
    }

    /// Writes `image` at the memory base of the DUT only.
    pub fn image(mut self, image: &[u8]) -> Self {
        self.dut
            .machine
            .memory
            .write(GuestAddr(TOY_BASE), image)
            .unwrap();
        self.dut.machine.memory.clear_dirty();
        self
    }

    /// Makes the DUT compute a wrong `r1` at instruction `n`.
    pub fn dut_fault_at(mut self, n: u64) -> Self {
        self.dut.machine.fault_at = Some(n);
        self
    }

    pub fn reference_ends_after(mut self, n: u64) -> Self {
        self.reference.end_after = Some(n);
        self
    }

    pub fn guest_exits_after(mut self, n: u64) -> Self {
        self.dut.exit_after = Some(n);
        self
    }

    pub fn build(self) -> ToySession {
        Session::new(self.config, self.dut, self.reference).unwrap()
    }

    pub fn start(self) -> ToySession {
        let mut session = self.build();
        let _ = session.start().unwrap();
        session
    }
}
