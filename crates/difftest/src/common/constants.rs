//! Constants shared by the backends, the wire protocol and the session.

/// C ABI value of the "copy into the DUT buffer" direction.
pub const DIFFTEST_TO_DUT: bool = false;

/// C ABI value of the "copy into the reference" direction.
pub const DIFFTEST_TO_REF: bool = true;

/// Default control channel (TCP port) handed to `init`.
pub const DEFAULT_PORT: u16 = 1234;

/// Size of the built-in image used when no image file is given.
pub const BUILTIN_IMAGE_SIZE: usize = 4096;

/// Default guest memory base; the reset vector sits here.
pub const DEFAULT_MEM_BASE: u64 = 0x8000_0000;

/// Default guest memory size (128 MiB).
pub const DEFAULT_MEM_SIZE: usize = 128 * 1024 * 1024;

/// Dirty-tracking granularity of guest memory.
pub const PAGE_SHIFT: u32 = 12;

/// Page size in bytes derived from [`PAGE_SHIFT`].
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Largest single transfer accepted from the wire.
pub const MAX_WIRE_TRANSFER: u64 = 256 * 1024 * 1024;

/// Shared-library entry point names, in the order they are resolved.
pub mod symbols {
    /// `void difftest_init(int port)`
    pub const INIT: &str = "difftest_init";
    /// `void difftest_exec(uint64_t n)`
    pub const EXEC: &str = "difftest_exec";
    /// `void difftest_memcpy(paddr_t addr, void *buf, size_t n, bool direction)`
    pub const MEMCPY: &str = "difftest_memcpy";
    /// `void difftest_regcpy(void *dut, bool direction)`
    pub const REGCPY: &str = "difftest_regcpy";
    /// `void difftest_raise_intr(word_t NO)`
    pub const RAISE_INTR: &str = "difftest_raise_intr";
    /// `int difftest_ended(void)`, optional; non-zero once the reference has ended.
    pub const ENDED: &str = "difftest_ended";
}
