//! Reference backend loaded from a shared library.
//!
//! The library exports the C entry points listed in
//! [`constants::symbols`](crate::common::constants::symbols). They are resolved once with
//! `dlopen`/`dlsym`; a missing library or entry point surfaces as
//! [`DifftestError::BackendUnavailable`] instead of a crash on first use.
//!
//! The C ABI carries no bounds or lifecycle information, so this wrapper enforces the
//! contract on the Rust side: addresses are checked against the configured guest window,
//! `init` runs once, and nothing but `init` is forwarded before it.
//!
//! Libraries may also export [`symbols::ENDED`](crate::common::constants::symbols::ENDED).
//! When they do, `exec` on an ended reference returns [`DifftestError::ReferenceEnded`]
//! without entering the library. Without it the end state is invisible from here, and a
//! reference that aborts when executed past its end takes the whole process with it. Bound
//! such runs with `stepping.max_instructions`.
//!
//! `dlopen` returns the same handle for the same file, and every handle shares the
//! library's globals. Two backends in one process need two distinct library files.

use std::ffi::{CStr, CString, c_int, c_void};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use tracing::{debug, info, warn};

use super::{Direction, RefBackend};
use crate::common::constants::symbols;
use crate::common::{ArchState, DifftestError, GuestAddr, Result};
use crate::config::DifftestConfig;
use crate::isa::{Isa, Word};

type InitFn = unsafe extern "C" fn(c_int);
type ExecFn = unsafe extern "C" fn(u64);
type MemcpyFn<W> = unsafe extern "C" fn(W, *mut c_void, usize, bool);
type RegcpyFn = unsafe extern "C" fn(*mut c_void, bool);
type RaiseIntrFn<W> = unsafe extern "C" fn(W);
type EndedFn = unsafe extern "C" fn() -> c_int;

/// A reference emulator living in a shared library.
pub struct DylibBackend<I: Isa> {
    path: String,
    handle: *mut c_void,
    init_fn: InitFn,
    exec_fn: ExecFn,
    memcpy_fn: MemcpyFn<I::Word>,
    regcpy_fn: RegcpyFn,
    raise_intr_fn: RaiseIntrFn<I::Word>,
    ended_fn: Option<EndedFn>,
    mem_base: GuestAddr,
    mem_size: usize,
    state_bytes: usize,
    initialized: bool,
    _isa: PhantomData<I>,
}

impl<I: Isa> DylibBackend<I> {
    /// Opens `path` and resolves every entry point.
    ///
    /// [`symbols::ENDED`] is optional; every other entry point is required. The guest window and the exported state record size come from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::BackendUnavailable`] if the library cannot be opened or an
    /// entry point is missing, and [`DifftestError::Config`] if the configured state
    /// record is smaller than the register file plus PC.
    pub fn load(path: &Path, config: &DifftestConfig) -> Result<Self> {
        let shown = path.display().to_string();
        let state_bytes = config.reference.state_bytes.unwrap_or_else(I::state_bytes);
        if state_bytes < I::state_bytes() {
            return Err(DifftestError::Config(format!(
                "reference.state_bytes = {state_bytes} is smaller than the {} bytes of {} state",
                I::state_bytes(),
                I::NAME
            )));
        }

        let c_path = CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| DifftestError::unavailable(&shown, "path contains a NUL byte"))?;
        // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY) };
        if handle.is_null() {
            return Err(DifftestError::unavailable(&shown, last_dl_error()));
        }

        let resolve = |name: &'static str| -> Result<*mut c_void> {
            let c_name = CString::new(name)
                .map_err(|_| DifftestError::unavailable(&shown, "symbol contains a NUL byte"))?;
            // SAFETY: `handle` came from a successful dlopen and is still open.
            let sym = unsafe { libc::dlsym(handle, c_name.as_ptr()) };
            if sym.is_null() {
                Err(DifftestError::unavailable(
                    &shown,
                    format!("missing entry point `{name}`"),
                ))
            } else {
                Ok(sym)
            }
        };

        let resolved = (|| {
            Ok::<_, DifftestError>((
                resolve(symbols::INIT)?,
                resolve(symbols::EXEC)?,
                resolve(symbols::MEMCPY)?,
                resolve(symbols::REGCPY)?,
                resolve(symbols::RAISE_INTR)?,
            ))
        })();
        let (init, exec, memcpy, regcpy, raise_intr) = match resolved {
            Ok(syms) => syms,
            Err(e) => {
                // SAFETY: closing the handle we just opened; nothing resolved from it escapes.
                let _ = unsafe { libc::dlclose(handle) };
                return Err(e);
            }
        };

        let ended = CString::new(symbols::ENDED).map_or(std::ptr::null_mut(), |name| {
            // SAFETY: `handle` is still open; NULL means the export is absent.
            unsafe { libc::dlsym(handle, name.as_ptr()) }
        });
        let ended_fn = if ended.is_null() {
            warn!(
                path = %shown,
                "reference does not export {}; its end state cannot be detected",
                symbols::ENDED
            );
            None
        } else {
            // SAFETY: same ABI reinterpretation as the required entry points below.
            Some(unsafe { std::mem::transmute_copy::<*mut c_void, EndedFn>(&ended) })
        };

        info!(path = %shown, isa = I::NAME, "loaded reference library");
        // SAFETY: the entry points follow the difftest C ABI; each symbol address is
        // reinterpreted as the matching function pointer type. Function pointers and data
        // pointers have the same size on every supported platform.
        unsafe {
            Ok(Self {
                path: shown,
                handle,
                init_fn: std::mem::transmute_copy::<*mut c_void, InitFn>(&init),
                exec_fn: std::mem::transmute_copy::<*mut c_void, ExecFn>(&exec),
                memcpy_fn: std::mem::transmute_copy::<*mut c_void, MemcpyFn<I::Word>>(&memcpy),
                regcpy_fn: std::mem::transmute_copy::<*mut c_void, RegcpyFn>(&regcpy),
                raise_intr_fn: std::mem::transmute_copy::<*mut c_void, RaiseIntrFn<I::Word>>(
                    &raise_intr,
                ),
                ended_fn,
                mem_base: config.memory.base,
                mem_size: config.memory.size,
                state_bytes,
                initialized: false,
                _isa: PhantomData,
            })
        }
    }

    /// Whether the library exports [`symbols::ENDED`].
    pub const fn reports_end(&self) -> bool {
        self.ended_fn.is_some()
    }

    fn has_ended(&self) -> bool {
        // SAFETY: entry point resolved from the open library; takes no arguments.
        self.ended_fn.is_some_and(|ended| unsafe { ended() } != 0)
    }

    fn require_init(&self, op: &'static str) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(DifftestError::contract(op, "an initialized reference", "init was never called"))
        }
    }

    fn check_window(&self, addr: GuestAddr, len: usize) -> Result<I::Word> {
        let inside = addr
            .offset_from(self.mem_base)
            .and_then(|off| off.checked_add(len as u64))
            .is_some_and(|end| end <= self.mem_size as u64);
        if !inside {
            return Err(DifftestError::OutOfRange {
                op: "memcpy",
                addr,
                len: len as u64,
                base: self.mem_base,
                size: self.mem_size as u64,
            });
        }
        I::Word::from_u64(addr.val()).ok_or_else(|| {
            DifftestError::contract(
                "memcpy",
                format!("an address representable as a {} paddr_t", I::NAME),
                format!("{addr}"),
            )
        })
    }
}

impl<I: Isa> RefBackend<I> for DylibBackend<I> {
    fn name(&self) -> &str {
        &self.path
    }

    fn init(&mut self, port: u16) -> Result<()> {
        if self.initialized {
            return Err(DifftestError::contract("init", "a single call per session", "a second call"));
        }
        // SAFETY: entry point resolved from the open library; takes the port by value.
        unsafe { (self.init_fn)(c_int::from(port)) };
        self.initialized = true;
        debug!(port, "reference initialized");
        Ok(())
    }

    fn exec(&mut self, n: u64) -> Result<()> {
        self.require_init("exec")?;
        if self.has_ended() {
            return Err(DifftestError::ReferenceEnded { op: "exec" });
        }
        // SAFETY: entry point resolved from the open library; takes the count by value.
        unsafe { (self.exec_fn)(n) };
        Ok(())
    }

    fn memcpy(&mut self, addr: GuestAddr, buf: &mut [u8], direction: Direction) -> Result<()> {
        self.require_init("memcpy")?;
        let paddr = self.check_window(addr, buf.len())?;
        // SAFETY: `buf` is valid for `buf.len()` bytes of reads and writes for the whole
        // call, and the guest range was checked against the reference's window.
        unsafe {
            (self.memcpy_fn)(
                paddr,
                buf.as_mut_ptr().cast::<c_void>(),
                buf.len(),
                direction.as_abi(),
            );
        }
        Ok(())
    }

    fn regcpy(&mut self, state: &mut ArchState<I>, direction: Direction) -> Result<()> {
        self.require_init("regcpy")?;
        // The reference copies its whole state record, which can be larger than the
        // register file plus PC. A push only replaces the prefix; the tail (CSRs and other
        // private state) is read back first so the reference keeps it.
        let mut raw = vec![0u8; self.state_bytes];
        if direction == Direction::ToRef && self.state_bytes > I::state_bytes() {
            let out = Direction::ToDut.as_abi();
            // SAFETY: `raw` holds `state_bytes` bytes, the size of the reference's record.
            unsafe { (self.regcpy_fn)(raw.as_mut_ptr().cast::<c_void>(), out) };
        }
        if direction == Direction::ToRef {
            state.write_bytes(&mut raw)?;
        }
        // SAFETY: as above.
        unsafe { (self.regcpy_fn)(raw.as_mut_ptr().cast::<c_void>(), direction.as_abi()) };
        if direction == Direction::ToDut {
            state.load_bytes(&raw)?;
        }
        Ok(())
    }

    fn raise_intr(&mut self, code: u64) -> Result<()> {
        self.require_init("raise_intr")?;
        let no = I::Word::from_u64(code).ok_or_else(|| {
            DifftestError::contract(
                "raise_intr",
                format!("an interrupt code representable as a {} word", I::NAME),
                format!("{code:#x}"),
            )
        })?;
        // SAFETY: entry point resolved from the open library; takes the code by value.
        unsafe { (self.raise_intr_fn)(no) };
        Ok(())
    }
}

impl<I: Isa> Drop for DylibBackend<I> {
    fn drop(&mut self) {
        // SAFETY: `handle` is open and no function pointer outlives `self`.
        let _ = unsafe { libc::dlclose(self.handle) };
    }
}

impl<I: Isa> fmt::Debug for DylibBackend<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DylibBackend")
            .field("path", &self.path)
            .field("isa", &I::NAME)
            .field("initialized", &self.initialized)
            .field("reports_end", &self.reports_end())
            .finish_non_exhaustive()
    }
}

fn last_dl_error() -> String {
    // SAFETY: dlerror returns either NULL or a NUL-terminated string owned by libc that
    // stays valid until the next dl* call on this thread; it is copied immediately.
    unsafe {
        let msg = libc::dlerror();
        if msg.is_null() {
            "dlopen failed".to_string()
        } else {
            CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    }
}
