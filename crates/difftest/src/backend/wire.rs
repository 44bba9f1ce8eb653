//! Wire codec for out-of-process references.
//!
//! One request is answered by exactly one response; the client never has two requests
//! outstanding. All integers are little-endian.
//!
//! Requests start with an opcode byte:
//!
//! | op | name | body |
//! |----|------|------|
//! | 1 | `INIT` | `port:u16`, `name_len:u8`, `name`, `gpr_count:u16`, `word_bytes:u8` |
//! | 2 | `EXEC` | `n:u64` |
//! | 3 | `MEMCPY` | `dir:u8`, `addr:u64`, `len:u64`, `len` bytes when `dir` is ToRef |
//! | 4 | `REGCPY` | `dir:u8`, `len:u64`, `len` bytes when `dir` is ToRef |
//! | 5 | `RAISE_INTR` | `code:u64` |
//!
//! Responses start with a status byte. `0` is followed by `len:u64` and the payload (the
//! copied bytes for ToDut transfers, empty otherwise). Any other status is followed by
//! `len:u32` and a UTF-8 message.

use std::io::{self, Read, Write};

use super::Direction;
use crate::common::constants::MAX_WIRE_TRANSFER;
use crate::common::{DifftestError, GuestAddr, Result};
use crate::isa::{Isa, Word};

const OP_INIT: u8 = 1;
const OP_EXEC: u8 = 2;
const OP_MEMCPY: u8 = 3;
const OP_REGCPY: u8 = 4;
const OP_RAISE_INTR: u8 = 5;

/// Shape of the ISA a client expects; checked by the server at `INIT`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsaDescriptor {
    /// [`Isa::NAME`].
    pub name: String,
    /// [`Isa::GPR_COUNT`].
    pub gpr_count: u16,
    /// Register width in bytes.
    pub word_bytes: u8,
}

impl IsaDescriptor {
    /// Describes `I`.
    pub fn of<I: Isa>() -> Self {
        Self {
            name: I::NAME.to_string(),
            gpr_count: I::GPR_COUNT as u16,
            word_bytes: <I::Word as Word>::BYTES as u8,
        }
    }
}

/// A decoded request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// `init(port)` plus the ISA handshake.
    Init {
        /// Control channel value forwarded to the backend.
        port: u16,
        /// ISA the client was built for.
        isa: IsaDescriptor,
    },
    /// `exec(n)`.
    Exec {
        /// Instruction count.
        n: u64,
    },
    /// `memcpy(addr, buf, direction)`.
    Memcpy {
        /// Copy direction.
        direction: Direction,
        /// Guest address.
        addr: GuestAddr,
        /// Byte count.
        len: u64,
        /// Source bytes for ToRef; empty for ToDut.
        data: Vec<u8>,
    },
    /// `regcpy(state, direction)`.
    Regcpy {
        /// Copy direction.
        direction: Direction,
        /// State in the boundary layout for ToRef; empty for ToDut.
        state: Vec<u8>,
    },
    /// `raise_intr(code)`.
    RaiseIntr {
        /// Opaque interrupt code.
        code: u64,
    },
}

impl Request {
    /// Name of the backend operation this request carries.
    pub const fn op(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Exec { .. } => "exec",
            Self::Memcpy { .. } => "memcpy",
            Self::Regcpy { .. } => "regcpy",
            Self::RaiseIntr { .. } => "raise_intr",
        }
    }
}

/// Response status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Success; a payload follows.
    Ok = 0,
    /// The request broke the backend contract.
    ContractViolation = 1,
    /// The reference already ended.
    ReferenceEnded = 2,
    /// Any other backend failure.
    BackendError = 3,
}

impl Status {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Ok),
            1 => Ok(Self::ContractViolation),
            2 => Ok(Self::ReferenceEnded),
            3 => Ok(Self::BackendError),
            other => Err(DifftestError::contract("response", "status 0..=3", format!("{other}"))),
        }
    }

    /// Classifies a backend error for the wire.
    pub const fn of_error(err: &DifftestError) -> Self {
        if err.is_reference_ended() {
            Self::ReferenceEnded
        } else if err.is_contract_violation() {
            Self::ContractViolation
        } else {
            Self::BackendError
        }
    }
}

/// Writes a request.
///
/// # Errors
///
/// Propagates I/O failures.
pub fn write_request<W: Write>(w: &mut W, req: &Request) -> io::Result<()> {
    match req {
        Request::Init { port, isa } => {
            let name = isa.name.as_bytes();
            let name_len = u8::try_from(name.len())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "ISA name too long"))?;
            w.write_all(&[OP_INIT])?;
            w.write_all(&port.to_le_bytes())?;
            w.write_all(&[name_len])?;
            w.write_all(name)?;
            w.write_all(&isa.gpr_count.to_le_bytes())?;
            w.write_all(&[isa.word_bytes])?;
        }
        Request::Exec { n } => {
            w.write_all(&[OP_EXEC])?;
            w.write_all(&n.to_le_bytes())?;
        }
        Request::Memcpy {
            direction,
            addr,
            len,
            data,
        } => {
            w.write_all(&[OP_MEMCPY, direction.to_wire()])?;
            w.write_all(&addr.val().to_le_bytes())?;
            w.write_all(&len.to_le_bytes())?;
            if *direction == Direction::ToRef {
                w.write_all(data)?;
            }
        }
        Request::Regcpy { direction, state } => {
            w.write_all(&[OP_REGCPY, direction.to_wire()])?;
            w.write_all(&(state.len() as u64).to_le_bytes())?;
            w.write_all(state)?;
        }
        Request::RaiseIntr { code } => {
            w.write_all(&[OP_RAISE_INTR])?;
            w.write_all(&code.to_le_bytes())?;
        }
    }
    w.flush()
}

/// Reads the next request; `Ok(None)` on a clean end of stream.
///
/// # Errors
///
/// An unknown opcode, an invalid direction byte or an oversized transfer is a contract
/// violation; truncated frames are I/O errors.
pub fn read_request<R: Read>(r: &mut R) -> Result<Option<Request>> {
    let mut op = [0u8; 1];
    match r.read_exact(&mut op) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let req = match op[0] {
        OP_INIT => {
            let port = u16::from_le_bytes(read_array(r)?);
            let [name_len] = read_array::<_, 1>(r)?;
            let name = read_vec(r, name_len as u64, "init")?;
            let name = String::from_utf8(name)
                .map_err(|_| DifftestError::contract("init", "a UTF-8 ISA name", "invalid UTF-8"))?;
            let gpr_count = u16::from_le_bytes(read_array(r)?);
            let [word_bytes] = read_array::<_, 1>(r)?;
            Request::Init {
                port,
                isa: IsaDescriptor {
                    name,
                    gpr_count,
                    word_bytes,
                },
            }
        }
        OP_EXEC => Request::Exec {
            n: u64::from_le_bytes(read_array(r)?),
        },
        OP_MEMCPY => {
            let [dir] = read_array::<_, 1>(r)?;
            let direction = Direction::from_wire(dir)?;
            let addr = GuestAddr(u64::from_le_bytes(read_array(r)?));
            let len = u64::from_le_bytes(read_array(r)?);
            check_transfer("memcpy", len)?;
            let data = match direction {
                Direction::ToRef => read_vec(r, len, "memcpy")?,
                Direction::ToDut => Vec::new(),
            };
            Request::Memcpy {
                direction,
                addr,
                len,
                data,
            }
        }
        OP_REGCPY => {
            let [dir] = read_array::<_, 1>(r)?;
            let direction = Direction::from_wire(dir)?;
            let len = u64::from_le_bytes(read_array(r)?);
            let state = read_vec(r, len, "regcpy")?;
            Request::Regcpy { direction, state }
        }
        OP_RAISE_INTR => Request::RaiseIntr {
            code: u64::from_le_bytes(read_array(r)?),
        },
        other => {
            return Err(DifftestError::contract(
                "request",
                "opcode 1..=5",
                format!("{other}"),
            ));
        }
    };
    Ok(Some(req))
}

/// Writes a success response carrying `payload`.
///
/// # Errors
///
/// Propagates I/O failures.
pub fn write_ok<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    w.write_all(&[Status::Ok as u8])?;
    w.write_all(&(payload.len() as u64).to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

/// Writes a failure response for `err`.
///
/// # Errors
///
/// Propagates I/O failures.
pub fn write_error<W: Write>(w: &mut W, err: &DifftestError) -> io::Result<()> {
    let msg = err.to_string();
    let bytes = msg.as_bytes();
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    w.write_all(&[Status::of_error(err) as u8])?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&bytes[..len as usize])?;
    w.flush()
}

/// Reads a response to a request for `op`, returning the success payload.
///
/// Failure responses are turned back into the matching [`DifftestError`].
///
/// # Errors
///
/// The remote failure, or a transport error.
pub fn read_response<R: Read>(r: &mut R, op: &'static str) -> Result<Vec<u8>> {
    let [status] = read_array::<_, 1>(r)?;
    match Status::from_byte(status)? {
        Status::Ok => {
            let len = u64::from_le_bytes(read_array(r)?);
            read_vec(r, len, op)
        }
        failure => {
            let len = u32::from_le_bytes(read_array(r)?);
            let msg = read_vec(r, len as u64, op)?;
            let msg = String::from_utf8_lossy(&msg).into_owned();
            Err(match failure {
                Status::ReferenceEnded => DifftestError::ReferenceEnded { op },
                Status::ContractViolation => {
                    DifftestError::contract(op, "a request the reference accepts", msg)
                }
                _ => DifftestError::Remote(msg),
            })
        }
    }
}

fn check_transfer(op: &'static str, len: u64) -> Result<()> {
    if len > MAX_WIRE_TRANSFER {
        return Err(DifftestError::contract(
            op,
            format!("a transfer of at most {MAX_WIRE_TRANSFER:#x} bytes"),
            format!("{len:#x} bytes"),
        ));
    }
    Ok(())
}

fn read_array<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_vec<R: Read>(r: &mut R, len: u64, op: &'static str) -> Result<Vec<u8>> {
    check_transfer(op, len)?;
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
