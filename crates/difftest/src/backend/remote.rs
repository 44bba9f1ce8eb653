//! Reference backend reached over TCP.
//!
//! Each trait call becomes one request/response exchange on a single connection, so the
//! synchronous discipline of an in-process backend carries over unchanged.

use std::fmt;
use std::io::{BufReader, BufWriter};
use std::marker::PhantomData;
use std::net::{SocketAddr, TcpStream};

use tracing::{debug, info};

use super::wire::{self, IsaDescriptor, Request};
use super::{Direction, RefBackend};
use crate::common::{ArchState, DifftestError, GuestAddr, Result};
use crate::isa::Isa;

/// Client side of the wire protocol.
pub struct RemoteBackend<I: Isa> {
    name: String,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    _isa: PhantomData<I>,
}

impl<I: Isa> RemoteBackend<I> {
    /// Connects to a reference server.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::BackendUnavailable`] if the connection is refused.
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let name = format!("tcp://{addr}");
        let stream =
            TcpStream::connect(addr).map_err(|e| DifftestError::unavailable(&name, e.to_string()))?;
        Self::from_stream(stream, name)
    }

    /// Wraps an already connected stream.
    ///
    /// # Errors
    ///
    /// Fails if the stream cannot be cloned for separate buffered halves.
    pub fn from_stream(stream: TcpStream, name: String) -> Result<Self> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        info!(peer = %name, isa = I::NAME, "connected to remote reference");
        Ok(Self {
            name,
            reader,
            writer: BufWriter::new(stream),
            _isa: PhantomData,
        })
    }

    fn call(&mut self, req: &Request) -> Result<Vec<u8>> {
        wire::write_request(&mut self.writer, req)?;
        wire::read_response(&mut self.reader, req.op())
    }
}

impl<I: Isa> RefBackend<I> for RemoteBackend<I> {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, port: u16) -> Result<()> {
        let _ = self.call(&Request::Init {
            port,
            isa: IsaDescriptor::of::<I>(),
        })?;
        debug!(port, "remote reference initialized");
        Ok(())
    }

    fn exec(&mut self, n: u64) -> Result<()> {
        let _ = self.call(&Request::Exec { n })?;
        Ok(())
    }

    fn memcpy(&mut self, addr: GuestAddr, buf: &mut [u8], direction: Direction) -> Result<()> {
        let data = match direction {
            Direction::ToRef => buf.to_vec(),
            Direction::ToDut => Vec::new(),
        };
        let payload = self.call(&Request::Memcpy {
            direction,
            addr,
            len: buf.len() as u64,
            data,
        })?;
        if direction == Direction::ToDut {
            if payload.len() != buf.len() {
                return Err(DifftestError::contract(
                    "memcpy",
                    format!("{} bytes from the reference", buf.len()),
                    format!("{} bytes", payload.len()),
                ));
            }
            buf.copy_from_slice(&payload);
        }
        Ok(())
    }

    fn regcpy(&mut self, state: &mut ArchState<I>, direction: Direction) -> Result<()> {
        let sent = match direction {
            Direction::ToRef => state.to_bytes(),
            Direction::ToDut => Vec::new(),
        };
        let payload = self.call(&Request::Regcpy {
            direction,
            state: sent,
        })?;
        if direction == Direction::ToDut {
            state.load_bytes(&payload)?;
        }
        Ok(())
    }

    fn raise_intr(&mut self, code: u64) -> Result<()> {
        let _ = self.call(&Request::RaiseIntr { code })?;
        Ok(())
    }
}

impl<I: Isa> fmt::Debug for RemoteBackend<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("name", &self.name)
            .field("isa", &I::NAME)
            .finish_non_exhaustive()
    }
}
