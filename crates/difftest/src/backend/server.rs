//! TCP server exposing an in-process reference.
//!
//! Connections are served one at a time and each gets a fresh backend from the caller's
//! factory, so one connection is one session: a single `INIT` followed by any number of
//! stepping and copy requests.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, error, info, trace, warn};

use super::wire::{self, IsaDescriptor, Request};
use super::{Direction, RefBackend};
use crate::common::{ArchState, DifftestError, Result};
use crate::isa::Isa;

/// Binds `127.0.0.1:port`.
///
/// # Errors
///
/// Propagates the bind failure.
pub fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)?;
    info!("reference server listening on {:?}", listener.local_addr()?);
    Ok(listener)
}

/// Accepts connections and serves each with a backend from `make_backend`.
///
/// Returns after `max_sessions` connections if given, otherwise only on an accept error.
///
/// # Errors
///
/// Propagates accept failures and factory failures. Errors inside a session are logged
/// and end that session only.
pub fn serve<I, B, F>(listener: &TcpListener, mut make_backend: F, max_sessions: Option<usize>) -> Result<()>
where
    I: Isa,
    B: RefBackend<I>,
    F: FnMut() -> Result<B>,
{
    let mut served = 0usize;
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                error!("failed to accept connection: {e:?}");
                return Err(e.into());
            }
        };
        trace!("accepted connection");
        let mut backend = make_backend()?;
        let result = serve_connection::<I, B>(stream, &mut backend);
        match &result {
            Ok(()) => debug!("connection closed"),
            Err(e) => warn!("connection ended with error: {e}"),
        }
        served += 1;
        if max_sessions.is_some_and(|max| served >= max) {
            break;
        }
    }
    Ok(())
}

/// Serves one connection until the client closes it.
///
/// # Errors
///
/// A malformed frame (unknown opcode, invalid direction byte, oversized transfer) or a
/// handshake mismatch is answered with a contract-violation response and then returned,
/// closing the connection. Backend failures are answered and serving continues.
pub fn serve_connection<I: Isa, B: RefBackend<I>>(stream: TcpStream, backend: &mut B) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    let mut initialized = false;

    loop {
        let req = match wire::read_request(&mut reader) {
            Ok(Some(req)) => req,
            Ok(None) => return Ok(()),
            Err(e) => {
                if e.is_contract_violation() {
                    wire::write_error(&mut writer, &e)?;
                }
                return Err(e);
            }
        };

        if let Request::Init { isa, .. } = &req {
            let expected = IsaDescriptor::of::<I>();
            if *isa != expected {
                let err = DifftestError::contract(
                    "init",
                    format!("{} with {} x {}-byte registers", expected.name, expected.gpr_count, expected.word_bytes),
                    format!("{} with {} x {}-byte registers", isa.name, isa.gpr_count, isa.word_bytes),
                );
                wire::write_error(&mut writer, &err)?;
                return Err(err);
            }
        } else if !initialized {
            let err = DifftestError::contract(req.op(), "INIT as the first request", req.op());
            wire::write_error(&mut writer, &err)?;
            return Err(err);
        }

        let op = req.op();
        let is_init = matches!(req, Request::Init { .. });
        match dispatch(backend, req) {
            Ok(payload) => {
                if is_init {
                    initialized = true;
                }
                wire::write_ok(&mut writer, &payload)?;
            }
            Err(e) => {
                warn!(op, "reference request failed: {e}");
                wire::write_error(&mut writer, &e)?;
            }
        }
    }
}

fn dispatch<I: Isa, B: RefBackend<I>>(backend: &mut B, req: Request) -> Result<Vec<u8>> {
    match req {
        Request::Init { port, .. } => {
            backend.init(port)?;
            Ok(Vec::new())
        }
        Request::Exec { n } => {
            backend.exec(n)?;
            Ok(Vec::new())
        }
        Request::Memcpy {
            direction: Direction::ToRef,
            addr,
            mut data,
            ..
        } => {
            backend.memcpy(addr, &mut data, Direction::ToRef)?;
            Ok(Vec::new())
        }
        Request::Memcpy {
            direction: Direction::ToDut,
            addr,
            len,
            ..
        } => {
            let mut buf = vec![0u8; len as usize];
            backend.memcpy(addr, &mut buf, Direction::ToDut)?;
            Ok(buf)
        }
        Request::Regcpy {
            direction: Direction::ToRef,
            state,
        } => {
            if state.len() != I::state_bytes() {
                return Err(DifftestError::contract(
                    "regcpy",
                    format!("{} bytes of {} state", I::state_bytes(), I::NAME),
                    format!("{} bytes", state.len()),
                ));
            }
            let mut regs = ArchState::<I>::from_bytes(&state)?;
            backend.regcpy(&mut regs, Direction::ToRef)?;
            Ok(Vec::new())
        }
        Request::Regcpy {
            direction: Direction::ToDut,
            ..
        } => {
            let mut regs = ArchState::<I>::new();
            backend.regcpy(&mut regs, Direction::ToDut)?;
            Ok(regs.to_bytes())
        }
        Request::RaiseIntr { code } => {
            backend.raise_intr(code)?;
            Ok(Vec::new())
        }
    }
}
