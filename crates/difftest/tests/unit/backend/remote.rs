//! # Remote Backend Tests
//!
//! The TCP client talks to the in-process server over loopback; every call must behave
//! as it would against the toy reference directly.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};

use difftest_core::backend::{RemoteBackend, server};
use difftest_core::{
    ArchState, DifftestError, Direction, GuestAddr, HaltReason, MismatchKind, RefBackend, Result,
    Rv32, Session,
};
use pretty_assertions::assert_eq;

use crate::common::harness::{init_tracing, toy_config};
use crate::common::toy::{STORE_ADDR, TOY_BASE, ToyDut, ToyIsa, ToyReference, VECTOR_BASE};

/// Serves one connection with a reference built by `make` on a free port.
fn spawn_server<F>(make: F) -> (SocketAddr, JoinHandle<Result<()>>)
where
    F: FnMut() -> Result<ToyReference> + Send + 'static,
{
    init_tracing();
    let listener = server::bind(0).unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || server::serve::<ToyIsa, _, _>(&listener, make, Some(1)));
    (addr, handle)
}

#[test]
fn test_round_trip_matches_in_process_reference() {
    let (addr, server) = spawn_server(|| Ok(ToyReference::default()));
    let mut remote = RemoteBackend::<ToyIsa>::connect(addr).unwrap();
    remote.init(1234).unwrap();

    let mut image = vec![0xde, 0xad, 0xbe, 0xef];
    remote
        .memcpy(GuestAddr(TOY_BASE), &mut image, Direction::ToRef)
        .unwrap();
    let mut back = vec![0u8; 4];
    remote
        .memcpy(GuestAddr(TOY_BASE), &mut back, Direction::ToDut)
        .unwrap();
    assert_eq!(back, image);

    let mut regs = ArchState::<ToyIsa>::from_parts(vec![2, 10], 0x8000_0000).unwrap();
    remote.regcpy(&mut regs, Direction::ToRef).unwrap();
    remote.exec(3).unwrap();
    let mut pulled = ArchState::<ToyIsa>::new();
    remote.regcpy(&mut pulled, Direction::ToDut).unwrap();
    assert_eq!(pulled.gprs(), &[2, 16]);
    assert_eq!(pulled.pc(), 0x8000_000c);

    remote.raise_intr(3).unwrap();
    remote.regcpy(&mut pulled, Direction::ToDut).unwrap();
    assert_eq!(pulled.pc(), VECTOR_BASE + 12);

    drop(remote);
    server.join().unwrap().unwrap();
}

#[test]
fn test_out_of_range_memcpy_reports_contract_violation() {
    let (addr, server) = spawn_server(|| Ok(ToyReference::default()));
    let mut remote = RemoteBackend::<ToyIsa>::connect(addr).unwrap();
    remote.init(1234).unwrap();

    let mut buf = [0u8; 8];
    let err = remote
        .memcpy(GuestAddr(0x1000), &mut buf, Direction::ToDut)
        .unwrap_err();
    assert!(err.is_contract_violation(), "{err}");

    // The connection stays usable after a backend-level failure.
    remote.exec(1).unwrap();
    drop(remote);
    server.join().unwrap().unwrap();
}

#[test]
fn test_reference_ended_crosses_the_wire() {
    let (addr, server) = spawn_server(|| {
        Ok(ToyReference {
            end_after: Some(2),
            ..ToyReference::default()
        })
    });
    let mut remote = RemoteBackend::<ToyIsa>::connect(addr).unwrap();
    remote.init(1234).unwrap();
    remote.exec(2).unwrap();

    let err = remote.exec(1).unwrap_err();
    assert!(matches!(err, DifftestError::ReferenceEnded { op: "exec" }));
    drop(remote);
    server.join().unwrap().unwrap();
}

#[test]
fn test_request_before_init_closes_connection() {
    let (addr, server) = spawn_server(|| Ok(ToyReference::default()));
    let mut remote = RemoteBackend::<ToyIsa>::connect(addr).unwrap();

    let err = remote.exec(1).unwrap_err();
    assert!(err.is_contract_violation());
    drop(remote);
    server.join().unwrap().unwrap();
}

#[test]
fn test_isa_mismatch_fails_handshake() {
    let (addr, server) = spawn_server(|| Ok(ToyReference::default()));
    let mut remote = RemoteBackend::<Rv32>::connect(addr).unwrap();

    let err = remote.init(1234).unwrap_err();
    assert!(err.is_contract_violation());
    assert!(err.to_string().contains("toy"), "{err}");
    drop(remote);
    server.join().unwrap().unwrap();
}

#[test]
fn test_invalid_direction_byte_gets_contract_reply() {
    let (addr, server) = spawn_server(|| Ok(ToyReference::default()));
    let mut stream = TcpStream::connect(addr).unwrap();

    // INIT for the toy ISA, then a MEMCPY carrying direction byte 7.
    let mut frame = vec![1u8];
    frame.extend_from_slice(&1234u16.to_le_bytes());
    frame.push(3);
    frame.extend_from_slice(b"toy");
    frame.extend_from_slice(&2u16.to_le_bytes());
    frame.push(4);
    frame.extend_from_slice(&[3, 7]);
    stream.write_all(&frame).unwrap();

    let mut reply = Vec::new();
    let _ = stream.read_to_end(&mut reply).unwrap();
    // OK for INIT: status 0 and an empty payload.
    assert_eq!(&reply[..9], &[0u8; 9]);
    assert_eq!(reply[9], 1, "contract violation status");
    let msg = String::from_utf8_lossy(&reply[14..]);
    assert!(msg.contains("direction"), "{msg}");

    server.join().unwrap().unwrap();
}

#[test]
fn test_session_over_tcp_reports_same_divergence() {
    let (addr, server) = spawn_server(|| Ok(ToyReference::default()));
    let remote = RemoteBackend::<ToyIsa>::connect(addr).unwrap();
    let mut dut = ToyDut::default();
    dut.machine.fault_at = Some(5);
    dut.machine.store_results = true;

    let mut session = Session::new(toy_config(2), dut, remote).unwrap();
    let _ = session.start().unwrap();
    let state = session.run(Some(100)).unwrap().clone();

    let report = state.divergence().unwrap();
    assert_eq!(report.kind, MismatchKind::Register(1));
    assert_eq!(report.expected, 6);
    assert_eq!(report.actual, 7);
    assert_eq!(report.instruction_index, 6);
    assert!(matches!(state.halt_reason(), Some(HaltReason::Diverged(_))));

    let mut stored = [0u8; 4];
    session
        .dut_mut()
        .machine
        .memory
        .read(GuestAddr(STORE_ADDR), &mut stored)
        .unwrap();
    assert_eq!(u32::from_le_bytes(stored), 7);

    drop(session);
    server.join().unwrap().unwrap();
}
