//! # Architectural State Tests
//!
//! Boundary byte layout, register lookup by name and the register dump format.

use difftest_core::{ArchState, Isa, Rv32, Rv64};
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::toy::ToyIsa;

#[test]
fn test_state_bytes_match_cpu_state_prefix() {
    assert_eq!(Rv32::state_bytes(), 33 * 4);
    assert_eq!(Rv64::state_bytes(), 33 * 8);
    assert_eq!(ToyIsa::state_bytes(), 12);
}

#[test]
fn test_to_bytes_is_gprs_then_pc_little_endian() {
    let state = ArchState::<ToyIsa>::from_parts(vec![0x1122_3344, 5], 0x8000_0000).unwrap();
    assert_eq!(
        state.to_bytes(),
        vec![0x44, 0x33, 0x22, 0x11, 5, 0, 0, 0, 0, 0, 0, 0x80]
    );
}

#[test]
fn test_from_bytes_ignores_trailing_record() {
    let mut raw = ArchState::<ToyIsa>::from_parts(vec![7, 9], 0x40).unwrap().to_bytes();
    raw.extend_from_slice(&[0xff; 16]);
    let state = ArchState::<ToyIsa>::from_bytes(&raw).unwrap();
    assert_eq!(state.gprs(), &[7, 9]);
    assert_eq!(state.pc(), 0x40);
}

#[test]
fn test_short_buffer_is_contract_violation() {
    let err = ArchState::<Rv32>::from_bytes(&[0u8; 8]).unwrap_err();
    assert!(err.is_contract_violation());

    let state = ArchState::<Rv32>::new();
    let mut out = [0u8; 4];
    assert!(state.write_bytes(&mut out).unwrap_err().is_contract_violation());
}

#[test]
fn test_write_bytes_leaves_tail_untouched() {
    let state = ArchState::<ToyIsa>::from_parts(vec![1, 2], 3).unwrap();
    let mut out = [0xaau8; 16];
    state.write_bytes(&mut out).unwrap();
    assert_eq!(&out[12..], &[0xaa; 4]);
}

#[test]
fn test_from_parts_rejects_wrong_register_count() {
    let err = ArchState::<ToyIsa>::from_parts(vec![1, 2, 3], 0).unwrap_err();
    assert!(err.to_string().contains("2 registers"));
}

#[rstest]
#[case("sp", Some(0x1000))]
#[case("$sp", Some(0x1000))]
#[case("a0", Some(42))]
#[case("$0", Some(0))]
#[case("pc", Some(0x8000_0004))]
#[case("$pc", Some(0x8000_0004))]
#[case("x99", None)]
fn test_lookup_by_name(#[case] name: &str, #[case] expected: Option<u32>) {
    let mut state = ArchState::<Rv32>::new();
    state.write(2, 0x1000);
    state.write(10, 42);
    state.set_pc(0x8000_0004);
    assert_eq!(state.lookup(name), expected);
}

#[test]
fn test_display_lists_registers_then_pc() {
    let state = ArchState::<ToyIsa>::from_parts(vec![5, u32::MAX], 0x8000_0000).unwrap();
    let dump = state.to_string();
    let lines: Vec<&str> = dump.lines().collect();
    assert_eq!(
        lines,
        vec![
            "      r0 0x00000005 5",
            "      r1 0xffffffff -1",
            "      pc 0x80000000 -2147483648",
        ]
    );
}
