//! # Direction and Locator Tests

use std::net::SocketAddr;
use std::path::PathBuf;

use difftest_core::backend::BackendLocator;
use difftest_core::common::constants::{DIFFTEST_TO_DUT, DIFFTEST_TO_REF};
use difftest_core::{DifftestError, Direction};
use rstest::rstest;

#[test]
fn test_abi_values_match_c_header() {
    assert_eq!(Direction::ToDut.as_abi(), DIFFTEST_TO_DUT);
    assert_eq!(Direction::ToRef.as_abi(), DIFFTEST_TO_REF);
    assert!(!DIFFTEST_TO_DUT);
    assert!(DIFFTEST_TO_REF);
}

#[test]
fn test_wire_byte_decodes() {
    assert_eq!(Direction::from_wire(0).unwrap(), Direction::ToDut);
    assert_eq!(Direction::from_wire(1).unwrap(), Direction::ToRef);
    assert_eq!(Direction::ToRef.inverse(), Direction::ToDut);
}

#[rstest]
#[case(2)]
#[case(0x80)]
#[case(0xff)]
fn test_invalid_wire_byte_is_contract_violation(#[case] byte: u8) {
    let err = Direction::from_wire(byte).unwrap_err();
    assert!(matches!(err, DifftestError::ContractViolation { op: "direction", .. }));
    assert!(err.to_string().contains(&byte.to_string()));
}

#[test]
fn test_locator_parses_tcp_and_paths() {
    let remote: BackendLocator = "tcp://127.0.0.1:1234".parse().unwrap();
    let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();
    assert_eq!(remote, BackendLocator::Remote(addr));
    assert_eq!(remote.to_string(), "tcp://127.0.0.1:1234");

    let lib: BackendLocator = "build/riscv32-nemu-interpreter-so".parse().unwrap();
    assert_eq!(
        lib,
        BackendLocator::Library(PathBuf::from("build/riscv32-nemu-interpreter-so"))
    );
}

#[rstest]
#[case("")]
#[case("tcp://localhost")]
#[case("tcp://127.0.0.1:notaport")]
fn test_bad_locator_is_config_error(#[case] text: &str) {
    let err = text.parse::<BackendLocator>().unwrap_err();
    assert!(matches!(err, DifftestError::Config(_)));
}
