//! # Configuration Tests
//!
//! Defaults, JSON overrides and cross-field validation.

use difftest_core::backend::BackendLocator;
use difftest_core::{DifftestConfig, DifftestError, GuestAddr};
use pretty_assertions::assert_eq;
use rstest::rstest;

#[test]
fn test_empty_json_matches_default() {
    let config = DifftestConfig::from_json("{}").unwrap();
    assert_eq!(config, DifftestConfig::default());
    assert_eq!(config.reference.port, 1234);
    assert_eq!(config.reference.locator, None);
    assert_eq!(config.memory.image_size, 4096);
    assert_eq!(config.memory.base, GuestAddr(0x8000_0000));
    assert_eq!(config.memory.size, 128 * 1024 * 1024);
    assert_eq!(config.stepping.batch_size, 1);
    assert_eq!(config.stepping.max_instructions, None);
    config.validate().unwrap();
}

#[test]
fn test_partial_sections_keep_other_defaults() {
    let config = DifftestConfig::from_json(
        r#"{ "reference": { "locator": "tcp://127.0.0.1:9000" }, "stepping": { "batch_size": 32 } }"#,
    )
    .unwrap();
    assert_eq!(config.reference.port, 1234);
    assert_eq!(config.stepping.batch_size, 32);
    assert_eq!(
        config.reference_locator().unwrap(),
        Some(BackendLocator::Remote("127.0.0.1:9000".parse().unwrap()))
    );
}

#[test]
fn test_malformed_json_is_json_error() {
    let err = DifftestConfig::from_json("{ \"stepping\": ").unwrap_err();
    assert!(matches!(err, DifftestError::Json(_)));
    assert!(err.to_string().starts_with("JSON error: "), "{err}");
}

#[rstest]
#[case::zero_batch(r#"{ "stepping": { "batch_size": 0 } }"#, "batch_size")]
#[case::empty_memory(r#"{ "memory": { "size": 0 } }"#, "memory.size")]
#[case::wrapping_window(r#"{ "memory": { "base": 18446744073709547520, "size": 8192 } }"#, "wraps")]
#[case::bad_locator(r#"{ "reference": { "locator": "tcp://nowhere" } }"#, "reference address")]
fn test_validate_rejects(#[case] json: &str, #[case] needle: &str) {
    let config = DifftestConfig::from_json(json).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains(needle), "{err}");
}

#[test]
fn test_round_trips_through_json() {
    let mut config = DifftestConfig::default();
    config.reference.state_bytes = Some(4096);
    config.stepping.max_instructions = Some(10);
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(DifftestConfig::from_json(&json).unwrap(), config);
}
