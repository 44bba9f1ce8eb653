//! Shared test infrastructure.

/// Session harness around the toy machines.
pub mod harness;
