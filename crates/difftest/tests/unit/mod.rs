//! # Unit Components
//!
//! Tests grouped by the library module they exercise.

/// Architectural state layout, register names and dumps.
pub mod arch_state;



/// Configuration defaults, JSON parsing and validation.
pub mod config;


/// Guest memory translation and dirty tracking.
pub mod memory;

/// Property tests over synchronization and comparison.
pub mod properties;


/// ELF function symbols.
pub mod symbols;
