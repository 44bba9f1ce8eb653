//! Configuration for a difftest session.
//!
//! This module defines the configuration structures used to set up a session. It provides:
//! 1. **Defaults:** Channel port, built-in image size, guest memory window, batch size.
//! 2. **Structures:** Reference, memory and stepping sections, deserialized from JSON.
//! 3. **Validation:** Cross-field checks run before a session starts.
//!
//! Every field has a default, so `{}` is a valid configuration and `Config::default()`
//! matches what deserializing it produces.

use serde::{Deserialize, Serialize};

use crate::backend::BackendLocator;
use crate::common::{DifftestError, GuestAddr, Result};

/// Default configuration values.
mod defaults {
    use crate::common::constants;

    /// Control channel handed to the reference's `init`.
    pub const PORT: u16 = constants::DEFAULT_PORT;

    /// Image size when no image file is given (the built-in image).
    pub const IMAGE_SIZE: usize = constants::BUILTIN_IMAGE_SIZE;

    /// Guest memory base; the image is loaded here.
    pub const MEM_BASE: u64 = constants::DEFAULT_MEM_BASE;

    /// Guest memory size.
    pub const MEM_SIZE: usize = constants::DEFAULT_MEM_SIZE;

    /// Instructions per lockstep batch.
    pub const BATCH_SIZE: u64 = 1;
}

/// Root configuration of a session.
///
/// ```
/// use difftest_core::GuestAddr;
/// use difftest_core::config::DifftestConfig;
///
/// let json = r#"{
///     "reference": { "locator": "tcp://127.0.0.1:4000", "port": 4000 },
///     "memory": { "image_size": 8192 },
///     "stepping": { "batch_size": 64, "max_instructions": 1000000 }
/// }"#;
///
/// let config = DifftestConfig::from_json(json).unwrap();
/// assert_eq!(config.reference.port, 4000);
/// assert_eq!(config.memory.base, GuestAddr(0x8000_0000));
/// assert_eq!(config.stepping.batch_size, 64);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DifftestConfig {
    /// Reference backend selection.
    #[serde(default)]
    pub reference: ReferenceConfig,
    /// Guest memory window and initial image.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Lockstep batch parameters.
    #[serde(default)]
    pub stepping: SteppingConfig,
}

impl DifftestConfig {
    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::Json`] for malformed input.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.stepping.batch_size == 0 {
            return Err(DifftestError::Config("batch_size must be at least 1".into()));
        }
        if self.memory.size == 0 {
            return Err(DifftestError::Config("memory.size must be non-zero".into()));
        }
        if self.memory.base.checked_add(self.memory.size as u64).is_none() {
            return Err(DifftestError::Config(format!(
                "memory window {}+{:#x} wraps the address space",
                self.memory.base, self.memory.size
            )));
        }
        if let Some(locator) = &self.reference.locator {
            let _ = locator.parse::<BackendLocator>()?;
        }
        Ok(())
    }

    /// Parses the reference locator, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::Config`] for a malformed locator.
    pub fn reference_locator(&self) -> Result<Option<BackendLocator>> {
        self.reference
            .locator
            .as_deref()
            .map(str::parse)
            .transpose()
    }
}

/// Reference backend selection and ABI details.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReferenceConfig {
    /// Shared library path or `tcp://host:port`.
    #[serde(default)]
    pub locator: Option<String>,

    /// Control channel handed to `init`.
    #[serde(default = "ReferenceConfig::default_port")]
    pub port: u16,

    /// Size of the reference's exported state record when it is larger than the register
    /// file plus PC (e.g. CSRs follow the PC). `None` means exactly register file plus PC.
    #[serde(default)]
    pub state_bytes: Option<usize>,
}

impl ReferenceConfig {
    const fn default_port() -> u16 {
        defaults::PORT
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            locator: None,
            port: defaults::PORT,
            state_bytes: None,
        }
    }
}

/// Guest memory window.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MemoryConfig {
    /// First guest physical address; also where the image is loaded.
    #[serde(default = "MemoryConfig::default_base")]
    pub base: GuestAddr,

    /// Window size in bytes.
    #[serde(default = "MemoryConfig::default_size")]
    pub size: usize,

    /// Bytes of the initial image mirrored into the reference at session start.
    #[serde(default = "MemoryConfig::default_image_size")]
    pub image_size: usize,
}

impl MemoryConfig {
    const fn default_base() -> GuestAddr {
        GuestAddr(defaults::MEM_BASE)
    }

    const fn default_size() -> usize {
        defaults::MEM_SIZE
    }

    const fn default_image_size() -> usize {
        defaults::IMAGE_SIZE
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base: GuestAddr(defaults::MEM_BASE),
            size: defaults::MEM_SIZE,
            image_size: defaults::IMAGE_SIZE,
        }
    }
}

/// Lockstep batch parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SteppingConfig {
    /// Instructions executed by each machine between comparisons.
    #[serde(default = "SteppingConfig::default_batch_size")]
    pub batch_size: u64,

    /// Stop after this many instructions; `None` runs until a halt.
    #[serde(default)]
    pub max_instructions: Option<u64>,
}

impl SteppingConfig {
    const fn default_batch_size() -> u64 {
        defaults::BATCH_SIZE
    }
}

impl Default for SteppingConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            max_instructions: None,
        }
    }
}
