//! Store configuration.
//!
//! Loaded from TOML. Every table and key is optional; unknown keys are
//! rejected so a misspelled setting fails loudly.
//!
//! ```toml
//! [buffer]
//! initial_capacity = 512
//!
//! [cache]
//! retain_version_lists = true
//!
//! [write]
//! max_attempts = 16
//! ```

use crate::error::ChronicleError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    /// Bytes reserved before a flush or merge starts writing.
    pub initial_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Keep materialized version lists between reads.
    pub retain_version_lists: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retain_version_lists: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriteConfig {
    /// Bound on read, merge and compare-and-write rounds per chronicle.
    pub max_attempts: u32,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self { max_attempts: 16 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub buffer: BufferConfig,
    pub cache: CacheConfig,
    pub write: WriteConfig,
}

impl StoreConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ChronicleError> {
        Self::parse(text, "<inline>")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ChronicleError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ChronicleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    fn parse(text: &str, origin: &str) -> Result<Self, ChronicleError> {
        let config: StoreConfig =
            toml::from_str(text).map_err(|source| ChronicleError::ParseToml {
                path: origin.to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChronicleError> {
        if self.buffer.initial_capacity == 0 {
            return Err(ChronicleError::Config(
                "buffer.initial_capacity must be greater than zero".to_string(),
            ));
        }
        if self.write.max_attempts == 0 {
            return Err(ChronicleError::Config(
                "write.max_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
