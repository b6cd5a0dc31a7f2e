// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator and client configuration
//!
//! Both are plain serde structs; every field has a default so a partial
//! `rwgate.toml` is enough.

use crate::id::WorkerId;
use crate::protocol::{Topics, DEFAULT_PREFIX};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File name looked up in a project root
pub const CONFIG_FILE: &str = "rwgate.toml";

/// Default endpoint id of the coordinator
pub const DEFAULT_COORDINATOR_ID: &str = "coordinator";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Prefix of every topic
    pub prefix: String,
    /// Endpoint id workers address requests to
    pub coordinator_id: String,
    /// Concurrent reads per resource (0 = unbounded)
    pub max_concurrent_reads: u32,
    /// Slots of the `thread` action class (0 = unbounded)
    pub max_threads: u32,
    /// Directory relative names are resolved against; the working directory when unset
    pub base_dir: Option<PathBuf>,
    /// Extension for generated names when a request gives none
    pub default_extension: Option<String>,
    /// Generation attempts before a request is answered NAME_EXHAUSTED
    pub max_name_attempts: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            coordinator_id: DEFAULT_COORDINATOR_ID.to_string(),
            max_concurrent_reads: 0,
            max_threads: default_max_threads(),
            base_dir: None,
            default_extension: None,
            max_name_attempts: 64,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_toml(&content)
    }

    /// Load `rwgate.toml` from `dir`, or defaults when the file is absent
    ///
    /// A relative `base_dir` in the file is taken relative to `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        config.base_dir = Some(match config.base_dir.take() {
            Some(base) if base.is_relative() => dir.join(base),
            Some(base) => base,
            None => dir.to_path_buf(),
        });
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() || self.prefix.contains(':') {
            return Err(ConfigError::Invalid(format!(
                "prefix must be non-empty and contain no ':' (got {:?})",
                self.prefix
            )));
        }
        if self.coordinator_id.is_empty() {
            return Err(ConfigError::Invalid("coordinator_id is empty".to_string()));
        }
        if self.max_name_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_name_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn topics(&self) -> Topics {
        Topics::new(self.prefix.clone())
    }

    pub fn coordinator(&self) -> WorkerId {
        WorkerId::new(self.coordinator_id.clone())
    }

    /// Directory relative names resolve against
    pub fn base_dir(&self) -> PathBuf {
        match &self.base_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            other => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
                match other {
                    Some(dir) => cwd.join(dir),
                    None => cwd,
                }
            }
        }
    }

    /// Client settings that talk to this coordinator
    pub fn client(&self) -> ClientConfig {
        ClientConfig {
            prefix: self.prefix.clone(),
            coordinator_id: self.coordinator_id.clone(),
            ..ClientConfig::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub prefix: String,
    pub coordinator_id: String,
    /// Timeout applied by the awaiting helpers when none is given
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Length of generated request ids
    pub id_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            coordinator_id: DEFAULT_COORDINATOR_ID.to_string(),
            timeout: None,
            id_length: 12,
        }
    }
}

impl ClientConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn topics(&self) -> Topics {
        Topics::new(self.prefix.clone())
    }

    pub fn coordinator(&self) -> WorkerId {
        WorkerId::new(self.coordinator_id.clone())
    }
}

fn default_max_threads() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
