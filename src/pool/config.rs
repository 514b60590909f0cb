use crate::ctl::{InitOptions, StartOptions};
use crate::error::{Error, Result};
use crate::port::{
    DEFAULT_START_ATTEMPTS, TEMPG_BASE_PORT, TEMPG_WINDOW, TPG_BASE_PORT, TPG_WINDOW,
};
use serde::Deserialize;
use std::path::Path;

/// Settings for a [`Pool`](super::Pool).
///
/// Can be loaded from YAML; omitted keys take the temporary-server defaults:
///
/// ```yaml
/// base_port: 35432
/// window: 256
/// start_attempts: 5
/// scratch_prefix: "it-"
/// init:
///   user: app
/// start:
///   db_name: app
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// First port of the candidate window.
    pub base_port: u16,
    /// Number of ports in the candidate window.
    pub window: u16,
    /// Start attempts before giving up, each on a fresh candidate port.
    pub start_attempts: u32,
    /// Prefix of each server's scratch directory name.
    pub scratch_prefix: String,
    /// Data directory, relative to the scratch directory.
    pub data_subdir: String,
    /// Draw ports from the window. When false, `start.port` is used as-is.
    pub auto_port: bool,
    pub init: InitOptions,
    /// Start options template. `port` is overwritten when `auto_port` is set.
    pub start: StartOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::tempg()
    }
}

impl PoolConfig {
    /// Profile of the temporary-server helper.
    pub fn tempg() -> Self {
        Self {
            base_port: TEMPG_BASE_PORT,
            window: TEMPG_WINDOW,
            start_attempts: DEFAULT_START_ATTEMPTS,
            scratch_prefix: "tempg-".to_string(),
            data_subdir: "data".to_string(),
            auto_port: true,
            init: InitOptions::default(),
            start: StartOptions::default(),
        }
    }

    /// Profile of the test-server helper. Uses its own port window so both
    /// helpers can run side by side.
    pub fn tpg() -> Self {
        Self {
            base_port: TPG_BASE_PORT,
            window: TPG_WINDOW,
            scratch_prefix: "tpg-".to_string(),
            ..Self::tempg()
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Could not read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.auto_port {
            if self.window == 0 {
                return Err(Error::Config("window must be at least 1".to_string()));
            }
            if self.base_port == 0
                || u32::from(self.base_port) + u32::from(self.window) - 1 > u32::from(u16::MAX)
            {
                return Err(Error::Config(format!(
                    "port window {}+{} is outside 1..=65535",
                    self.base_port, self.window
                )));
            }
        }
        if self.start_attempts == 0 {
            return Err(Error::Config("start_attempts must be at least 1".to_string()));
        }
        let subdir = Path::new(&self.data_subdir);
        if self.data_subdir.is_empty() || subdir.is_absolute() {
            return Err(Error::Config(format!(
                "data_subdir must be a non-empty relative path, got '{}'",
                self.data_subdir
            )));
        }
        if subdir
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::Config(format!(
                "data_subdir must stay inside the scratch directory, got '{}'",
                self.data_subdir
            )));
        }
        Ok(())
    }
}
