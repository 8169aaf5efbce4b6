// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::bluetooth::{ServiceRecord, SPP_UUID};

/// Directory name used under the platform config dir.
const APP_DIR: &str = "spp-chat";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Start listening as soon as the shell launches.
    pub autostart: bool,

    /// RFCOMM server settings.
    pub server: ServerConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name of the advertised service record.
    pub service_name: String,

    /// Service UUID peers connect to.
    pub service_uuid: Uuid,

    /// Fixed RFCOMM channel. BlueZ picks one when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,

    /// Maximum bytes per read; each read becomes one message event.
    pub read_chunk_size: usize,

    /// Require an authenticated (paired) link.
    pub require_authentication: bool,

    /// Require authorization for each connection.
    pub require_authorization: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            service_name: "SppChat".to_string(),
            service_uuid: SPP_UUID,
            channel: None,
            read_chunk_size: 1024,
            require_authentication: false,
            require_authorization: false,
        }
    }
}

impl ServerConfig {
    /// Check values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            bail!("service_name must not be empty");
        }
        if self.read_chunk_size == 0 {
            bail!("read_chunk_size must be greater than zero");
        }
        Ok(())
    }

    /// Service record to register with the transport.
    pub fn service_record(&self) -> ServiceRecord {
        ServiceRecord {
            name: self.service_name.clone(),
            uuid: self.service_uuid,
            channel: self.channel,
            require_authentication: self.require_authentication,
            require_authorization: self.require_authorization,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives. `RUST_LOG` wins when set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "spp_chat=info".to_string(),
        }
    }
}

impl Config {
    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from the default location, creating it if missing.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        } else {
            let config = Self::default();
            config.save_to(path)?;
            config
        };

        config.server.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.autostart);
        assert_eq!(config.server.service_uuid, SPP_UUID);
        assert_eq!(config.server.read_chunk_size, 1024);
        assert_eq!(config.logging.filter, "spp_chat=info");
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "autostart = true\n[server]\nservice_name = \"Bench\"\nchannel = 3\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(config.autostart);
        assert_eq!(config.server.service_name, "Bench");
        assert_eq!(config.server.channel, Some(3));
        assert_eq!(config.server.read_chunk_size, 1024);
        assert_eq!(config.server.service_uuid, SPP_UUID);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.server.read_chunk_size = 256;
        config.server.require_authentication = true;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nread_chunk_size = 0\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_service_record() {
        let server = ServerConfig {
            channel: Some(5),
            ..ServerConfig::default()
        };
        let record = server.service_record();
        assert_eq!(record.name, "SppChat");
        assert_eq!(record.uuid, SPP_UUID);
        assert_eq!(record.channel, Some(5));
    }
}
