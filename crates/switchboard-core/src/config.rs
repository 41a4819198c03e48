// ABOUTME: Timeouts and buffer sizes for the coordinator and endpoint clients.
// ABOUTME: Loaded from TOML with defaults for every field.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default capacity of the coordinator's request queue.
pub const DEFAULT_REQUEST_BUFFER: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    /// How long a client waits for a brokered channel to arrive.
    #[serde(default = "default_channel_timeout_ms")]
    pub channel_timeout_ms: u64,

    /// Default deadline for `invoke` when the caller gives none.
    #[serde(default = "default_invoke_timeout_ms")]
    pub invoke_timeout_ms: u64,

    /// How long a worker waits for its registration to be confirmed.
    #[serde(default = "default_registration_timeout_ms")]
    pub registration_timeout_ms: u64,

    /// Capacity of the coordinator's request queue.
    #[serde(default = "default_request_buffer")]
    pub request_buffer: usize,
}

fn default_channel_timeout_ms() -> u64 {
    5_000
}

fn default_invoke_timeout_ms() -> u64 {
    30_000
}

fn default_registration_timeout_ms() -> u64 {
    10_000
}

fn default_request_buffer() -> usize {
    DEFAULT_REQUEST_BUFFER
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            channel_timeout_ms: default_channel_timeout_ms(),
            invoke_timeout_ms: default_invoke_timeout_ms(),
            registration_timeout_ms: default_registration_timeout_ms(),
            request_buffer: default_request_buffer(),
        }
    }
}

impl SwitchboardConfig {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: SwitchboardConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load the config at `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Get the default config file path (~/.config/switchboard/switchboard.toml)
    pub fn default_path() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("switchboard")
            .join("switchboard.toml")
    }

    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout_ms = millis(timeout);
        self
    }

    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout_ms = millis(timeout);
        self
    }

    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout_ms = millis(timeout);
        self
    }

    pub fn with_request_buffer(mut self, buffer: usize) -> Self {
        self.request_buffer = buffer.max(1);
        self
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = SwitchboardConfig::default();
        assert_eq!(config.channel_timeout(), Duration::from_secs(5));
        assert_eq!(config.invoke_timeout(), Duration::from_secs(30));
        assert_eq!(config.registration_timeout(), Duration::from_secs(10));
        assert_eq!(config.request_buffer, DEFAULT_REQUEST_BUFFER);
    }

    #[test]
    fn test_load_partial_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            invoke_timeout_ms = 1500
            registration_timeout_ms = 200
        "#
        )
        .unwrap();

        let config = SwitchboardConfig::load(file.path()).unwrap();
        assert_eq!(config.invoke_timeout(), Duration::from_millis(1500));
        assert_eq!(config.registration_timeout(), Duration::from_millis(200));
        assert_eq!(config.channel_timeout_ms, 5_000);
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("switchboard.toml");

        let config = SwitchboardConfig::default()
            .with_channel_timeout(Duration::from_millis(750))
            .with_request_buffer(8);

        config.save(&path).unwrap();
        let loaded = SwitchboardConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = SwitchboardConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, SwitchboardConfig::default());
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invoke_timeout_ms = \"soon\"").unwrap();

        let err = SwitchboardConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_request_buffer_floor() {
        let config = SwitchboardConfig::default().with_request_buffer(0);
        assert_eq!(config.request_buffer, 1);
    }

    #[test]
    fn test_default_path_file_name() {
        let path = SwitchboardConfig::default_path();
        assert!(path.ends_with("switchboard/switchboard.toml"));
    }
}
