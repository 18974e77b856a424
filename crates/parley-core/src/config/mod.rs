//! Configuration management for Parley.
//!
//! This module handles loading, saving, and validating Parley configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/parley/config.toml` |
//! | macOS | `~/Library/Application Support/com.parley.Parley/config.toml` |
//! | Windows | `%APPDATA%\Parley\Parley\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use parley_core::config::Config;
//!
//! let config = Config::load()?;
//! config.validate()?;
//! println!("Relay port: {}", config.server.port);
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ClientConfig;
use crate::error::{Error, Result};
use crate::server::ServerConfig;

/// Main configuration struct for Parley.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relay server settings
    pub server: ServerSection,
    /// Chat client settings
    pub client: ClientSection,
    /// File transfer settings
    pub transfer: TransferSection,
    /// Loop and timeout settings
    pub timing: TimingSection,
}

/// Relay server options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to listen on
    pub bind_address: IpAddr,
    /// TCP port
    pub port: u16,
    /// Idle time before a keep-alive frame is sent to a client
    #[serde(with = "humantime_serde")]
    pub keepalive_interval: Duration,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: crate::DEFAULT_PORT,
            keepalive_interval: Duration::from_secs(15),
        }
    }
}

/// Chat client options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Relay to connect to
    pub server: String,
    /// Display name announced after joining
    pub display_name: String,
    /// Where downloads go; the user's download folder when unset
    pub download_dir: Option<PathBuf>,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", crate::DEFAULT_PORT),
            display_name: hostname::get().map_or_else(
                |_| "Parley User".to_string(),
                |h| h.to_string_lossy().to_string(),
            ),
            download_dir: None,
        }
    }
}

/// File transfer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSection {
    /// Preferred chunk size in bytes
    pub chunk_size: usize,
    /// Minimum chunk size in bytes
    pub min_chunk_size: usize,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            min_chunk_size: crate::MIN_CHUNK_SIZE,
        }
    }
}

/// Loop and timeout options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    /// Bounded wait of the client loop
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Limit for each handshake frame
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Limit for the TCP connect
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            poll_interval: crate::DEFAULT_POLL_INTERVAL,
            handshake_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`, creating its directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        std::fs::write(path, self.to_toml()?)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "parley", "Parley")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let transfer = &self.transfer;
        if transfer.min_chunk_size < crate::MIN_CHUNK_SIZE {
            return Err(invalid(
                "transfer.min_chunk_size",
                format!("must be at least {} bytes", crate::MIN_CHUNK_SIZE),
            ));
        }
        if transfer.chunk_size < transfer.min_chunk_size {
            return Err(invalid(
                "transfer.chunk_size",
                "must not be smaller than transfer.min_chunk_size".to_string(),
            ));
        }
        if transfer.chunk_size > crate::MAX_CHUNK_SIZE {
            return Err(invalid(
                "transfer.chunk_size",
                format!("must be at most {} bytes", crate::MAX_CHUNK_SIZE),
            ));
        }

        let poll = self.timing.poll_interval;
        if poll < Duration::from_millis(10) || poll > Duration::from_secs(1) {
            return Err(invalid(
                "timing.poll_interval",
                "must be between 10ms and 1s".to_string(),
            ));
        }
        if self.timing.handshake_timeout.is_zero() {
            return Err(invalid("timing.handshake_timeout", "must not be zero".to_string()));
        }
        if self.timing.connect_timeout.is_zero() {
            return Err(invalid("timing.connect_timeout", "must not be zero".to_string()));
        }
        if self.server.keepalive_interval.is_zero() {
            return Err(invalid("server.keepalive_interval", "must not be zero".to_string()));
        }

        Ok(())
    }

    /// Runtime settings for the relay server.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_address: self.server.bind_address,
            port: self.server.port,
            keepalive_interval: self.server.keepalive_interval,
        }
    }

    /// Runtime settings for a chat client.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        let display_name = Some(self.client.display_name.trim().to_string())
            .filter(|name| !name.is_empty());

        ClientConfig {
            server: self.client.server.clone(),
            display_name,
            download_dir: self.download_dir(),
            chunk_size: self.transfer.chunk_size,
            min_chunk_size: self.transfer.min_chunk_size,
            poll_interval: self.timing.poll_interval,
            handshake_timeout: self.timing.handshake_timeout,
            connect_timeout: self.timing.connect_timeout,
        }
    }

    /// The configured download directory, else the user's download folder,
    /// else the current directory.
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.client
            .download_dir
            .clone()
            .or_else(|| {
                directories::UserDirs::new()
                    .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
            })
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn invalid(key: &str, reason: String) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        reason,
    }
}

/// Durations as `250ms`, `15s` or `5m`.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let text = if duration.subsec_nanos() != 0 || duration.is_zero() {
            format!("{}ms", duration.as_millis())
        } else if duration.as_secs() % 60 == 0 {
            format!("{}m", duration.as_secs() / 60)
        } else {
            format!("{}s", duration.as_secs())
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();
        s.strip_suffix("ms")
            .map(|ms| {
                ms.parse()
                    .map(Duration::from_millis)
                    .map_err(serde::de::Error::custom)
            })
            .or_else(|| {
                s.strip_suffix('s').map(|secs| {
                    secs.parse()
                        .map(Duration::from_secs)
                        .map_err(serde::de::Error::custom)
                })
            })
            .or_else(|| {
                s.strip_suffix('m').map(|mins| {
                    mins.parse::<u64>()
                        .map_err(serde::de::Error::custom)
                        .and_then(|m| {
                            m.checked_mul(60).map(Duration::from_secs).ok_or_else(|| {
                                serde::de::Error::custom(format!("{m} minutes is too long"))
                            })
                        })
                })
            })
            .unwrap_or_else(|| Err(serde::de::Error::custom("invalid duration format")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.server.port, crate::DEFAULT_PORT);
        assert_eq!(config.transfer.chunk_size, 512 * 1024);
        assert_eq!(config.transfer.min_chunk_size, 1024);
        assert_eq!(config.timing.poll_interval, Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = Config::default();
        original.client.display_name = "Test User".to_string();
        original.server.port = 6000;
        original.timing.poll_interval = Duration::from_millis(250);
        original.save_to(&config_path).expect("save");

        let loaded = Config::load_from(&config_path).expect("load");
        assert_eq!(loaded.client.display_name, "Test User");
        assert_eq!(loaded.server.port, 6000);
        assert_eq!(loaded.timing.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("absent.toml")).expect("load");
        assert_eq!(config.server.port, crate::DEFAULT_PORT);
    }

    #[test]
    fn test_config_deserialization_partial() {
        let partial_toml = r#"
[client]
server = "10.0.0.2:6000"

[timing]
poll_interval = "200ms"
"#;

        let config: Config = toml::from_str(partial_toml).expect("parse partial config");

        assert_eq!(config.client.server, "10.0.0.2:6000");
        assert_eq!(config.timing.poll_interval, Duration::from_millis(200));
        assert_eq!(config.timing.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.transfer.chunk_size, crate::DEFAULT_CHUNK_SIZE);
        assert_eq!(config.server.keepalive_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_humantime_duration_formats() {
        let config = Config::default();
        let toml_str = config.to_toml().expect("serialize");

        assert!(toml_str.contains("poll_interval = \"100ms\""));
        assert!(toml_str.contains("keepalive_interval = \"15s\""));
        assert!(toml_str.contains("connect_timeout = \"5s\""));

        let parsed: TimingSection =
            toml::from_str("poll_interval = \"1m\"\nconnect_timeout = \"2s\"").expect("parse");
        assert_eq!(parsed.poll_interval, Duration::from_secs(60));
        assert_eq!(parsed.connect_timeout, Duration::from_secs(2));

        assert!(toml::from_str::<TimingSection>("poll_interval = \"soon\"").is_err());
    }

    #[test]
    fn test_overlong_minutes_are_rejected() {
        let limit = u64::MAX / 60;
        let parsed: TimingSection =
            toml::from_str(&format!("poll_interval = \"{limit}m\"")).expect("parse");
        assert_eq!(parsed.poll_interval, Duration::from_secs(limit * 60));

        let err = toml::from_str::<TimingSection>(&format!("poll_interval = \"{}m\"", limit + 1))
            .unwrap_err();
        assert!(err.to_string().contains("too long"), "{err}");
    }

    #[test]
    fn test_validate_chunk_sizes() {
        let mut config = Config::default();
        config.transfer.min_chunk_size = 512;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { key, .. }) if key == "transfer.min_chunk_size"
        ));

        let mut config = Config::default();
        config.transfer.chunk_size = 2 * 1024 * 1024;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transfer.min_chunk_size = 4096;
        config.transfer.chunk_size = 2048;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_poll_interval() {
        let mut config = Config::default();
        config.timing.poll_interval = Duration::from_millis(5);
        assert!(config.validate().is_err());

        config.timing.poll_interval = Duration::from_secs(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_runtime_configs() {
        let mut config = Config::default();
        config.client.display_name = "  ".to_string();
        config.client.download_dir = Some(PathBuf::from("/tmp/parley"));

        let client = config.client_config();
        assert!(client.display_name.is_none());
        assert_eq!(client.download_dir, PathBuf::from("/tmp/parley"));
        assert_eq!(client.chunk_size, config.transfer.chunk_size);

        let server = config.server_config();
        assert_eq!(server.port, crate::DEFAULT_PORT);
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(
            path.ends_with("config.toml"),
            "Config path should end with config.toml"
        );
    }
}
