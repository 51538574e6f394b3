//! Configuration loading and validation
//!
//! Settings come from an optional TOML file; command-line flags are applied
//! on top by the binary. Every field has a default, so an empty file (or no
//! file at all) is a valid configuration apart from the identity.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::StreamFormat;
use crate::constants::{
    AUDIO_BATCH_BYTES, DEFAULT_BIND_ADDRESS, DEFAULT_HIGH_WATER_MARK, MAX_MESSAGE_SIZE,
    PLAYBACK_DELAY, RECONNECT_INTERVAL, SAMPLE_RATE, SESSION_POLL_TIMEOUT,
};
use crate::error::ConfigError;
use crate::network::TransportOptions;
use crate::protocol::{Identity, RoomCode, Username};

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local publisher endpoint
    pub bind_address: String,

    /// Peer publisher endpoints (`host:port`)
    pub peers: Vec<String>,

    /// Outbound queue depth per subscriber
    pub send_high_water_mark: usize,

    /// Inbound queue depth per peer
    pub recv_high_water_mark: usize,

    pub reconnect_interval_ms: u64,

    pub max_message_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            peers: Vec::new(),
            send_high_water_mark: DEFAULT_HIGH_WATER_MARK,
            recv_high_water_mark: DEFAULT_HIGH_WATER_MARK,
            reconnect_interval_ms: RECONNECT_INTERVAL.as_millis() as u64,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub username: String,

    /// Five-character room code
    pub room: String,

    /// Controller poll timeout
    pub poll_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            room: String::new(),
            poll_timeout_ms: SESSION_POLL_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture and play audio at all
    pub enabled: bool,

    /// Must equal the wire rate; peers cannot announce a different one
    pub sample_rate: u32,

    /// Uncompressed bytes per transmitted batch
    pub batch_bytes: usize,

    /// Minimum hold time for received audio
    pub playback_delay_ms: u64,

    /// zlib level, 0-9
    pub compression_level: u32,

    /// Input device name; the default device when unset
    pub input_device: Option<String>,

    /// Output device name; the default device when unset
    pub output_device: Option<String>,

    /// Close speaker streams silent for this long; never when unset
    pub speaker_idle_timeout_secs: Option<u64>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: SAMPLE_RATE,
            batch_bytes: AUDIO_BATCH_BYTES,
            playback_delay_ms: PLAYBACK_DELAY.as_millis() as u64,
            compression_level: 6,
            input_device: None,
            output_device: None,
            speaker_idle_timeout_secs: None,
        }
    }
}

impl AudioConfig {
    pub fn format(&self) -> StreamFormat {
        StreamFormat::mono(self.sample_rate)
    }

    pub fn playback_delay(&self) -> Duration {
        Duration::from_millis(self.playback_delay_ms)
    }

    pub fn speaker_idle_timeout(&self) -> Option<Duration> {
        self.speaker_idle_timeout_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    /// Load from `path` if given (it must exist), else from the user config
    /// file if there is one, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => {
                    tracing::debug!("Loading configuration from {}", path.display());
                    Self::from_file(&path)
                }
                _ => Ok(Self::default()),
            },
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Check every setting and build the session identity
    pub fn validate(&self) -> Result<Identity, ConfigError> {
        let room = RoomCode::new(self.session.room.as_str())?;
        let username = Username::new(self.session.username.as_str())?;
        if username.is_empty() {
            return Err(ConfigError::Invalid("username must not be empty".into()));
        }

        if self.network.bind_address.trim().is_empty() {
            return Err(ConfigError::Invalid("bind address must not be empty".into()));
        }
        if self.network.max_message_size == 0 {
            return Err(ConfigError::Invalid("max message size must be positive".into()));
        }

        let audio = &self.audio;
        if audio.sample_rate != SAMPLE_RATE {
            return Err(ConfigError::Invalid(format!(
                "sample rate {} is not supported, peers exchange {} Hz mono",
                audio.sample_rate, SAMPLE_RATE
            )));
        }
        if audio.batch_bytes == 0 || audio.batch_bytes % 2 != 0 {
            return Err(ConfigError::Invalid(format!(
                "batch size {} must be a positive multiple of 2",
                audio.batch_bytes
            )));
        }
        if audio.compression_level > 9 {
            return Err(ConfigError::Invalid(format!(
                "compression level {} is out of range 0-9",
                audio.compression_level
            )));
        }

        Ok(Identity::new(username, room))
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            send_high_water_mark: self.network.send_high_water_mark,
            recv_high_water_mark: self.network.recv_high_water_mark,
            reconnect_interval: Duration::from_millis(self.network.reconnect_interval_ms),
            max_message_size: self.network.max_message_size,
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.session.poll_timeout_ms)
    }
}

/// `<platform config dir>/peerchat/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "peerchat")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.session.username = "alice".into();
        config.session.room = "ABCDE".into();
        config
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.network.bind_address, "0.0.0.0:2001");
        assert_eq!(config.audio.batch_bytes, 2048);
        assert_eq!(config.audio.playback_delay(), Duration::from_millis(50));
        assert_eq!(config.poll_timeout(), Duration::from_millis(500));
        assert!(config.audio.speaker_idle_timeout().is_none());
    }

    #[test]
    fn test_validate_builds_identity() {
        let identity = valid().validate().unwrap();
        assert_eq!(identity.username.as_str(), "alice");
        assert_eq!(identity.room.as_str(), "ABCDE");
    }

    #[test]
    fn test_validate_rejects_bad_identity() {
        let mut config = valid();
        config.session.room = "ABCD".into();
        assert!(matches!(config.validate(), Err(ConfigError::Identity(_))));

        let mut config = valid();
        config.session.username = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = valid();
        config.session.username = "é".into();
        assert!(matches!(config.validate(), Err(ConfigError::Identity(_))));
    }

    #[test]
    fn test_validate_rejects_bad_audio() {
        let mut config = valid();
        config.audio.batch_bytes = 2047;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.audio.compression_level = 10;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.audio.sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_wire_sample_rate() {
        let mut config = valid();
        config.audio.sample_rate = 48_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.audio.sample_rate = SAMPLE_RATE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[network]
peers = ["10.0.0.2:2001", "10.0.0.3:2001"]
reconnect_interval_ms = 250

[session]
username = "bob"
room = "QWERT"

[audio]
enabled = false
speaker_idle_timeout_secs = 30
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.network.peers.len(), 2);
        assert_eq!(config.network.bind_address, "0.0.0.0:2001");
        assert_eq!(
            config.transport_options().reconnect_interval,
            Duration::from_millis(250)
        );
        assert!(!config.audio.enabled);
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(
            config.audio.speaker_idle_timeout(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.validate().unwrap().username.as_str(), "bob");
    }

    #[test]
    fn test_load_errors() {
        let missing = Path::new("/nonexistent/peerchat.toml");
        assert!(matches!(
            AppConfig::load(Some(missing)),
            Err(ConfigError::Read { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[network\nbind_address = 3").unwrap();
        assert!(matches!(
            AppConfig::load(Some(file.path())),
            Err(ConfigError::Parse { .. })
        ));
    }
}
