//! Configuration types for artifact-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Smallest write the downloader issues to scratch storage
pub const MIN_CHUNK_SIZE: usize = 1024;

/// Largest write the downloader issues to scratch storage
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Scratch storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScratchConfig {
    /// Root directory for scratch allocations (default: system temp dir)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Prefix for scratch file and directory names (default: "artifact-dl-")
    #[serde(default = "default_scratch_prefix")]
    pub prefix: String,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            prefix: default_scratch_prefix(),
        }
    }
}

/// Streaming download configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Largest single write to scratch storage, in bytes (default: 64 KiB,
    /// clamped to 1 KiB..=64 KiB)
    ///
    /// Received chunks larger than this are split into several writes. Read
    /// sizes are decided by the HTTP transport.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Longest wait for the response headers or for the next body chunk
    /// (default: 300 seconds, None = wait forever)
    ///
    /// A stream that keeps delivering bytes never trips this, however long
    /// the whole transfer takes.
    #[serde(default = "default_idle_timeout", with = "optional_duration_serde")]
    pub idle_timeout: Option<Duration>,

    /// Maximum accepted response size in bytes (None = unlimited)
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

impl DownloadConfig {
    /// Chunk size clamped into the supported range
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            idle_timeout: default_idle_timeout(),
            max_bytes: None,
        }
    }
}

/// How job key material is encoded on the wire
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEncoding {
    /// Base64 text wrapping a hex string of the raw bytes (default)
    #[default]
    Base64Hex,
    /// Base64 text wrapping the raw bytes
    Base64,
}

/// Key material configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Wire encoding of job key/IV fields
    #[serde(default)]
    pub encoding: KeyEncoding,
}

/// Task status polling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between status fetches (default: 5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Give up after this many fetches (None = unbounded)
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Give up after polling this long (None = unbounded)
    #[serde(default, with = "optional_duration_serde")]
    pub deadline: Option<Duration>,

    /// Status strings after which a job will not change again
    #[serde(default = "default_terminal_statuses")]
    pub terminal_statuses: Vec<String>,

    /// Terminal status strings that mean the job succeeded
    #[serde(default = "default_success_statuses")]
    pub success_statuses: Vec<String>,

    /// Consecutive failed fetches tolerated before polling fails (default: 3)
    #[serde(default = "default_max_consecutive_fetch_failures")]
    pub max_consecutive_fetch_failures: u32,
}

impl PollConfig {
    /// Whether `status` is in the terminal set
    pub fn is_terminal(&self, status: &str) -> bool {
        self.terminal_statuses.iter().any(|s| s == status)
    }

    /// Whether `status` is a successful terminal status
    pub fn is_success(&self, status: &str) -> bool {
        self.success_statuses.iter().any(|s| s == status)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            max_attempts: None,
            deadline: None,
            terminal_statuses: default_terminal_statuses(),
            success_statuses: default_success_statuses(),
            max_consecutive_fetch_failures: default_max_consecutive_fetch_failures(),
        }
    }
}

/// Header material for authenticated sessions
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Value for the `X-Api-Key` header
    #[serde(default)]
    pub api_key: Option<String>,

    /// Bearer token for the `Authorization` header
    #[serde(default)]
    pub token: Option<String>,

    /// Value for the `X-CLI-Version` header
    #[serde(default = "default_client_version")]
    pub client_version: String,

    /// Skip TLS certificate validation (default: false)
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// TCP/TLS connect timeout (default: 30 seconds, None = no timeout)
    #[serde(default = "default_connect_timeout", with = "optional_duration_serde")]
    pub connect_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            token: None,
            client_version: default_client_version(),
            accept_invalid_certs: false,
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scratch storage settings
    #[serde(default)]
    pub scratch: ScratchConfig,

    /// Streaming download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Key material settings
    #[serde(default)]
    pub keys: KeyConfig,

    /// Task polling settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Session header settings
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    /// Reject settings that would make retrieval or polling misbehave
    pub fn validate(&self) -> Result<()> {
        if self.download.chunk_size == 0 {
            return Err(config_error("chunk size must be positive", "download.chunk_size"));
        }
        if self.poll.interval.is_zero() {
            return Err(config_error("poll interval must be positive", "poll.interval"));
        }
        if self.poll.terminal_statuses.is_empty() {
            return Err(config_error(
                "at least one terminal status is required",
                "poll.terminal_statuses",
            ));
        }
        if let Some(status) = self
            .poll
            .success_statuses
            .iter()
            .find(|s| !self.poll.is_terminal(s))
        {
            return Err(config_error(
                format!("success status '{status}' is not a terminal status"),
                "poll.success_statuses",
            ));
        }
        if self.poll.max_consecutive_fetch_failures == 0 {
            return Err(config_error(
                "at least one failed status fetch must be tolerated",
                "poll.max_consecutive_fetch_failures",
            ));
        }
        if self.poll.max_attempts == Some(0) {
            return Err(config_error("max attempts must be positive", "poll.max_attempts"));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

fn default_scratch_prefix() -> String {
    "artifact-dl-".to_string()
}

fn default_chunk_size() -> usize {
    MAX_CHUNK_SIZE
}

fn default_idle_timeout() -> Option<Duration> {
    Some(Duration::from_secs(300))
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_terminal_statuses() -> Vec<String> {
    ["finished", "error", "cancelled", "failed"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_success_statuses() -> Vec<String> {
    vec!["finished".to_string()]
}

fn default_max_consecutive_fetch_failures() -> u32 {
    3
}

fn default_connect_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.poll.interval, Duration::from_secs(5));
        assert_eq!(config.download.chunk_size, 64 * 1024);
        assert_eq!(config.download.idle_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.session.connect_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.keys.encoding, KeyEncoding::Base64Hex);
        assert!(config.poll.is_terminal("finished"));
        assert!(!config.poll.is_terminal("running"));
    }

    #[test]
    fn durations_are_whole_seconds() {
        let config: Config = serde_json::from_str(
            r#"{"poll": {"interval": 60, "deadline": 600, "max_attempts": 10},
                "keys": {"encoding": "base64"}}"#,
        )
        .unwrap();

        assert_eq!(config.poll.interval, Duration::from_secs(60));
        assert_eq!(config.poll.deadline, Some(Duration::from_secs(600)));
        assert_eq!(config.poll.max_attempts, Some(10));
        assert_eq!(config.keys.encoding, KeyEncoding::Base64);
    }

    #[test]
    fn chunk_size_is_clamped() {
        let small = DownloadConfig {
            chunk_size: 10,
            ..Default::default()
        };
        let large = DownloadConfig {
            chunk_size: 1 << 20,
            ..Default::default()
        };
        assert_eq!(small.effective_chunk_size(), MIN_CHUNK_SIZE);
        assert_eq!(large.effective_chunk_size(), MAX_CHUNK_SIZE);
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.poll.interval = Duration::ZERO;

        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("poll.interval")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_non_terminal_success_status() {
        let mut config = Config::default();
        config.poll.success_statuses.push("running".into());

        assert!(matches!(
            config.validate(),
            Err(Error::Config { key: Some(k), .. }) if k == "poll.success_statuses"
        ));
    }

    #[test]
    fn validate_rejects_zero_fetch_failure_tolerance() {
        let mut config = Config::default();
        config.poll.max_consecutive_fetch_failures = 0;

        assert!(matches!(
            config.validate(),
            Err(Error::Config { key: Some(k), .. }) if k == "poll.max_consecutive_fetch_failures"
        ));
    }

    #[test]
    fn timeouts_accept_null() {
        let config: Config = serde_json::from_str(
            r#"{"download": {"idle_timeout": null}, "session": {"connect_timeout": 5}}"#,
        )
        .unwrap();

        assert_eq!(config.download.idle_timeout, None);
        assert_eq!(config.session.connect_timeout, Some(Duration::from_secs(5)));
    }
}
