//! Client configuration structures and presets
//!
//! This module holds everything a [`RoomClient`](crate::client::RoomClient)
//! needs besides its three collaborators: who we are, how we authenticate,
//! how often the background tasks run, and how the microphone is encoded.
//!
//! # Key Components
//!
//! - **ClientConfig** - Main configuration: identity, credentials, timing, encoding
//! - **TimingConfig** - Poll, heartbeat, timeout and reconnect intervals
//! - **EncodingPreset** - Predefined microphone encoding templates
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────┐
//! │    ClientConfig         │
//! │ ┌─────────────────────┐ │
//! │ │   Identity          │ │  • client id, credentials
//! │ │   TimingConfig     ─┼─┼─ • poll / heartbeat / timeouts
//! │ │   EncodingConfig   ─┼─┼─ • bitrate, DTX, FEC
//! │ └─────────────────────┘ │  • consume retry cap
//! └─────────────────────────┘
//! ```
//!
//! # Usage Examples
//!
//! ```rust
//! use huddle_client_core::client::config::{ClientConfig, EncodingPreset};
//! use huddle_client_core::Credentials;
//! use std::time::Duration;
//!
//! let config = ClientConfig::new()
//!     .with_client_id("u1")
//!     .with_credentials(Credentials::bearer("token"))
//!     .with_poll_interval(Duration::from_secs(3))
//!     .with_encoding_preset(EncodingPreset::LowBandwidth)
//!     .with_max_consume_attempts(5);
//!
//! assert_eq!(config.timing.poll_interval(), Duration::from_secs(3));
//! assert_eq!(config.max_consume_attempts, Some(5));
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ClientError, ClientResult};
use crate::signaling::Credentials;
use crate::types::{ClientId, EncodingConfig};

/// Intervals and timeouts of the session's background work
///
/// All values are stored in milliseconds so the structure serializes cleanly;
/// use the `Duration` accessors in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Full roster poll period
    pub poll_interval_ms: u64,
    /// Keep-alive period
    pub heartbeat_interval_ms: u64,
    /// Upper bound for a single network round-trip
    pub request_timeout_ms: u64,
    /// Pause between leave and join during a reconnect
    pub reconnect_grace_ms: u64,
    /// Pause between a reconnect's join and the microphone restart
    pub microphone_restart_delay_ms: u64,
    /// Consecutive heartbeat failures before the connection is reported degraded
    pub degraded_after_failures: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            heartbeat_interval_ms: 10_000,
            request_timeout_ms: 5_000,
            reconnect_grace_ms: 1_000,
            microphone_restart_delay_ms: 500,
            degraded_after_failures: 3,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }

    pub fn microphone_restart_delay(&self) -> Duration {
        Duration::from_millis(self.microphone_restart_delay_ms)
    }

    fn validate(&self) -> ClientResult<()> {
        let non_zero = [
            ("timing.poll_interval_ms", self.poll_interval_ms),
            ("timing.heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("timing.request_timeout_ms", self.request_timeout_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ClientError::InvalidConfiguration {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.degraded_after_failures == 0 {
            return Err(ClientError::InvalidConfiguration {
                field: "timing.degraded_after_failures".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Predefined microphone encoding templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodingPreset {
    /// Speech at a moderate bitrate, DTX and FEC on
    Voice,
    /// Wideband music-grade audio, DTX off
    HighQuality,
    /// Constrained networks
    LowBandwidth,
}

impl EncodingPreset {
    pub fn encoding(self) -> EncodingConfig {
        match self {
            EncodingPreset::Voice => EncodingConfig::default(),
            EncodingPreset::HighQuality => EncodingConfig {
                max_bitrate_bps: 128_000,
                dtx: false,
                fec: true,
            },
            EncodingPreset::LowBandwidth => EncodingConfig {
                max_bitrate_bps: 16_000,
                dtx: true,
                fec: false,
            },
        }
    }
}

impl From<EncodingPreset> for EncodingConfig {
    fn from(preset: EncodingPreset) -> Self {
        preset.encoding()
    }
}

/// Complete client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Identity used for heartbeats and for recognizing our own producers
    pub client_id: ClientId,
    /// Credentials presented on join
    #[serde(skip)]
    pub credentials: Credentials,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,
    /// Cap on ordinary consume failures per producer. `None` retries forever.
    #[serde(default)]
    pub max_consume_attempts: Option<u32>,
    /// Buffer size of the broadcast event stream
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl ClientConfig {
    /// Create a configuration with a random client id and default timing
    pub fn new() -> Self {
        Self {
            client_id: ClientId::random(),
            credentials: Credentials::default(),
            timing: TimingConfig::default(),
            encoding: EncodingConfig::default(),
            max_consume_attempts: None,
            event_channel_capacity: default_event_capacity(),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.timing.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.timing.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.timing.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingConfig) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_encoding_preset(mut self, preset: EncodingPreset) -> Self {
        self.encoding = preset.encoding();
        self
    }

    pub fn with_max_consume_attempts(mut self, attempts: u32) -> Self {
        self.max_consume_attempts = Some(attempts);
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> ClientResult<()> {
        if self.client_id.as_str().is_empty() {
            return Err(ClientError::MissingConfiguration {
                field: "client_id".to_string(),
            });
        }
        self.timing.validate()?;
        if self.encoding.max_bitrate_bps == 0 {
            return Err(ClientError::InvalidConfiguration {
                field: "encoding.max_bitrate_bps".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_consume_attempts == Some(0) {
            return Err(ClientError::InvalidConfiguration {
                field: "max_consume_attempts".to_string(),
                reason: "must be at least 1 when set".to_string(),
            });
        }
        if self.event_channel_capacity == 0 {
            return Err(ClientError::InvalidConfiguration {
                field: "event_channel_capacity".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let timing = TimingConfig::default();
        assert_eq!(timing.poll_interval(), Duration::from_secs(5));
        assert_eq!(timing.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(timing.degraded_after_failures, 3);
        assert!(ClientConfig::new().validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let voice = EncodingConfig::default();
        assert_eq!(EncodingConfig::from(EncodingPreset::Voice), voice);
        assert!(!EncodingPreset::HighQuality.encoding().dtx);
        let low = EncodingPreset::LowBandwidth.encoding();
        assert!(low.max_bitrate_bps < voice.max_bitrate_bps);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let config = ClientConfig::new().with_poll_interval(Duration::ZERO);
        match config.validate() {
            Err(ClientError::InvalidConfiguration { field, .. }) => {
                assert_eq!(field, "timing.poll_interval_ms")
            }
            other => panic!("expected invalid configuration, got {:?}", other),
        }

        let mut config = ClientConfig::new();
        config.max_consume_attempts = Some(0);
        assert!(config.validate().is_err());

        let config = ClientConfig::new().with_client_id("");
        assert!(matches!(
            config.validate(),
            Err(ClientError::MissingConfiguration { .. })
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"client_id":"u1","timing":{"poll_interval_ms":2000},"max_consume_attempts":4}"#,
        )
        .unwrap();
        assert_eq!(config.client_id, ClientId::new("u1"));
        assert_eq!(config.timing.poll_interval_ms, 2000);
        assert_eq!(config.timing.heartbeat_interval_ms, 10_000);
        assert_eq!(config.max_consume_attempts, Some(4));
        assert_eq!(config.event_channel_capacity, 256);
        assert!(config.credentials.is_empty());
    }
}
