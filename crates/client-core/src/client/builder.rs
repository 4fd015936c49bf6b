//! Client builder for creating room clients
//!
//! The builder collects the configuration and the three collaborators the
//! engine talks to (signaling endpoint, media server, local device), validates
//! them, and produces a shareable [`RoomClient`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use huddle_client_core::{ClientBuilder, Credentials, EncodingPreset};
//! # use huddle_client_core::{MediaDevice, MediaServerApi, SignalingApi};
//! # use std::sync::Arc;
//! # async fn example(
//! #     signaling: Arc<dyn SignalingApi>,
//! #     media_server: Arc<dyn MediaServerApi>,
//! #     device: Arc<dyn MediaDevice>,
//! # ) -> huddle_client_core::ClientResult<()> {
//! let client = ClientBuilder::new()
//!     .client_id("u1")
//!     .credentials(Credentials::bearer("token"))
//!     .encoding_preset(EncodingPreset::Voice)
//!     .signaling(signaling)
//!     .media_server(media_server)
//!     .device(device)
//!     .build()?;
//!
//! client.join("room-1", true).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use super::config::{ClientConfig, EncodingPreset, TimingConfig};
use super::manager::RoomClient;
use crate::device::MediaDevice;
use crate::error::{ClientError, ClientResult};
use crate::media_server::MediaServerApi;
use crate::signaling::{Credentials, SignalingApi};
use crate::types::ClientId;

/// Fluent builder for [`RoomClient`]
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    signaling: Option<Arc<dyn SignalingApi>>,
    media_server: Option<Arc<dyn MediaServerApi>>,
    device: Option<Arc<dyn MediaDevice>>,
}

impl ClientBuilder {
    /// Create a new client builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<ClientId>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing = timing;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_poll_interval(interval);
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_heartbeat_interval(interval);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_request_timeout(timeout);
        self
    }

    pub fn encoding_preset(mut self, preset: EncodingPreset) -> Self {
        self.config.encoding = preset.encoding();
        self
    }

    /// Park a producer after this many failed consume attempts
    pub fn max_consume_attempts(mut self, attempts: u32) -> Self {
        self.config.max_consume_attempts = Some(attempts);
        self
    }

    pub fn signaling(mut self, signaling: Arc<dyn SignalingApi>) -> Self {
        self.signaling = Some(signaling);
        self
    }

    pub fn media_server(mut self, media_server: Arc<dyn MediaServerApi>) -> Self {
        self.media_server = Some(media_server);
        self
    }

    pub fn device(mut self, device: Arc<dyn MediaDevice>) -> Self {
        self.device = Some(device);
        self
    }

    /// Validate and build the client
    pub fn build(self) -> ClientResult<Arc<RoomClient>> {
        self.config.validate()?;
        let signaling = self.signaling.ok_or_else(|| missing("signaling"))?;
        let media_server = self.media_server.ok_or_else(|| missing("media_server"))?;
        let device = self.device.ok_or_else(|| missing("device"))?;

        tracing::debug!(client_id = %self.config.client_id, "Building room client");
        let client = RoomClient::new(self.config, signaling, media_server, device);
        Ok(Arc::new(client))
    }
}

fn missing(field: &str) -> ClientError {
    ClientError::MissingConfiguration {
        field: field.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_collaborators() {
        let err = ClientBuilder::new()
            .client_id("u1")
            .build()
            .err()
            .expect("build should fail");
        match err {
            ClientError::MissingConfiguration { field } => assert_eq!(field, "signaling"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_build_validates_config_first() {
        let err = ClientBuilder::new()
            .client_id("u1")
            .max_consume_attempts(0)
            .build()
            .err()
            .expect("build should fail");
        match err {
            ClientError::InvalidConfiguration { field, .. } => {
                assert_eq!(field, "max_consume_attempts")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_build_rejects_zero_poll_interval() {
        let err = ClientBuilder::new()
            .client_id("u1")
            .poll_interval(Duration::ZERO)
            .build()
            .err()
            .expect("build should fail");
        match err {
            ClientError::InvalidConfiguration { field, .. } => {
                assert_eq!(field, "timing.poll_interval_ms")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_builder_setters_reach_config() {
        let builder = ClientBuilder::new()
            .client_id("u9")
            .poll_interval(Duration::from_millis(250))
            .encoding_preset(EncodingPreset::LowBandwidth);
        assert_eq!(builder.config.client_id.as_str(), "u9");
        assert_eq!(
            builder.config.timing.poll_interval(),
            Duration::from_millis(250)
        );
        assert_eq!(
            builder.config.encoding,
            EncodingPreset::LowBandwidth.encoding()
        );
    }
}
