//! Local media device contract
//!
//! The device owns the codec and DTLS internals of the underlying WebRTC stack.
//! The engine only asks it to negotiate capabilities against the router, to
//! describe local parameters, and to hand out microphone tracks.

use async_trait::async_trait;

use crate::error::ClientResult;
use crate::types::{
    DtlsParameters, EncodingConfig, LocalTrack, RtpCapabilities, RtpParameters, TransportParams,
};

#[async_trait]
pub trait MediaDevice: Send + Sync {
    /// Load the device against the router's advertised capabilities and
    /// return the capabilities this device can receive with.
    ///
    /// A failure here is fatal for the join.
    async fn load(&self, router_capabilities: &RtpCapabilities) -> ClientResult<RtpCapabilities>;

    /// Local DTLS parameters to present when connecting the given transport
    fn local_dtls_parameters(&self, transport: &TransportParams) -> ClientResult<DtlsParameters>;

    /// RTP send parameters for a track under the given encoding
    fn send_parameters(&self, track: &LocalTrack, encoding: &EncodingConfig) -> RtpParameters;

    /// Capture the microphone
    async fn acquire_microphone(&self) -> ClientResult<LocalTrack>;

    /// Stop a previously captured track
    async fn release_track(&self, track: &LocalTrack);
}
