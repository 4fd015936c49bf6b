//! Media server endpoint contract
//!
//! The SFU exposes a per-room endpoint for the transport/producer/consumer
//! handshake. Only the client-side contract lives here; routing and wire
//! format belong to the server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientResult;
use crate::types::{
    ConsumerId, DtlsParameters, MediaKind, ProducerId, RtpCapabilities, RtpParameters, TransportId,
};

/// Server answer to a consume request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    #[serde(default)]
    pub rtp_parameters: RtpParameters,
}

/// Media server endpoint used by [`TransportNegotiator`](crate::transport::TransportNegotiator)
#[async_trait]
pub trait MediaServerApi: Send + Sync {
    /// Complete the DTLS handshake for a transport
    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls: &DtlsParameters,
    ) -> ClientResult<()>;

    /// Register a local track on the send transport
    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> ClientResult<ProducerId>;

    /// Request one inbound stream for a remote producer.
    ///
    /// Consuming a producer owned by the requesting client must fail with an
    /// error for which `is_self_consume_rejection()` holds.
    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        capabilities: &RtpCapabilities,
    ) -> ClientResult<ConsumeResponse>;

    async fn close_producer(&self, producer_id: &ProducerId) -> ClientResult<()>;

    async fn close_consumer(&self, consumer_id: &ConsumerId) -> ClientResult<()>;

    async fn close_transport(&self, transport_id: &TransportId) -> ClientResult<()>;
}
