//! Transport negotiation with the media server
//!
//! A session owns exactly one send and one receive transport, created together
//! from the join grant and closed together on leave. Each transport performs
//! its DTLS connect round-trip lazily, the first time it carries a produce or
//! consume, and never again afterwards.
//!
//! # Handshake
//!
//! ```text
//! join grant ──► device.load(router caps) ──► send + recv transports (New)
//!                                                   │
//!  first produce/consume ──► connect_transport ─────┘ (Connecting ► Connected)
//!                                                   │
//!  produce(track) ──► producer id     consume(producer id) ──► consumer handle
//! ```
//!
//! Nothing here retries. Retry policy belongs to reconciliation and to the
//! session lifecycle.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::client::recovery::with_timeout;
use crate::consumer_store::ConsumerFactory;
use crate::device::MediaDevice;
use crate::error::{ClientError, ClientResult};
use crate::media_server::MediaServerApi;
use crate::signaling::JoinGrant;
use crate::types::{
    ConsumerId, DtlsParameters, EncodingConfig, LocalTrack, MediaKind, ProducerId, RtpCapabilities,
    RtpParameters, TransportId, TransportParams,
};

/// Which way media flows over a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportDirection {
    Send,
    Receive,
}

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Closed,
}

/// One unidirectional transport between this client and the media server
#[derive(Debug)]
pub struct Transport {
    params: TransportParams,
    direction: TransportDirection,
    local_dtls: DtlsParameters,
    state: Mutex<TransportState>,
    connected: OnceCell<()>,
}

impl Transport {
    fn new(
        params: TransportParams,
        direction: TransportDirection,
        local_dtls: DtlsParameters,
    ) -> Self {
        Self {
            params,
            direction,
            local_dtls,
            state: Mutex::new(TransportState::New),
            connected: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &TransportId {
        &self.params.id
    }

    pub fn direction(&self) -> TransportDirection {
        self.direction
    }

    pub fn params(&self) -> &TransportParams {
        &self.params
    }

    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == TransportState::Closed
    }

    /// Move to `next` unless the transport is already closed.
    fn transition(&self, next: TransportState) -> bool {
        let mut state = self.state.lock();
        if *state == TransportState::Closed {
            return false;
        }
        *state = next;
        true
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.is_closed() {
            return Err(ClientError::TransportClosed {
                transport_id: self.id().clone(),
            });
        }
        Ok(())
    }
}

/// The send/receive pair of one session, plus the device's receive capabilities
#[derive(Debug, Clone)]
pub struct TransportPair {
    pub send: Arc<Transport>,
    pub recv: Arc<Transport>,
    pub local_capabilities: RtpCapabilities,
}

/// The local microphone as registered with the media server
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerHandle {
    pub id: ProducerId,
    pub track: LocalTrack,
    pub encoding: EncodingConfig,
    pub transport_id: TransportId,
}

/// A playable inbound stream for one remote producer
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerHandle {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub transport_id: TransportId,
}

/// Drives the connect/produce/consume handshake against the media server
pub struct TransportNegotiator {
    media_server: Arc<dyn MediaServerApi>,
    device: Arc<dyn MediaDevice>,
    request_timeout: Duration,
}

impl std::fmt::Debug for TransportNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportNegotiator")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl TransportNegotiator {
    pub fn new(
        media_server: Arc<dyn MediaServerApi>,
        device: Arc<dyn MediaDevice>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            media_server,
            device,
            request_timeout,
        }
    }

    pub fn device(&self) -> &Arc<dyn MediaDevice> {
        &self.device
    }

    /// Build both transports from a join grant.
    ///
    /// Loads the device against the router capabilities first; any failure
    /// there is reported as [`ClientError::CapabilityNegotiationFailed`].
    pub async fn create_transports(&self, grant: &JoinGrant) -> ClientResult<TransportPair> {
        let local_capabilities = self
            .device
            .load(&grant.router_capabilities)
            .await
            .map_err(|e| match e {
                ClientError::CapabilityNegotiationFailed { .. } => e,
                other => ClientError::capability_negotiation_failed(other.to_string()),
            })?;

        let send_dtls = self.device.local_dtls_parameters(&grant.send_transport)?;
        let recv_dtls = self.device.local_dtls_parameters(&grant.recv_transport)?;

        let send = Arc::new(Transport::new(
            grant.send_transport.clone(),
            TransportDirection::Send,
            send_dtls,
        ));
        let recv = Arc::new(Transport::new(
            grant.recv_transport.clone(),
            TransportDirection::Receive,
            recv_dtls,
        ));

        info!(
            send_transport = %send.id(),
            recv_transport = %recv.id(),
            "Created transport pair"
        );

        Ok(TransportPair {
            send,
            recv,
            local_capabilities,
        })
    }

    /// Connect a transport. Only the first successful call reaches the
    /// server; concurrent callers wait on the same round-trip.
    pub async fn connect(&self, transport: &Transport) -> ClientResult<()> {
        transport.ensure_open()?;
        transport
            .connected
            .get_or_try_init(|| async {
                transport.transition(TransportState::Connecting);
                debug!(
                    transport_id = %transport.id(),
                    direction = ?transport.direction(),
                    "Connecting transport"
                );

                let result = with_timeout(
                    "connect_transport",
                    self.request_timeout,
                    self.media_server
                        .connect_transport(transport.id(), &transport.local_dtls),
                )
                .await;

                match result {
                    Ok(()) => {
                        transport.transition(TransportState::Connected);
                        debug!(transport_id = %transport.id(), "Transport connected");
                        Ok(())
                    }
                    Err(e) => {
                        transport.transition(TransportState::New);
                        warn!(
                            transport_id = %transport.id(),
                            error = %e,
                            "Transport connect failed"
                        );
                        Err(ClientError::TransportConnectFailed {
                            transport_id: transport.id().clone(),
                            reason: e.to_string(),
                        })
                    }
                }
            })
            .await
            .map(|_| ())
    }

    /// Register a local track on the send transport
    pub async fn produce(
        &self,
        transport: &Transport,
        track: LocalTrack,
        encoding: &EncodingConfig,
    ) -> ClientResult<ProducerHandle> {
        if transport.direction() != TransportDirection::Send {
            return Err(ClientError::internal_error(
                "produce requires the send transport",
            ));
        }
        self.connect(transport).await?;

        let rtp_parameters = self.device.send_parameters(&track, encoding);
        let producer_id = with_timeout(
            "produce",
            self.request_timeout,
            self.media_server
                .produce(transport.id(), track.kind, &rtp_parameters),
        )
        .await
        .map_err(|e| ClientError::produce_failed(e.to_string()))?;

        info!(producer_id = %producer_id, track = %track.id, "Local producer registered");
        Ok(ProducerHandle {
            id: producer_id,
            track,
            encoding: encoding.clone(),
            transport_id: transport.id().clone(),
        })
    }

    /// Request an inbound stream for a remote producer on the receive transport.
    ///
    /// Server rejections are passed through untouched so the caller can tell
    /// the self-producer case apart from ordinary failures.
    pub async fn consume(
        &self,
        transport: &Transport,
        producer_id: &ProducerId,
        capabilities: &RtpCapabilities,
    ) -> ClientResult<ConsumerHandle> {
        if transport.direction() != TransportDirection::Receive {
            return Err(ClientError::internal_error(
                "consume requires the receive transport",
            ));
        }
        self.connect(transport).await?;

        debug!(producer_id = %producer_id, transport_id = %transport.id(), "Requesting consumer");
        let response = with_timeout(
            "consume",
            self.request_timeout,
            self.media_server
                .consume(transport.id(), producer_id, capabilities),
        )
        .await?;

        Ok(ConsumerHandle {
            id: response.consumer_id,
            producer_id: response.producer_id,
            kind: response.kind,
            rtp_parameters: response.rtp_parameters,
            transport_id: transport.id().clone(),
        })
    }

    /// Release a consumer. Remote teardown is best-effort and skipped when
    /// the owning transport is already closed.
    pub async fn close_consumer(&self, transport: &Transport, handle: &ConsumerHandle) {
        if transport.is_closed() {
            debug!(
                consumer_id = %handle.id,
                "Transport already closed, releasing consumer locally"
            );
            return;
        }
        let result = with_timeout(
            "close_consumer",
            self.request_timeout,
            self.media_server.close_consumer(&handle.id),
        )
        .await;
        if let Err(e) = result {
            warn!(
                consumer_id = %handle.id,
                producer_id = %handle.producer_id,
                error = %e,
                "Remote consumer close failed"
            );
        }
    }

    /// Stop the local track and tell the server the producer is gone
    pub async fn close_producer(&self, handle: &ProducerHandle) {
        self.device.release_track(&handle.track).await;
        let result = with_timeout(
            "close_producer",
            self.request_timeout,
            self.media_server.close_producer(&handle.id),
        )
        .await;
        if let Err(e) = result {
            warn!(producer_id = %handle.id, error = %e, "Remote producer close failed");
        }
    }

    /// Close a transport. Always succeeds locally.
    pub async fn close_transport(&self, transport: &Transport) {
        {
            let mut state = transport.state.lock();
            if *state == TransportState::Closed {
                return;
            }
            *state = TransportState::Closed;
        }
        let result = with_timeout(
            "close_transport",
            self.request_timeout,
            self.media_server.close_transport(transport.id()),
        )
        .await;
        if let Err(e) = result {
            warn!(transport_id = %transport.id(), error = %e, "Remote transport close failed");
        }
        debug!(transport_id = %transport.id(), "Transport closed");
    }
}

/// The receive side of one session, as seen by the consumer store
pub struct ReceivePath {
    negotiator: Arc<TransportNegotiator>,
    transport: Arc<Transport>,
    capabilities: RtpCapabilities,
}

impl ReceivePath {
    pub fn new(negotiator: Arc<TransportNegotiator>, transports: &TransportPair) -> Self {
        Self {
            negotiator,
            transport: transports.recv.clone(),
            capabilities: transports.local_capabilities.clone(),
        }
    }
}

#[async_trait]
impl ConsumerFactory for ReceivePath {
    async fn create_consumer(&self, producer_id: &ProducerId) -> ClientResult<ConsumerHandle> {
        self.negotiator
            .consume(&self.transport, producer_id, &self.capabilities)
            .await
    }

    async fn close_consumer(&self, handle: ConsumerHandle) {
        self.negotiator
            .close_consumer(&self.transport, &handle)
            .await
    }
}
