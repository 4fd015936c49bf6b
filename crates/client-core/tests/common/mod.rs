//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use huddle_client_core::{
    ClientBuilder, ClientConfig, ClientError, ClientEvent, ClientId, ClientResult, ConsumeResponse,
    ConsumerId, Credentials, DtlsParameters, EncodingConfig, JoinGrant, LocalTrack, MediaDevice,
    MediaKind, MediaServerApi, ProducerId, RoomClient, RoomId, RosterEntry, RtpCapabilities,
    RtpParameters, SignalingApi, TimingConfig, TransportId, TransportParams,
};

pub const LOCAL_CLIENT: &str = "u1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("huddle_client_core=debug")
        .with_test_writer()
        .try_init();
}

/// Timing that leaves only the immediate first poll, with short lifecycle pauses
pub fn test_timing() -> TimingConfig {
    TimingConfig {
        poll_interval_ms: 3_600_000,
        heartbeat_interval_ms: 3_600_000,
        request_timeout_ms: 1_000,
        reconnect_grace_ms: 10,
        microphone_restart_delay_ms: 10,
        degraded_after_failures: 3,
    }
}

#[derive(Default)]
pub struct MockSignaling {
    pub roster: Mutex<Vec<RosterEntry>>,
    pub reject_join: AtomicBool,
    pub fail_roster: AtomicBool,
    pub fail_heartbeat: AtomicBool,
    pub joins: AtomicUsize,
    pub leaves: AtomicUsize,
    pub roster_fetches: AtomicUsize,
    pub heartbeats: AtomicUsize,
}

impl MockSignaling {
    pub fn set_roster(&self, roster: Vec<RosterEntry>) {
        *self.roster.lock() = roster;
    }
}

#[async_trait]
impl SignalingApi for MockSignaling {
    async fn join_room(
        &self,
        room_id: &RoomId,
        _credentials: &Credentials,
    ) -> ClientResult<JoinGrant> {
        let n = self.joins.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject_join.load(Ordering::SeqCst) {
            return Err(ClientError::join_rejected(room_id, "room is full"));
        }
        Ok(JoinGrant {
            send_transport: TransportParams::new(format!("send-{}", n)),
            recv_transport: TransportParams::new(format!("recv-{}", n)),
            router_capabilities: RtpCapabilities(serde_json::json!({ "codecs": ["opus"] })),
        })
    }

    async fn leave_room(&self, _room_id: &RoomId) -> ClientResult<()> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_roster(&self, _room_id: &RoomId) -> ClientResult<Vec<RosterEntry>> {
        self.roster_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_roster.load(Ordering::SeqCst) {
            return Err(ClientError::network_error("roster unavailable"));
        }
        Ok(self.roster.lock().clone())
    }

    async fn heartbeat(&self, _room_id: &RoomId, _client_id: &ClientId) -> ClientResult<()> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.fail_heartbeat.load(Ordering::SeqCst) {
            return Err(ClientError::network_error("no route to host"));
        }
        Ok(())
    }
}

/// Media server that records every call in order
#[derive(Default)]
pub struct MockMediaServer {
    pub ops: Mutex<Vec<String>>,
    pub consumes: Mutex<HashMap<ProducerId, usize>>,
    /// Producers created through this server; consuming them is rejected
    pub own_producers: Mutex<HashSet<ProducerId>>,
    pub failing: Mutex<HashSet<ProducerId>>,
    pub fail_produce: AtomicBool,
    serial: AtomicUsize,
}

impl MockMediaServer {
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    pub fn consume_count(&self, producer_id: &str) -> usize {
        self.consumes
            .lock()
            .get(&ProducerId::new(producer_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_consumes(&self) -> usize {
        self.consumes.lock().values().sum()
    }

    pub fn count_ops(&self, prefix: &str) -> usize {
        self.ops
            .lock()
            .iter()
            .filter(|op| op.starts_with(prefix))
            .count()
    }

    fn record(&self, op: String) {
        self.ops.lock().push(op);
    }
}

#[async_trait]
impl MediaServerApi for MockMediaServer {
    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        _dtls: &DtlsParameters,
    ) -> ClientResult<()> {
        self.record(format!("connect:{}", transport_id));
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &TransportId,
        _kind: MediaKind,
        _rtp_parameters: &RtpParameters,
    ) -> ClientResult<ProducerId> {
        self.record(format!("produce:{}", transport_id));
        if self.fail_produce.load(Ordering::SeqCst) {
            return Err(ClientError::network_error("produce refused"));
        }
        let n = self.serial.fetch_add(1, Ordering::SeqCst);
        let producer_id = ProducerId::new(format!("mic-{}", n));
        self.own_producers.lock().insert(producer_id.clone());
        Ok(producer_id)
    }

    async fn consume(
        &self,
        _transport_id: &TransportId,
        producer_id: &ProducerId,
        _capabilities: &RtpCapabilities,
    ) -> ClientResult<ConsumeResponse> {
        self.record(format!("consume:{}", producer_id));
        {
            let mut consumes = self.consumes.lock();
            *consumes.entry(producer_id.clone()).or_insert(0) += 1;
        }
        tokio::task::yield_now().await;

        if self.own_producers.lock().contains(producer_id) {
            return Err(ClientError::CannotConsumeOwnProducer {
                producer_id: producer_id.clone(),
            });
        }
        if self.failing.lock().contains(producer_id) {
            return Err(ClientError::consume_failed(producer_id, "router busy"));
        }
        let n = self.serial.fetch_add(1, Ordering::SeqCst);
        Ok(ConsumeResponse {
            consumer_id: ConsumerId::new(format!("c-{}-{}", producer_id, n)),
            producer_id: producer_id.clone(),
            kind: MediaKind::Audio,
            rtp_parameters: RtpParameters::default(),
        })
    }

    async fn close_producer(&self, producer_id: &ProducerId) -> ClientResult<()> {
        self.record(format!("close-producer:{}", producer_id));
        self.own_producers.lock().remove(producer_id);
        Ok(())
    }

    async fn close_consumer(&self, consumer_id: &ConsumerId) -> ClientResult<()> {
        self.record(format!("close-consumer:{}", consumer_id));
        Ok(())
    }

    async fn close_transport(&self, transport_id: &TransportId) -> ClientResult<()> {
        self.record(format!("close-transport:{}", transport_id));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDevice {
    pub reject_router: AtomicBool,
    pub no_microphone: AtomicBool,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

#[async_trait]
impl MediaDevice for MockDevice {
    async fn load(&self, router_capabilities: &RtpCapabilities) -> ClientResult<RtpCapabilities> {
        if self.reject_router.load(Ordering::SeqCst) {
            return Err(ClientError::capability_negotiation_failed(
                "no common audio codec",
            ));
        }
        Ok(router_capabilities.clone())
    }

    fn local_dtls_parameters(&self, _transport: &TransportParams) -> ClientResult<DtlsParameters> {
        Ok(DtlsParameters(serde_json::json!({ "role": "client" })))
    }

    fn send_parameters(&self, _track: &LocalTrack, encoding: &EncodingConfig) -> RtpParameters {
        let parameters = serde_json::json!({ "maxBitrate": encoding.max_bitrate_bps });
        RtpParameters(parameters)
    }

    async fn acquire_microphone(&self) -> ClientResult<LocalTrack> {
        if self.no_microphone.load(Ordering::SeqCst) {
            return Err(ClientError::MicrophoneUnavailable {
                reason: "permission denied".to_string(),
            });
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(LocalTrack {
            id: format!("mic-track-{}", n),
            kind: MediaKind::Audio,
        })
    }

    async fn release_track(&self, _track: &LocalTrack) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct TestRoom {
    pub signaling: Arc<MockSignaling>,
    pub media: Arc<MockMediaServer>,
    pub device: Arc<MockDevice>,
    pub client: Arc<RoomClient>,
    pub events: broadcast::Receiver<ClientEvent>,
}

impl TestRoom {
    pub fn new() -> Self {
        Self::with_timing(test_timing())
    }

    pub fn with_timing(timing: TimingConfig) -> Self {
        let config = ClientConfig::new()
            .with_client_id(LOCAL_CLIENT)
            .with_timing(timing);
        Self::with_config(config)
    }

    pub fn with_config(config: ClientConfig) -> Self {
        init_tracing();
        let signaling = Arc::new(MockSignaling::default());
        let media = Arc::new(MockMediaServer::default());
        let device = Arc::new(MockDevice::default());
        let client = ClientBuilder::new()
            .config(config.with_credentials(Credentials::bearer("test-token")))
            .signaling(signaling.clone())
            .media_server(media.clone())
            .device(device.clone())
            .build()
            .expect("Failed to build client");
        let events = client.subscribe_events();
        Self {
            signaling,
            media,
            device,
            client,
            events,
        }
    }

    /// Wait for the next event matching `predicate`, skipping others
    pub async fn expect_event<F>(&mut self, mut predicate: F) -> ClientEvent
    where
        F: FnMut(&ClientEvent) -> bool,
    {
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match self.events.recv().await {
                    Ok(event) if predicate(&event) => return event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("event stream closed: {}", e),
                }
            }
        })
        .await;
        result.expect("Timed out waiting for event")
    }

    pub fn set_roster(&self, roster: Vec<RosterEntry>) {
        self.signaling.set_roster(roster);
    }

    /// Drain every event currently buffered
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

/// Poll `condition` until it holds or five seconds pass
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    result.expect("Condition not met in time");
}

/// Await a future, failing the test if it takes longer than five seconds
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("Operation timed out")
}

pub fn any_consumer_active(event: &ClientEvent) -> bool {
    matches!(event, ClientEvent::ConsumerActive { .. })
}

/// Matches the activation of a consumer for `producer_id`
pub fn consumer_active(producer_id: &str) -> impl FnMut(&ClientEvent) -> bool + '_ {
    move |event| match event {
        ClientEvent::ConsumerActive { producer_id: p, .. } => p.as_str() == producer_id,
        _ => false,
    }
}

/// Matches the removal of the consumer for `producer_id`
pub fn consumer_removed(producer_id: &str) -> impl FnMut(&ClientEvent) -> bool + '_ {
    move |event| match event {
        ClientEvent::ConsumerRemoved { producer_id: p, .. } => p.as_str() == producer_id,
        _ => false,
    }
}

pub fn microphone_changed(enabled: bool) -> impl FnMut(&ClientEvent) -> bool {
    move |event| match event {
        ClientEvent::MicrophoneStateChanged { enabled: e, .. } => *e == enabled,
        _ => false,
    }
}
