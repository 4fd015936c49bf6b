//! Room client and session lifecycle
//!
//! [`RoomClient`] owns at most one session at a time and drives it through
//!
//! ```text
//! Disconnected ──join──► Joining ──► Connected ──leave──────► Leaving ──────► Disconnected
//!                                        │
//!                                        └──reconnect──► Reconnecting ──► Disconnected ──► Joining ──► Connected
//! ```
//!
//! Everything a session builds (transports, consumer store, reconciler,
//! background tasks) lives in one session-scoped value that is torn down and
//! replaced wholesale on leave or reconnect. Nothing survives into the next
//! session except the room id and whether the microphone was on.
//!
//! Lifecycle operations are serialized by an async mutex. Roster events and
//! stats go through a separate lightweight view so they never wait on a join
//! in progress.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::config::ClientConfig;
use crate::client::keepalive::KeepAlive;
use crate::client::microphone::Microphone;
use crate::client::recovery::with_timeout;
use crate::client::types::{ConsumerStats, SessionStats};
use crate::consumer_store::ConsumerStateStore;
use crate::device::MediaDevice;
use crate::error::{ClientError, ClientResult};
use crate::events::{
    ClientEvent, ClientEventHandler, EventEmitter, EventSubscription, SessionStatusInfo,
};
use crate::media_server::MediaServerApi;
use crate::reconcile::Reconciler;
use crate::roster::{self, PushEvent, RosterEvent, RosterFeed, RosterPoller};
use crate::signaling::SignalingApi;
use crate::transport::{ReceivePath, TransportNegotiator, TransportPair};
use crate::types::{ClientId, RoomId, SessionGeneration};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Joining,
    Connected,
    Leaving,
    Reconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Joining => "joining",
            SessionState::Connected => "connected",
            SessionState::Leaving => "leaving",
            SessionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Everything one session owns. Fields are filled in as the join progresses,
/// so teardown works from any point.
struct ActiveSession {
    room_id: RoomId,
    generation: SessionGeneration,
    granted: bool,
    transports: Option<TransportPair>,
    store: Option<Arc<ConsumerStateStore>>,
    view: Option<SessionView>,
    microphone: Microphone,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ActiveSession {
    fn new(room_id: RoomId, generation: SessionGeneration) -> Self {
        Self {
            room_id,
            generation,
            granted: false,
            transports: None,
            store: None,
            view: None,
            microphone: Microphone::default(),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }
}

/// The parts of the current session reachable without the lifecycle lock
#[derive(Clone)]
struct SessionView {
    room_id: RoomId,
    generation: SessionGeneration,
    feed: RosterFeed,
    reconciler: Arc<Reconciler>,
    keepalive: Arc<KeepAlive>,
}

/// Client for one participant of an SFU voice room
pub struct RoomClient {
    config: ClientConfig,
    signaling: Arc<dyn SignalingApi>,
    negotiator: Arc<TransportNegotiator>,
    events: Arc<EventEmitter>,
    state: RwLock<SessionState>,
    session: Mutex<Option<ActiveSession>>,
    current: RwLock<Option<SessionView>>,
    last_room: RwLock<Option<RoomId>>,
    microphone_enabled: AtomicBool,
    generation: AtomicU64,
}

impl fmt::Debug for RoomClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomClient")
            .field("client_id", &self.config.client_id)
            .field("state", &self.state())
            .finish()
    }
}

impl RoomClient {
    /// Create a client from an already validated config.
    /// [`ClientBuilder`](crate::ClientBuilder) is the public entry point.
    pub(crate) fn new(
        config: ClientConfig,
        signaling: Arc<dyn SignalingApi>,
        media_server: Arc<dyn MediaServerApi>,
        device: Arc<dyn MediaDevice>,
    ) -> Self {
        let negotiator = Arc::new(TransportNegotiator::new(
            media_server,
            device,
            config.timing.request_timeout(),
        ));
        let events = Arc::new(EventEmitter::new(config.event_channel_capacity));
        Self {
            config,
            signaling,
            negotiator,
            events,
            state: RwLock::new(SessionState::Disconnected),
            session: Mutex::new(None),
            current: RwLock::new(None),
            last_room: RwLock::new(None),
            microphone_enabled: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.config.client_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn room_id(&self) -> Option<RoomId> {
        let current = self.current.read();
        current.as_ref().map(|view| view.room_id.clone())
    }

    /// Whether the microphone is on, or was on when the last session was torn down
    pub fn is_microphone_enabled(&self) -> bool {
        self.microphone_enabled.load(Ordering::SeqCst)
    }

    pub fn event_emitter(&self) -> &Arc<EventEmitter> {
        &self.events
    }

    /// Stream of every event emitted by this client
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe_stream()
    }

    /// Register a handler for all events. Returns the subscription id.
    ///
    /// Handlers may call back into the client, including `reconnect` and
    /// `leave`.
    pub fn subscribe(&self, handler: Arc<dyn ClientEventHandler>) -> uuid::Uuid {
        let subscription = EventSubscription::all_events(handler);
        self.events.subscribe(subscription)
    }

    /// Join a room, optionally publishing the microphone.
    ///
    /// Grant and capability failures are fatal: partial state is torn down,
    /// the client returns to `Disconnected` and the error is returned.
    /// A microphone failure is reported as an event and the join proceeds.
    pub async fn join(&self, room_id: impl Into<RoomId>, microphone: bool) -> ClientResult<()> {
        let room_id = room_id.into();
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Err(ClientError::AlreadyInRoom {
                room_id: session.room_id.clone(),
            });
        }
        self.microphone_enabled.store(false, Ordering::SeqCst);
        self.connect_session(&mut guard, room_id, microphone).await
    }

    /// Leave the current room. Safe to call at any time.
    pub async fn leave(&self) -> ClientResult<()> {
        let mut guard = self.session.lock().await;
        let Some(mut session) = guard.take() else {
            debug!("Leave requested with no active session");
            self.set_state(SessionState::Disconnected, None, None, None);
            return Ok(());
        };

        let room_id = session.room_id.clone();
        let generation = Some(session.generation);
        let microphone_was_on = session.microphone.is_enabled();
        self.set_state(SessionState::Leaving, Some(&room_id), generation, None);
        self.teardown(&mut session).await;
        if microphone_was_on {
            self.microphone_changed(false, &room_id);
        }
        self.set_state(
            SessionState::Disconnected,
            Some(&room_id),
            generation,
            Some("left room"),
        );
        Ok(())
    }

    /// Leave and rejoin the last room after the grace delay.
    ///
    /// If the microphone was on, it is restarted after a further delay and a
    /// forced roster refresh follows. Works from any state in which a room is
    /// known, including after a failed join.
    pub async fn reconnect(&self) -> ClientResult<()> {
        let mut guard = self.session.lock().await;
        let room_id = match guard.as_ref() {
            Some(session) => session.room_id.clone(),
            None => {
                let last_room = self.last_room.read().clone();
                last_room.ok_or(ClientError::NotInRoom)?
            }
        };
        let microphone_was_on = match guard.as_ref() {
            Some(session) => session.microphone.is_enabled(),
            None => self.microphone_enabled.load(Ordering::SeqCst),
        };

        info!(room_id = %room_id, microphone = microphone_was_on, "Reconnecting");
        let previous = guard.as_ref().map(|session| session.generation);
        self.set_state(SessionState::Reconnecting, Some(&room_id), previous, None);

        if let Some(mut session) = guard.take() {
            self.teardown(&mut session).await;
        }
        self.set_state(
            SessionState::Disconnected,
            Some(&room_id),
            previous,
            Some("reconnecting"),
        );

        tokio::time::sleep(self.config.timing.reconnect_grace()).await;
        self.connect_session(&mut guard, room_id.clone(), false)
            .await?;

        if microphone_was_on {
            tokio::time::sleep(self.config.timing.microphone_restart_delay()).await;
            if let Some(session) = guard.as_mut() {
                self.enable_microphone(session).await;
            }
            if let Err(e) = self.force_refresh().await {
                warn!(
                    room_id = %room_id,
                    error = %e,
                    "Forced refresh after microphone restart failed"
                );
            }
        }
        Ok(())
    }

    /// Turn the local microphone producer on or off
    pub async fn set_microphone_enabled(&self, enabled: bool) -> ClientResult<()> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(ClientError::NotInRoom)?;

        if enabled {
            let transports = session.transports.as_ref().ok_or(ClientError::NotInRoom)?;
            let produced = session
                .microphone
                .enable(&self.negotiator, &transports.send, &self.config.encoding)
                .await?;
            if produced {
                self.microphone_changed(true, &session.room_id);
            }
        } else if session.microphone.disable(&self.negotiator).await {
            self.microphone_changed(false, &session.room_id);
        }
        Ok(())
    }

    /// Fetch the full roster now and queue it for reconciliation
    pub async fn force_refresh(&self) -> ClientResult<()> {
        let (room_id, feed) = {
            let current = self.current.read();
            let view = current.as_ref().ok_or(ClientError::NotInRoom)?;
            (view.room_id.clone(), view.feed.clone())
        };
        let timeout = self.config.timing.request_timeout();
        let signaling = self.signaling.as_ref();
        let roster = roster::fetch_snapshot(signaling, &room_id, timeout).await?;
        debug!(room_id = %room_id, producers = roster.len(), "Forced roster refresh");
        if !feed.send(RosterEvent::ForcedRefresh(roster)) {
            return Err(ClientError::NotInRoom);
        }
        Ok(())
    }

    /// Feed a push channel event into the current session.
    ///
    /// Returns false when there is no session to deliver it to.
    pub fn on_push_event(&self, event: PushEvent) -> bool {
        match self.current.read().as_ref() {
            Some(view) => view.feed.send(event.into()),
            None => {
                debug!(?event, "Push event ignored, not in a room");
                false
            }
        }
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats::disconnected(self.state());
        if let Some(view) = self.current.read().as_ref() {
            stats.microphone_enabled = self.is_microphone_enabled();
            stats.room_id = Some(view.room_id.clone());
            stats.generation = Some(view.generation);
            stats.consumers = view.reconciler.store().stats();
            stats.push_events = view.reconciler.push_events();
            stats.poll_passes = view.reconciler.poll_passes();
            stats.forced_refreshes = view.reconciler.forced_refreshes();
            stats.consecutive_heartbeat_failures = view.keepalive.consecutive_failures();
            stats.connection_degraded = view.keepalive.is_degraded();
        }
        stats
    }

    /// Consumer counts of the current session
    pub fn consumer_stats(&self) -> ConsumerStats {
        self.stats().consumers
    }

    /// Build, start and install a session. On failure every partial
    /// resource is released and the client ends `Disconnected`.
    async fn connect_session(
        &self,
        slot: &mut Option<ActiveSession>,
        room_id: RoomId,
        microphone: bool,
    ) -> ClientResult<()> {
        let generation = SessionGeneration(self.generation.fetch_add(1, Ordering::SeqCst) + 1);
        *self.last_room.write() = Some(room_id.clone());
        self.set_state(
            SessionState::Joining,
            Some(&room_id),
            Some(generation),
            None,
        );

        let mut session = ActiveSession::new(room_id.clone(), generation);
        if let Err(e) = self.establish(&mut session).await {
            error!(
                room_id = %room_id,
                generation = %generation,
                error = %e,
                category = e.category(),
                "Join failed"
            );
            self.teardown(&mut session).await;
            let reason = e.to_string();
            self.set_state(
                SessionState::Disconnected,
                Some(&room_id),
                Some(generation),
                Some(reason.as_str()),
            );
            return Err(e);
        }

        if microphone {
            self.enable_microphone(&mut session).await;
        }
        self.start_background_tasks(&mut session);

        *self.current.write() = session.view.clone();
        *slot = Some(session);
        self.set_state(
            SessionState::Connected,
            Some(&room_id),
            Some(generation),
            None,
        );
        info!(room_id = %room_id, generation = %generation, "Joined room");
        Ok(())
    }

    /// Grant, transports, store and reconciler. Every step here is fatal.
    async fn establish(&self, session: &mut ActiveSession) -> ClientResult<()> {
        let grant = with_timeout(
            "join_room",
            self.config.timing.request_timeout(),
            self.signaling
                .join_room(&session.room_id, &self.config.credentials),
        )
        .await?;
        session.granted = true;

        let transports = self.negotiator.create_transports(&grant).await?;
        let factory = Arc::new(ReceivePath::new(self.negotiator.clone(), &transports));
        session.transports = Some(transports);

        let store = Arc::new(ConsumerStateStore::new(
            session.generation,
            factory,
            self.config.max_consume_attempts,
        ));
        session.store = Some(store.clone());

        let reconciler = Arc::new(Reconciler::new(
            store,
            self.config.client_id.clone(),
            self.events.clone(),
        ));
        let (feed, rx) = roster::channel(session.generation);
        // Left detached on teardown: an in-flight pass settles against the
        // closed store and its results are discarded.
        tokio::spawn(reconciler.clone().run(rx, session.cancel.clone()));

        session.view = Some(SessionView {
            room_id: session.room_id.clone(),
            generation: session.generation,
            feed,
            reconciler,
            keepalive: Arc::new(KeepAlive::new(
                session.room_id.clone(),
                self.config.timing.degraded_after_failures,
            )),
        });
        Ok(())
    }

    fn start_background_tasks(&self, session: &mut ActiveSession) {
        let Some(view) = session.view.as_ref() else {
            return;
        };
        let timing = &self.config.timing;

        let poller = RosterPoller::new(
            self.signaling.clone(),
            session.room_id.clone(),
            timing.poll_interval(),
            timing.request_timeout(),
            view.feed.clone(),
        );
        session.tasks.push(poller.spawn(session.cancel.clone()));

        session.tasks.push(view.keepalive.clone().spawn(
            self.signaling.clone(),
            self.config.client_id.clone(),
            timing.heartbeat_interval(),
            timing.request_timeout(),
            self.events.clone(),
            session.cancel.clone(),
        ));
    }

    /// Microphone failures never abort the session
    async fn enable_microphone(&self, session: &mut ActiveSession) {
        let Some(transports) = session.transports.as_ref() else {
            return;
        };
        let result = session
            .microphone
            .enable(&self.negotiator, &transports.send, &self.config.encoding)
            .await;
        match result {
            Ok(true) => self.microphone_changed(true, &session.room_id),
            Ok(false) => {}
            Err(e) => {
                warn!(room_id = %session.room_id, error = %e, "Microphone could not be enabled");
                self.events.emit(ClientEvent::ClientError {
                    error: e,
                    room_id: Some(session.room_id.clone()),
                });
                if self.microphone_enabled.load(Ordering::SeqCst) {
                    self.microphone_changed(false, &session.room_id);
                }
            }
        }
    }

    fn microphone_changed(&self, enabled: bool, room_id: &RoomId) {
        self.microphone_enabled.store(enabled, Ordering::SeqCst);
        self.events.emit(ClientEvent::MicrophoneStateChanged {
            enabled,
            room_id: room_id.clone(),
        });
    }

    /// Release everything a session holds. Every step tolerates the
    /// resource never having been created.
    async fn teardown(&self, session: &mut ActiveSession) {
        {
            let mut current = self.current.write();
            if current.as_ref().map(|view| view.generation) == Some(session.generation) {
                *current = None;
            }
        }

        session.cancel.cancel();
        for task in session.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(room_id = %session.room_id, error = %e, "Background task ended abnormally");
            }
        }

        // The flag is kept so a later reconnect knows to restart the microphone.
        session.microphone.disable(&self.negotiator).await;

        if let Some(transports) = session.transports.take() {
            self.negotiator.close_transport(&transports.send).await;
            self.negotiator.close_transport(&transports.recv).await;
        }

        if let Some(store) = session.store.take() {
            for handle in store.close().await {
                self.events.emit(ClientEvent::ConsumerRemoved {
                    producer_id: handle.producer_id,
                    generation: session.generation,
                });
            }
        }
        session.view = None;

        if session.granted {
            session.granted = false;
            let result = with_timeout(
                "leave_room",
                self.config.timing.request_timeout(),
                self.signaling.leave_room(&session.room_id),
            )
            .await;
            if let Err(e) = result {
                warn!(room_id = %session.room_id, error = %e, "Leave notification failed");
            }
        }
        debug!(room_id = %session.room_id, generation = %session.generation, "Session torn down");
    }

    fn set_state(
        &self,
        new_state: SessionState,
        room_id: Option<&RoomId>,
        generation: Option<SessionGeneration>,
        reason: Option<&str>,
    ) {
        let previous_state = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new_state)
        };
        if previous_state == new_state {
            return;
        }
        info!(from = %previous_state, to = %new_state, room_id = ?room_id, "Session state changed");
        self.events.emit(ClientEvent::SessionStateChanged {
            info: SessionStatusInfo {
                room_id: room_id.cloned(),
                generation,
                previous_state,
                new_state,
                reason: reason.map(str::to_string),
                timestamp: chrono::Utc::now(),
            },
        });
    }
}
