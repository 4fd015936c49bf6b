//! Event handling for client-core operations
//!
//! The engine reports everything the UI layer needs through [`ClientEvent`]s:
//! consumers appearing and disappearing, session state transitions, the
//! microphone flag, and connection health. Events can be consumed two ways:
//!
//! - a `tokio::sync::broadcast` stream from `Client::subscribe_events()`
//! - a [`ClientEventHandler`] registered through an [`EventSubscription`],
//!   optionally narrowed with an [`EventFilter`]
//!
//! ```rust,no_run
//! # use huddle_client_core::{Client, ClientEvent};
//! # use std::sync::Arc;
//! # async fn example(client: Arc<Client>) {
//! let mut events = client.subscribe_events();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             ClientEvent::ConsumerActive { producer_id, handle, .. } => {
//!                 println!("play {} via consumer {}", producer_id, handle.id);
//!             }
//!             ClientEvent::ConsumerRemoved { producer_id, .. } => {
//!                 println!("stop {}", producer_id);
//!             }
//!             _ => {}
//!         }
//!     }
//! });
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::client::manager::SessionState;
use crate::error::ClientError;
use crate::transport::ConsumerHandle;
use crate::types::{ProducerId, RoomId, SessionGeneration};

/// Information about a session state change
#[derive(Debug, Clone)]
pub struct SessionStatusInfo {
    pub room_id: Option<RoomId>,
    pub generation: Option<SessionGeneration>,
    pub previous_state: SessionState,
    pub new_state: SessionState,
    /// Reason for the state change (if available)
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Event priority levels for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    /// Routine bookkeeping
    Low,
    /// Consumer and microphone changes
    Normal,
    /// Session transitions, degraded connection
    High,
    /// Fatal errors
    Critical,
}

/// Comprehensive client event types
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A remote producer is now playable
    ConsumerActive {
        producer_id: ProducerId,
        handle: ConsumerHandle,
        generation: SessionGeneration,
    },
    /// A remote producer's consumer was closed
    ConsumerRemoved {
        producer_id: ProducerId,
        generation: SessionGeneration,
    },
    /// A consume attempt failed; it will be retried on the next pass
    ConsumerFailed {
        producer_id: ProducerId,
        error: ClientError,
        generation: SessionGeneration,
    },
    SessionStateChanged {
        info: SessionStatusInfo,
    },
    MicrophoneStateChanged {
        enabled: bool,
        room_id: RoomId,
    },
    /// Heartbeats have been failing; the session is kept alive
    ConnectionDegraded {
        room_id: RoomId,
        consecutive_failures: u32,
    },
    ConnectionRestored {
        room_id: RoomId,
    },
    ClientError {
        error: ClientError,
        room_id: Option<RoomId>,
    },
}

impl ClientEvent {
    /// Get the priority of this event
    pub fn priority(&self) -> EventPriority {
        match self {
            ClientEvent::ConsumerActive { .. }
            | ClientEvent::ConsumerRemoved { .. }
            | ClientEvent::MicrophoneStateChanged { .. } => EventPriority::Normal,
            ClientEvent::ConsumerFailed { .. } | ClientEvent::ConnectionRestored { .. } => {
                EventPriority::Low
            }
            ClientEvent::SessionStateChanged { .. } | ClientEvent::ConnectionDegraded { .. } => {
                EventPriority::High
            }
            ClientEvent::ClientError { error, .. } if error.is_fatal() => EventPriority::Critical,
            ClientEvent::ClientError { .. } => EventPriority::High,
        }
    }

    /// Get the producer ID associated with this event (if any)
    pub fn producer_id(&self) -> Option<&ProducerId> {
        match self {
            ClientEvent::ConsumerActive { producer_id, .. }
            | ClientEvent::ConsumerRemoved { producer_id, .. }
            | ClientEvent::ConsumerFailed { producer_id, .. } => Some(producer_id),
            _ => None,
        }
    }

    /// Check if this event passes the given filter
    pub fn passes_filter(&self, filter: &EventFilter) -> bool {
        if let Some(min_priority) = filter.min_priority {
            if self.priority() < min_priority {
                return false;
            }
        }

        if let Some(producer_ids) = &filter.producer_ids {
            match self.producer_id() {
                Some(producer_id) if producer_ids.contains(producer_id) => {}
                _ => return false,
            }
        }

        if let Some(states) = &filter.session_states {
            if let ClientEvent::SessionStateChanged { info } = self {
                if !states.contains(&info.new_state) {
                    return false;
                }
            }
        }

        true
    }
}

/// Event filtering options for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only receive consumer events for these producers
    pub producer_ids: Option<HashSet<ProducerId>>,
    /// Only receive transitions into these states
    pub session_states: Option<HashSet<SessionState>>,
    /// Minimum event priority level
    pub min_priority: Option<EventPriority>,
}

/// Upward interface to the UI layer.
///
/// Handlers run on the emitter's dispatch task, never on the task that
/// raised the event, so a handler may call back into the client.
#[async_trait]
pub trait ClientEventHandler: Send + Sync {
    async fn on_consumer_active(&self, producer_id: ProducerId, handle: ConsumerHandle);

    async fn on_consumer_removed(&self, producer_id: ProducerId);

    async fn on_session_state_changed(&self, info: SessionStatusInfo);

    async fn on_microphone_state_changed(&self, _enabled: bool) {}

    async fn on_consumer_failed(&self, _producer_id: ProducerId, _error: ClientError) {}

    /// Degraded when `degraded` is true, restored otherwise
    async fn on_connection_health(&self, _degraded: bool, _consecutive_failures: u32) {}

    async fn on_client_error(&self, _error: ClientError, _room_id: Option<RoomId>) {}

    async fn on_client_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::ConsumerActive {
                producer_id,
                handle,
                ..
            } => {
                self.on_consumer_active(producer_id, handle).await;
            }
            ClientEvent::ConsumerRemoved { producer_id, .. } => {
                self.on_consumer_removed(producer_id).await;
            }
            ClientEvent::ConsumerFailed {
                producer_id,
                error,
                ..
            } => {
                self.on_consumer_failed(producer_id, error).await;
            }
            ClientEvent::SessionStateChanged { info } => {
                self.on_session_state_changed(info).await;
            }
            ClientEvent::MicrophoneStateChanged { enabled, .. } => {
                self.on_microphone_state_changed(enabled).await;
            }
            ClientEvent::ConnectionDegraded {
                consecutive_failures,
                ..
            } => {
                self.on_connection_health(true, consecutive_failures).await;
            }
            ClientEvent::ConnectionRestored { .. } => {
                self.on_connection_health(false, 0).await;
            }
            ClientEvent::ClientError { error, room_id } => {
                self.on_client_error(error, room_id).await;
            }
        }
    }
}

/// Event subscription with filtering capabilities
#[derive(Clone)]
pub struct EventSubscription {
    handler: Arc<dyn ClientEventHandler>,
    filter: EventFilter,
    id: uuid::Uuid,
}

impl EventSubscription {
    pub fn new(handler: Arc<dyn ClientEventHandler>, filter: EventFilter) -> Self {
        Self {
            handler,
            filter,
            id: uuid::Uuid::new_v4(),
        }
    }

    /// Create a subscription that receives all events
    pub fn all_events(handler: Arc<dyn ClientEventHandler>) -> Self {
        Self::new(handler, EventFilter::default())
    }

    /// Create a subscription for one producer's consumer events only
    pub fn producer_events(handler: Arc<dyn ClientEventHandler>, producer_id: ProducerId) -> Self {
        let filter = EventFilter {
            producer_ids: Some(HashSet::from([producer_id])),
            ..Default::default()
        };
        Self::new(handler, filter)
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn should_receive(&self, event: &ClientEvent) -> bool {
        event.passes_filter(&self.filter)
    }

    pub async fn deliver_event(&self, event: ClientEvent) {
        if self.should_receive(&event) {
            self.handler.on_client_event(event).await;
        }
    }
}

type Subscriptions = Arc<RwLock<Vec<EventSubscription>>>;

/// Fans events out to the broadcast stream and to registered handlers.
///
/// Broadcast delivery happens inside [`emit`](Self::emit). Handlers are fed
/// by a dispatch task, started on the first event that has a subscriber,
/// which delivers events one at a time in emission order.
pub struct EventEmitter {
    subscriptions: Subscriptions,
    broadcast_tx: broadcast::Sender<ClientEvent>,
    dispatch_tx: Mutex<Option<mpsc::UnboundedSender<ClientEvent>>>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            broadcast_tx,
            dispatch_tx: Mutex::new(None),
        }
    }

    pub fn subscribe(&self, subscription: EventSubscription) -> uuid::Uuid {
        let id = subscription.id();
        self.subscriptions.write().push(subscription);
        id
    }

    pub fn unsubscribe(&self, subscription_id: uuid::Uuid) -> bool {
        let mut subscriptions = self.subscriptions.write();
        if let Some(pos) = subscriptions.iter().position(|s| s.id() == subscription_id) {
            subscriptions.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn subscribe_stream(&self) -> broadcast::Receiver<ClientEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Emit an event to the broadcast stream and queue it for handlers.
    ///
    /// Never waits on handler code. Must be called within a Tokio runtime.
    pub fn emit(&self, event: ClientEvent) {
        // No receivers is fine.
        let _ = self.broadcast_tx.send(event.clone());

        if self.subscriptions.read().is_empty() {
            return;
        }
        let mut dispatch_tx = self.dispatch_tx.lock();
        let tx = dispatch_tx.get_or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(dispatch(self.subscriptions.clone(), rx));
            tx
        });
        if tx.send(event).is_err() {
            tracing::error!("Event dispatch task has stopped");
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Runs until the emitter is dropped
async fn dispatch(subscriptions: Subscriptions, mut rx: mpsc::UnboundedReceiver<ClientEvent>) {
    while let Some(event) = rx.recv().await {
        let matching: Vec<_> = subscriptions
            .read()
            .iter()
            .filter(|subscription| subscription.should_receive(&event))
            .cloned()
            .collect();

        let tasks: Vec<_> = matching
            .into_iter()
            .map(|subscription| {
                let event = event.clone();
                tokio::spawn(async move {
                    subscription.deliver_event(event).await;
                })
            })
            .collect();

        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Error delivering event: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConsumerId, MediaKind, RtpParameters, TransportId};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingHandler {
        active: Mutex<Vec<ProducerId>>,
        removed: Mutex<Vec<ProducerId>>,
        states: Mutex<Vec<SessionState>>,
    }

    #[async_trait]
    impl ClientEventHandler for RecordingHandler {
        async fn on_consumer_active(&self, producer_id: ProducerId, _handle: ConsumerHandle) {
            self.active.lock().push(producer_id);
        }

        async fn on_consumer_removed(&self, producer_id: ProducerId) {
            self.removed.lock().push(producer_id);
        }

        async fn on_session_state_changed(&self, info: SessionStatusInfo) {
            self.states.lock().push(info.new_state);
        }
    }

    /// Blocks every delivery until released
    #[derive(Default)]
    struct GatedHandler {
        gate: Notify,
        seen: Mutex<Vec<SessionState>>,
    }

    #[async_trait]
    impl ClientEventHandler for GatedHandler {
        async fn on_consumer_active(&self, _producer_id: ProducerId, _handle: ConsumerHandle) {}

        async fn on_consumer_removed(&self, _producer_id: ProducerId) {}

        async fn on_session_state_changed(&self, info: SessionStatusInfo) {
            self.gate.notified().await;
            self.seen.lock().push(info.new_state);
        }
    }

    fn active(producer_id: &str) -> ClientEvent {
        ClientEvent::ConsumerActive {
            producer_id: ProducerId::new(producer_id),
            handle: ConsumerHandle {
                id: ConsumerId::new("c1"),
                producer_id: ProducerId::new(producer_id),
                kind: MediaKind::Audio,
                rtp_parameters: RtpParameters::default(),
                transport_id: TransportId::new("recv"),
            },
            generation: SessionGeneration(1),
        }
    }

    fn state_changed(new_state: SessionState) -> ClientEvent {
        ClientEvent::SessionStateChanged {
            info: SessionStatusInfo {
                room_id: None,
                generation: None,
                previous_state: SessionState::Disconnected,
                new_state,
                reason: None,
                timestamp: Utc::now(),
            },
        }
    }

    async fn eventually(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_handlers_and_stream_receive_events() {
        let emitter = EventEmitter::new(16);
        let handler = Arc::new(RecordingHandler::default());
        emitter.subscribe(EventSubscription::all_events(handler.clone()));
        let mut stream = emitter.subscribe_stream();

        emitter.emit(active("p1"));
        emitter.emit(ClientEvent::ConsumerRemoved {
            producer_id: ProducerId::new("p1"),
            generation: SessionGeneration(1),
        });

        let first = stream.recv().await.unwrap();
        let second = stream.recv().await.unwrap();
        assert!(matches!(first, ClientEvent::ConsumerActive { .. }));
        assert!(matches!(second, ClientEvent::ConsumerRemoved { .. }));

        eventually(|| handler.removed.lock().len() == 1).await;
        assert_eq!(handler.active.lock().as_slice(), &[ProducerId::new("p1")]);
        assert_eq!(handler.removed.lock().as_slice(), &[ProducerId::new("p1")]);
    }

    #[tokio::test]
    async fn test_producer_filter() {
        let emitter = EventEmitter::default();
        let handler = Arc::new(RecordingHandler::default());
        let subscription =
            EventSubscription::producer_events(handler.clone(), ProducerId::new("p2"));
        let id = emitter.subscribe(subscription);

        emitter.emit(active("p1"));
        emitter.emit(active("p2"));
        eventually(|| !handler.active.lock().is_empty()).await;
        assert_eq!(handler.active.lock().as_slice(), &[ProducerId::new("p2")]);

        assert!(emitter.unsubscribe(id));
        assert_eq!(emitter.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_emit_does_not_wait_for_handlers() {
        let emitter = EventEmitter::default();
        let handler = Arc::new(GatedHandler::default());
        emitter.subscribe(EventSubscription::all_events(handler.clone()));
        let mut stream = emitter.subscribe_stream();

        emitter.emit(state_changed(SessionState::Joining));
        emitter.emit(state_changed(SessionState::Connected));
        emitter.emit(state_changed(SessionState::Leaving));

        // The stream sees every event while the handler is still parked.
        for _ in 0..3 {
            assert!(stream.try_recv().is_ok());
        }
        assert!(handler.seen.lock().is_empty());

        let released = tokio::time::timeout(Duration::from_secs(2), async {
            while handler.seen.lock().len() < 3 {
                handler.gate.notify_one();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(released.is_ok());
        assert_eq!(
            handler.seen.lock().as_slice(),
            &[
                SessionState::Joining,
                SessionState::Connected,
                SessionState::Leaving
            ]
        );
    }

    #[test]
    fn test_priority_filter() {
        let filter = EventFilter {
            min_priority: Some(EventPriority::High),
            ..Default::default()
        };
        assert!(!active("p1").passes_filter(&filter));

        let fatal = ClientEvent::ClientError {
            error: ClientError::capability_negotiation_failed("no opus"),
            room_id: None,
        };
        assert_eq!(fatal.priority(), EventPriority::Critical);
        assert!(fatal.passes_filter(&filter));
    }
}
