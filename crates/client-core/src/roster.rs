//! Roster sources
//!
//! Three triggers report which remote producers exist in a room: push events
//! from the room channel, a periodic poll of the full roster, and on-demand
//! forced refreshes. All of them are funneled into a single channel of tagged
//! [`RosterEvent`]s, drained by one reconciliation task. None of them keeps
//! its own record of what has already been handled.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::recovery::with_timeout;
use crate::error::{ClientError, ClientResult};
use crate::signaling::SignalingApi;
use crate::types::{ClientId, ProducerId, RoomId, RosterEntry, SessionGeneration};

/// Which trigger produced a roster event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RosterSource {
    Push,
    Poll,
    ForcedRefresh,
}

/// One unit of work for the reconciler
#[derive(Debug, Clone, PartialEq)]
pub enum RosterEvent {
    /// A single producer appeared. Additive only, never evaluates removals.
    Push(RosterEntry),
    /// A single producer left the room
    Removed(ProducerId),
    /// Full roster from the periodic poll
    PollSnapshot(Vec<RosterEntry>),
    /// Full roster fetched on demand
    ForcedRefresh(Vec<RosterEntry>),
}

impl RosterEvent {
    pub fn source(&self) -> RosterSource {
        match self {
            RosterEvent::Push(_) | RosterEvent::Removed(_) => RosterSource::Push,
            RosterEvent::PollSnapshot(_) => RosterSource::Poll,
            RosterEvent::ForcedRefresh(_) => RosterSource::ForcedRefresh,
        }
    }

    /// Whether this event carries the authoritative roster
    pub fn is_full_snapshot(&self) -> bool {
        matches!(
            self,
            RosterEvent::PollSnapshot(_) | RosterEvent::ForcedRefresh(_)
        )
    }
}

/// Push channel payloads as delivered by the room service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum PushEvent {
    #[serde(rename_all = "camelCase")]
    ProducerAdded {
        producer_id: ProducerId,
        owner_client_id: ClientId,
    },
    #[serde(rename_all = "camelCase")]
    ProducerRemoved { producer_id: ProducerId },
}

impl From<PushEvent> for RosterEvent {
    fn from(event: PushEvent) -> Self {
        match event {
            PushEvent::ProducerAdded {
                producer_id,
                owner_client_id,
            } => RosterEvent::Push(RosterEntry::new(producer_id, owner_client_id)),
            PushEvent::ProducerRemoved { producer_id } => RosterEvent::Removed(producer_id),
        }
    }
}

/// Sending half of a session's roster channel
#[derive(Debug, Clone)]
pub struct RosterFeed {
    generation: SessionGeneration,
    tx: mpsc::UnboundedSender<RosterEvent>,
}

impl RosterFeed {
    pub fn generation(&self) -> SessionGeneration {
        self.generation
    }

    /// Queue an event. Returns false once the session's reconciler is gone.
    pub fn send(&self, event: RosterEvent) -> bool {
        let source = event.source();
        match self.tx.send(event) {
            Ok(()) => true,
            Err(_) => {
                debug!(
                    generation = %self.generation,
                    ?source,
                    "Roster event dropped, session closed"
                );
                false
            }
        }
    }

    pub fn producer_added(&self, entry: RosterEntry) -> bool {
        self.send(RosterEvent::Push(entry))
    }

    pub fn producer_removed(&self, producer_id: ProducerId) -> bool {
        self.send(RosterEvent::Removed(producer_id))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create the roster channel for one session
pub fn channel(
    generation: SessionGeneration,
) -> (RosterFeed, mpsc::UnboundedReceiver<RosterEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RosterFeed { generation, tx }, rx)
}

/// Fetch the full roster under a bounded timeout
pub async fn fetch_snapshot(
    signaling: &dyn SignalingApi,
    room_id: &RoomId,
    timeout: Duration,
) -> ClientResult<Vec<RosterEntry>> {
    with_timeout("fetch_roster", timeout, signaling.fetch_roster(room_id))
        .await
        .map_err(|e| match e {
            ClientError::RosterFetchFailed { .. } => e,
            other => ClientError::RosterFetchFailed {
                reason: other.to_string(),
            },
        })
}

/// Periodic full-roster fetch
pub struct RosterPoller {
    signaling: Arc<dyn SignalingApi>,
    room_id: RoomId,
    interval: Duration,
    request_timeout: Duration,
    feed: RosterFeed,
}

impl RosterPoller {
    pub fn new(
        signaling: Arc<dyn SignalingApi>,
        room_id: RoomId,
        interval: Duration,
        request_timeout: Duration,
        feed: RosterFeed,
    ) -> Self {
        Self {
            signaling,
            room_id,
            interval,
            request_timeout,
            feed,
        }
    }

    /// Run one poll. Failures are transient: logged and left to the next tick.
    pub async fn poll_once(&self) -> bool {
        let signaling = self.signaling.as_ref();
        match fetch_snapshot(signaling, &self.room_id, self.request_timeout).await {
            Ok(roster) => {
                debug!(room_id = %self.room_id, producers = roster.len(), "Roster polled");
                self.feed.send(RosterEvent::PollSnapshot(roster))
            }
            Err(e) => {
                warn!(
                    room_id = %self.room_id,
                    error = %e,
                    category = e.category(),
                    "Roster poll failed"
                );
                !self.feed.is_closed()
            }
        }
    }

    /// Poll until cancelled. The first poll happens immediately.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let keep_going = tokio::select! {
                            _ = cancel.cancelled() => false,
                            alive = self.poll_once() => alive,
                        };
                        if !keep_going {
                            break;
                        }
                    }
                }
            }
            debug!(
                room_id = %self.room_id,
                generation = %self.feed.generation(),
                "Roster poller stopped"
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{Credentials, JoinGrant};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FixedRoster {
        roster: Mutex<Vec<RosterEntry>>,
        fail: AtomicBool,
        hang: AtomicBool,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl SignalingApi for FixedRoster {
        async fn join_room(
            &self,
            _room_id: &RoomId,
            _credentials: &Credentials,
        ) -> ClientResult<JoinGrant> {
            Err(ClientError::internal_error("unused"))
        }

        async fn leave_room(&self, _room_id: &RoomId) -> ClientResult<()> {
            Ok(())
        }

        async fn fetch_roster(&self, _room_id: &RoomId) -> ClientResult<Vec<RosterEntry>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::network_error("unreachable"));
            }
            Ok(self.roster.lock().clone())
        }

        async fn heartbeat(&self, _room_id: &RoomId, _client_id: &ClientId) -> ClientResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_push_event_wire_shape() {
        let added = r#"{"event":"producer-added","producerId":"p1","ownerClientId":"u2"}"#;
        let added: PushEvent = serde_json::from_str(added).unwrap();
        let expected = RosterEvent::Push(RosterEntry::new("p1", "u2"));
        assert_eq!(RosterEvent::from(added), expected);

        let removed = r#"{"event":"producer-removed","producerId":"p1"}"#;
        let removed: PushEvent = serde_json::from_str(removed).unwrap();
        let removed = RosterEvent::from(removed);
        assert_eq!(removed, RosterEvent::Removed(ProducerId::new("p1")));
        assert!(!removed.is_full_snapshot());
        assert_eq!(removed.source(), RosterSource::Push);
    }

    #[tokio::test]
    async fn test_feed_reports_closed_session() {
        let (feed, rx) = channel(SessionGeneration(3));
        assert!(feed.producer_added(RosterEntry::new("p1", "u2")));
        drop(rx);
        assert!(!feed.producer_removed(ProducerId::new("p1")));
        assert!(feed.is_closed());
    }

    #[tokio::test]
    async fn test_fetch_failures_are_roster_errors() {
        let signaling = FixedRoster::default();
        signaling.fail.store(true, Ordering::SeqCst);
        let room_id = RoomId::new("r1");
        let err = fetch_snapshot(&signaling, &room_id, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::RosterFetchFailed { .. }));

        signaling.fail.store(false, Ordering::SeqCst);
        signaling.hang.store(true, Ordering::SeqCst);
        let err = fetch_snapshot(&signaling, &room_id, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::RosterFetchFailed { .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_poller_sends_snapshots_and_survives_failures() {
        let signaling = Arc::new(FixedRoster::default());
        signaling.fail.store(true, Ordering::SeqCst);
        *signaling.roster.lock() = vec![RosterEntry::new("p1", "u2")];

        let (feed, mut rx) = channel(SessionGeneration(1));
        let cancel = CancellationToken::new();
        let poller = RosterPoller::new(
            signaling.clone(),
            RoomId::new("r1"),
            Duration::from_millis(10),
            Duration::from_secs(1),
            feed,
        );
        let task = poller.spawn(cancel.clone());

        while signaling.fetches.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        signaling.fail.store(false, Ordering::SeqCst);

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let expected = RosterEvent::PollSnapshot(vec![RosterEntry::new("p1", "u2")]);
        assert_eq!(event, expected);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
