//! Session keep-alive
//!
//! Sends a heartbeat at a fixed interval while the session is connected.
//! Heartbeat failures never tear the session down. After a run of
//! consecutive failures the connection is reported as degraded, once, and
//! the first success afterwards reports it restored.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::recovery::with_timeout;
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventEmitter};
use crate::signaling::SignalingApi;
use crate::types::{ClientId, RoomId};

/// Heartbeat failure tracking for one session
#[derive(Debug)]
pub struct KeepAlive {
    room_id: RoomId,
    threshold: u32,
    consecutive_failures: AtomicU32,
    degraded: AtomicBool,
}

impl KeepAlive {
    pub fn new(room_id: RoomId, threshold: u32) -> Self {
        Self {
            room_id,
            threshold: threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Returns the restored event if the connection had been reported degraded
    pub fn record_success(&self) -> Option<ClientEvent> {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!(room_id = %self.room_id, "Connection restored");
            return Some(ClientEvent::ConnectionRestored {
                room_id: self.room_id.clone(),
            });
        }
        None
    }

    /// Returns the degraded event when the failure run first reaches the threshold
    pub fn record_failure(&self, error: &ClientError) -> Option<ClientEvent> {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(
            room_id = %self.room_id,
            consecutive_failures = failures,
            error = %error,
            category = error.category(),
            "Heartbeat failed"
        );
        if failures >= self.threshold && !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(room_id = %self.room_id, consecutive_failures = failures, "Connection degraded");
            return Some(ClientEvent::ConnectionDegraded {
                room_id: self.room_id.clone(),
                consecutive_failures: failures,
            });
        }
        None
    }

    /// One heartbeat round-trip, with the outcome folded into the failure run
    pub async fn beat(
        &self,
        signaling: &dyn SignalingApi,
        client_id: &ClientId,
        timeout: Duration,
    ) -> (ClientResult<()>, Option<ClientEvent>) {
        let heartbeat = signaling.heartbeat(&self.room_id, client_id);
        let result = with_timeout("heartbeat", timeout, heartbeat)
            .await
            .map_err(|e| match e {
                ClientError::HeartbeatFailed { .. } => e,
                other => ClientError::HeartbeatFailed {
                    reason: other.to_string(),
                },
            });
        let event = match &result {
            Ok(()) => self.record_success(),
            Err(e) => self.record_failure(e),
        };
        (result, event)
    }

    /// Heartbeat until cancelled. The first beat is sent one interval after start.
    pub fn spawn(
        self: Arc<Self>,
        signaling: Arc<dyn SignalingApi>,
        client_id: ClientId,
        interval: Duration,
        timeout: Duration,
        events: Arc<EventEmitter>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let beat = tokio::select! {
                            _ = cancel.cancelled() => break,
                            beat = self.beat(signaling.as_ref(), &client_id, timeout) => beat,
                        };
                        if let (_, Some(event)) = beat {
                            events.emit(event);
                        }
                    }
                }
            }
            debug!(room_id = %self.room_id, "Keep-alive stopped");
        })
    }
}
