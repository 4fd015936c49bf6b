//! Type definitions for the client-core library
//!
//! Snapshot types returned by the client for monitoring and UI display.

use serde::{Deserialize, Serialize};

use crate::client::manager::SessionState;
use crate::types::{RoomId, SessionGeneration};

/// Consumer record counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStats {
    pub idle: usize,
    pub creating: usize,
    /// Active with a playable handle
    pub active: usize,
    /// Active because the producer is our own (no handle)
    pub self_owned: usize,
    pub errored: usize,
}

impl ConsumerStats {
    pub fn total(&self) -> usize {
        self.idle + self.creating + self.active + self.self_owned + self.errored
    }
}

/// Statistics about the current session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub state: SessionState,
    pub room_id: Option<RoomId>,
    pub generation: Option<SessionGeneration>,
    pub microphone_enabled: bool,
    pub consumers: ConsumerStats,
    /// Reconciliation passes driven by each roster source
    pub push_events: u64,
    pub poll_passes: u64,
    pub forced_refreshes: u64,
    pub consecutive_heartbeat_failures: u32,
    pub connection_degraded: bool,
}

impl SessionStats {
    pub(crate) fn disconnected(state: SessionState) -> Self {
        Self {
            state,
            room_id: None,
            generation: None,
            microphone_enabled: false,
            consumers: ConsumerStats::default(),
            push_events: 0,
            poll_passes: 0,
            forced_refreshes: 0,
            consecutive_heartbeat_failures: 0,
            connection_degraded: false,
        }
    }
}
