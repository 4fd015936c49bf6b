//! Signaling endpoint contract
//!
//! The room service's signaling endpoint grants room access, hands out the
//! transport parameters for a session, serves the producer roster and accepts
//! heartbeats. Applications plug in their own HTTP or websocket client by
//! implementing [`SignalingApi`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ClientResult;
use crate::types::{ClientId, RoomId, RosterEntry, RtpCapabilities, TransportParams};

/// Credentials presented when joining a room
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Bearer token issued by the room service
    pub token: String,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Everything the signaling endpoint returns for a successful join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGrant {
    pub send_transport: TransportParams,
    pub recv_transport: TransportParams,
    pub router_capabilities: RtpCapabilities,
}

/// Signaling endpoint used by the session lifecycle and the roster sources
#[async_trait]
pub trait SignalingApi: Send + Sync {
    /// Request access to a room. A rejection must be reported as
    /// [`ClientError::JoinRejected`](crate::ClientError::JoinRejected).
    async fn join_room(
        &self,
        room_id: &RoomId,
        credentials: &Credentials,
    ) -> ClientResult<JoinGrant>;

    /// Announce departure from a room
    async fn leave_room(&self, room_id: &RoomId) -> ClientResult<()>;

    /// Fetch the full producer roster of a room
    async fn fetch_roster(&self, room_id: &RoomId) -> ClientResult<Vec<RosterEntry>>;

    /// Keep-alive ping
    async fn heartbeat(&self, room_id: &RoomId, client_id: &ClientId) -> ClientResult<()>;
}
