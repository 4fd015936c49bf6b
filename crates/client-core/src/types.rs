//! Identifiers and value types shared by the session engine
//!
//! Negotiation parameters (ICE, DTLS, RTP) are carried as opaque JSON blobs.
//! The engine passes them between the signaling endpoint, the media server and
//! the local device without interpreting them.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Room identifier issued by the room service
    RoomId
);
string_id!(
    /// Identifier of one connected client (participant endpoint)
    ClientId
);
string_id!(
    /// Media server producer identifier
    ProducerId
);
string_id!(
    /// Media server consumer identifier
    ConsumerId
);
string_id!(
    /// Media server transport identifier
    TransportId
);

impl ClientId {
    /// Generate a random client id
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Monotonic tag identifying one join of one room.
///
/// Every join allocates a new generation. Results that resolve against an
/// older generation are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionGeneration(pub u64);

impl SessionGeneration {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Kind of media carried by a producer or consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Opaque DTLS parameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtlsParameters(pub serde_json::Value);

/// Opaque RTP capabilities (router or device)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub serde_json::Value);

/// Opaque RTP parameters for one producer or consumer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub serde_json::Value);

/// Server-issued parameters for one transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: TransportId,
    #[serde(default)]
    pub ice_parameters: serde_json::Value,
    #[serde(default)]
    pub ice_candidates: serde_json::Value,
    #[serde(default)]
    pub dtls_parameters: DtlsParameters,
}

impl TransportParams {
    pub fn new(id: impl Into<TransportId>) -> Self {
        Self {
            id: id.into(),
            ice_parameters: serde_json::Value::Null,
            ice_candidates: serde_json::Value::Null,
            dtls_parameters: DtlsParameters::default(),
        }
    }
}

/// One entry of a roster snapshot: a remote producer and who owns it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub producer_id: ProducerId,
    pub owner_client_id: ClientId,
}

impl RosterEntry {
    pub fn new(producer_id: impl Into<ProducerId>, owner: impl Into<ClientId>) -> Self {
        Self {
            producer_id: producer_id.into(),
            owner_client_id: owner.into(),
        }
    }
}

/// A captured local media track, as handed out by the device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
}

/// Encoding parameters for the local microphone producer.
///
/// Fixed for the lifetime of a producer; changing them requires a
/// microphone restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// Target bitrate in bits per second
    pub max_bitrate_bps: u32,
    /// Discontinuous transmission
    pub dtx: bool,
    /// In-band forward error correction
    pub fec: bool,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            max_bitrate_bps: 32_000,
            dtx: true,
            fec: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_entry_wire_shape() {
        let entry: RosterEntry =
            serde_json::from_str(r#"{"producerId":"p1","ownerClientId":"u2"}"#).unwrap();
        assert_eq!(entry, RosterEntry::new("p1", "u2"));
    }

    #[test]
    fn test_generation_ordering() {
        let first = SessionGeneration(1);
        assert!(first.next() > first);
        assert_eq!(first.next().to_string(), "gen-2");
    }
}
