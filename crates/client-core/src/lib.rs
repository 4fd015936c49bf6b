//! Client-core: voice room media session reconciliation
//!
//! This crate keeps a participant's local media state in line with the room
//! it is in. It negotiates the send/receive transports against an SFU, keeps
//! exactly one consumer per remote producer, publishes the local microphone,
//! and reconciles all of it against a roster that arrives from three racing
//! sources: push events, a periodic poll, and forced refreshes.
//!
//! ## Layering
//! ```text
//! RoomClient ─► Reconciler ─► ConsumerStateStore ─► TransportNegotiator
//!     │             ▲                                    │
//!     │        RosterEvent channel                 MediaServerApi, MediaDevice
//!     └─► RosterPoller, KeepAlive ─► SignalingApi
//! ```
//!
//! The signaling endpoint, the media server and the local device are
//! collaborators supplied by the application through the traits in
//! [`signaling`], [`media_server`] and [`device`].

pub mod client;
pub mod consumer_store;
pub mod device;
pub mod error;
pub mod events;
pub mod media_server;
pub mod reconcile;
pub mod roster;
pub mod signaling;
pub mod transport;
pub mod types;

pub use client::{
    Client, ClientBuilder, ClientConfig, ConsumerStats, EncodingPreset, RoomClient, SessionState,
    SessionStats, TimingConfig,
};
pub use consumer_store::{ConsumerRecord, ConsumerStateStore, ConsumerStatus, EnsureOutcome};
pub use device::MediaDevice;
pub use error::{ClientError, ClientResult, ErrorSeverity};
pub use events::{
    ClientEvent, ClientEventHandler, EventEmitter, EventFilter, EventPriority, EventSubscription,
    SessionStatusInfo,
};
pub use media_server::{ConsumeResponse, MediaServerApi};
pub use reconcile::{ReconcileReport, Reconciler};
pub use roster::{PushEvent, RosterEvent, RosterFeed, RosterSource};
pub use signaling::{Credentials, JoinGrant, SignalingApi};
pub use transport::{
    ConsumerHandle, ProducerHandle, TransportDirection, TransportNegotiator, TransportState,
};
pub use types::{
    ClientId, ConsumerId, DtlsParameters, EncodingConfig, LocalTrack, MediaKind, ProducerId, RoomId,
    RosterEntry, RtpCapabilities, RtpParameters, SessionGeneration, TransportId, TransportParams,
};

/// Client-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
