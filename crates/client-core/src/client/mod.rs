//! Room client
//!
//! [`RoomClient`] ties the engine together: it runs the session lifecycle,
//! owns the session-scoped consumer store and reconciler, and drives the
//! roster poller, keep-alive and local microphone for the current room.

pub mod builder;
pub mod config;
pub mod keepalive;
pub mod manager;
pub mod microphone;
pub mod recovery;
pub mod types;

pub use builder::ClientBuilder;
pub use config::{ClientConfig, EncodingPreset, TimingConfig};
pub use keepalive::KeepAlive;
pub use manager::{RoomClient, SessionState};
pub use microphone::Microphone;
pub use recovery::with_timeout;
pub use types::{ConsumerStats, SessionStats};

pub type Client = RoomClient;
