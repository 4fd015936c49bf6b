//! Error types and handling for the client-core library
//!
//! This module defines all error types that can occur while a room session is
//! being established, reconciled, or torn down, and how each one should be
//! treated by the caller.
//!
//! # Error Severity
//!
//! Every error maps onto one of four handling classes (see [`ErrorSeverity`]):
//!
//! - **Fatal** - capability negotiation failed or the join was rejected. The
//!   join operation is aborted and the error is returned to the caller. Nothing
//!   is retried automatically.
//! - **Recoverable** - a single consume or produce failed. The consumer record
//!   is parked in `error` and the next reconciliation pass retries it.
//! - **Benign** - the media server refused to let us consume our own producer.
//!   The record is normalized to `active` without a handle and never retried.
//! - **Transient** - a roster poll or heartbeat timed out or failed. It is
//!   logged and the next scheduled attempt proceeds normally.
//!
//! ## Basic Pattern
//!
//! ```rust,no_run
//! # use huddle_client_core::{Client, ClientError, RoomId};
//! # use std::sync::Arc;
//! # async fn example(client: Arc<Client>) {
//! match client.join(RoomId::new("lobby"), false).await {
//!     Ok(()) => println!("joined"),
//!     Err(ClientError::JoinRejected { room_id, reason }) => {
//!         eprintln!("{} refused us: {}", room_id, reason);
//!     }
//!     Err(e) if e.is_fatal() => eprintln!("cannot join: {}", e),
//!     Err(e) => eprintln!("join failed: {}", e),
//! }
//! # }
//! ```

use thiserror::Error;

use crate::types::{ProducerId, RoomId, TransportId};

/// Result type alias for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

/// How an error must be handled by the session engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSeverity {
    /// Aborts session establishment; surfaced to the caller
    Fatal,
    /// Per-item failure, eligible for retry on the next pass
    Recoverable,
    /// Normalized to success, never retried
    Benign,
    /// Infrastructure hiccup; logged, next scheduled attempt proceeds
    Transient,
}

/// Comprehensive error types for room client operations
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Session establishment errors
    #[error("Join rejected for room {room_id}: {reason}")]
    JoinRejected { room_id: RoomId, reason: String },

    #[error("Device capability negotiation failed: {reason}")]
    CapabilityNegotiationFailed { reason: String },

    #[error("Not in a room")]
    NotInRoom,

    #[error("Already in room {room_id}")]
    AlreadyInRoom { room_id: RoomId },

    /// Transport errors
    #[error("Transport {transport_id} connect failed: {reason}")]
    TransportConnectFailed {
        transport_id: TransportId,
        reason: String,
    },

    #[error("Transport {transport_id} is closed")]
    TransportClosed { transport_id: TransportId },

    /// Producer / consumer errors
    #[error("Produce failed: {reason}")]
    ProduceFailed { reason: String },

    #[error("Consume failed for producer {producer_id}: {reason}")]
    ConsumeFailed {
        producer_id: ProducerId,
        reason: String,
    },

    #[error("Consume rejected for producer {producer_id}: {reason}")]
    ConsumeRejected {
        producer_id: ProducerId,
        reason: String,
    },

    #[error("Cannot consume own producer {producer_id}")]
    CannotConsumeOwnProducer { producer_id: ProducerId },

    #[error("Microphone unavailable: {reason}")]
    MicrophoneUnavailable { reason: String },

    /// Roster and keep-alive errors
    #[error("Roster fetch failed: {reason}")]
    RosterFetchFailed { reason: String },

    #[error("Heartbeat failed: {reason}")]
    HeartbeatFailed { reason: String },

    /// Network errors
    #[error("Network error: {reason}")]
    NetworkError { reason: String },

    /// Configuration errors
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Missing required configuration: {field}")]
    MissingConfiguration { field: String },

    /// Generic errors
    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Operation timeout after {duration_ms}ms")]
    OperationTimeout { duration_ms: u64 },
}

impl ClientError {
    /// Create a join rejected error
    pub fn join_rejected(room_id: &RoomId, reason: impl Into<String>) -> Self {
        Self::JoinRejected {
            room_id: room_id.clone(),
            reason: reason.into(),
        }
    }

    /// Create a capability negotiation error
    pub fn capability_negotiation_failed(reason: impl Into<String>) -> Self {
        Self::CapabilityNegotiationFailed {
            reason: reason.into(),
        }
    }

    /// Create a consume failed error
    pub fn consume_failed(producer_id: &ProducerId, reason: impl Into<String>) -> Self {
        Self::ConsumeFailed {
            producer_id: producer_id.clone(),
            reason: reason.into(),
        }
    }

    /// Create a produce failed error
    pub fn produce_failed(reason: impl Into<String>) -> Self {
        Self::ProduceFailed {
            reason: reason.into(),
        }
    }

    /// Create a network error
    pub fn network_error(reason: impl Into<String>) -> Self {
        Self::NetworkError {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self::InternalError {
            message: reason.into(),
        }
    }

    /// Whether the media server refused a consume because the producer is ours.
    ///
    /// Servers report this either as a dedicated rejection or as a free-form
    /// reason string, so both shapes are recognized.
    pub fn is_self_consume_rejection(&self) -> bool {
        match self {
            ClientError::CannotConsumeOwnProducer { .. } => true,
            ClientError::ConsumeRejected { reason, .. }
            | ClientError::ConsumeFailed { reason, .. } => {
                let reason = reason.to_ascii_lowercase();
                reason.contains("own producer") || reason.contains("cannot consume self")
            }
            _ => false,
        }
    }

    /// Check if this error aborts session establishment
    pub fn is_fatal(&self) -> bool {
        self.severity() == ErrorSeverity::Fatal
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.severity(),
            ErrorSeverity::Recoverable | ErrorSeverity::Transient
        )
    }

    /// Classify this error for handling
    pub fn severity(&self) -> ErrorSeverity {
        if self.is_self_consume_rejection() {
            return ErrorSeverity::Benign;
        }
        match self {
            ClientError::JoinRejected { .. }
            | ClientError::CapabilityNegotiationFailed { .. }
            | ClientError::InvalidConfiguration { .. }
            | ClientError::MissingConfiguration { .. } => ErrorSeverity::Fatal,

            ClientError::RosterFetchFailed { .. }
            | ClientError::HeartbeatFailed { .. }
            | ClientError::NetworkError { .. }
            | ClientError::OperationTimeout { .. } => ErrorSeverity::Transient,

            _ => ErrorSeverity::Recoverable,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::JoinRejected { .. }
            | ClientError::CapabilityNegotiationFailed { .. }
            | ClientError::NotInRoom
            | ClientError::AlreadyInRoom { .. } => "session",

            ClientError::TransportConnectFailed { .. }
            | ClientError::TransportClosed { .. } => "transport",

            ClientError::ProduceFailed { .. }
            | ClientError::ConsumeFailed { .. }
            | ClientError::ConsumeRejected { .. }
            | ClientError::CannotConsumeOwnProducer { .. }
            | ClientError::MicrophoneUnavailable { .. } => "media",

            ClientError::RosterFetchFailed { .. } | ClientError::HeartbeatFailed { .. } => "roster",

            ClientError::NetworkError { .. } => "network",

            ClientError::InvalidConfiguration { .. } | ClientError::MissingConfiguration { .. } => {
                "configuration"
            }

            ClientError::InternalError { .. } | ClientError::OperationTimeout { .. } => "system",
        }
    }
}
