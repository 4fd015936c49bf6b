//! Local microphone producer
//!
//! At most one microphone producer exists per session.

use tracing::{info, warn};

use crate::error::{ClientError, ClientResult};
use crate::transport::{ProducerHandle, Transport, TransportNegotiator};
use crate::types::EncodingConfig;

#[derive(Debug, Default)]
pub struct Microphone {
    producer: Option<ProducerHandle>,
}

impl Microphone {
    pub fn is_enabled(&self) -> bool {
        self.producer.is_some()
    }

    pub fn producer(&self) -> Option<&ProducerHandle> {
        self.producer.as_ref()
    }

    /// Capture the microphone and produce it on the send transport.
    ///
    /// Returns `Ok(false)` when a producer already exists.
    pub async fn enable(
        &mut self,
        negotiator: &TransportNegotiator,
        send: &Transport,
        encoding: &EncodingConfig,
    ) -> ClientResult<bool> {
        if self.producer.is_some() {
            return Ok(false);
        }

        let track = negotiator
            .device()
            .acquire_microphone()
            .await
            .map_err(|e| match e {
                ClientError::MicrophoneUnavailable { .. } => e,
                other => ClientError::MicrophoneUnavailable {
                    reason: other.to_string(),
                },
            })?;

        match negotiator.produce(send, track.clone(), encoding).await {
            Ok(handle) => {
                info!(
                    producer_id = %handle.id,
                    bitrate = encoding.max_bitrate_bps,
                    "Microphone enabled"
                );
                self.producer = Some(handle);
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "Microphone produce failed, releasing track");
                negotiator.device().release_track(&track).await;
                Err(e)
            }
        }
    }

    /// Close the producer and release the track. Returns false if there was none.
    pub async fn disable(&mut self, negotiator: &TransportNegotiator) -> bool {
        match self.producer.take() {
            Some(handle) => {
                negotiator.close_producer(&handle).await;
                info!(producer_id = %handle.id, "Microphone disabled");
                true
            }
            None => false,
        }
    }
}
