//! Timeout handling for network round-trips
//!
//! None of the negotiator, roster or keep-alive calls retry on their own. A
//! call that outlives its budget is turned into
//! [`ClientError::OperationTimeout`], which classifies as transient: the
//! caller logs it and the next scheduled attempt proceeds.

use crate::error::{ClientError, ClientResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run a network round-trip under a bounded timeout
///
/// # Examples
///
/// ```rust
/// # use huddle_client_core::client::recovery::with_timeout;
/// # use huddle_client_core::ClientError;
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() {
/// let result = with_timeout(
///     "fetch_roster",
///     Duration::from_millis(10),
///     async {
///         tokio::time::sleep(Duration::from_secs(1)).await;
///         Ok::<_, ClientError>(())
///     },
/// )
/// .await;
///
/// assert!(matches!(result, Err(ClientError::OperationTimeout { duration_ms: 10 })));
/// # }
/// ```
pub async fn with_timeout<T, F>(
    operation_name: &str,
    timeout: Duration,
    future: F,
) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation = operation_name,
                timeout_ms = timeout.as_millis() as u64,
                "Operation timed out"
            );
            Err(ClientError::OperationTimeout {
                duration_ms: timeout.as_millis() as u64,
            })
        }
    }
}
