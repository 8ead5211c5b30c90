//! Connection and stall timeouts for the in-flight request.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::time::timeout;
use tracing::warn;

use super::constants::{CONNECT_TIMEOUT, STALL_TIMEOUT};
use super::error::DownloadError;
use super::transport::{BodyStream, Transport, TransportRequest, TransportResponse};

/// Bounds how long a request may wait for headers and for each body chunk.
///
/// The stall window restarts with every chunk, so a slow but steady transfer
/// is never cut off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Supervisor {
    connect_timeout: Duration,
    stall_timeout: Duration,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            stall_timeout: STALL_TIMEOUT,
        }
    }
}

impl Supervisor {
    /// Creates a supervisor with explicit timeouts.
    #[must_use]
    pub fn new(connect_timeout: Duration, stall_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            stall_timeout,
        }
    }

    /// Sends `request`, giving up when no response head arrives in time.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ConnectTimeout`] on expiry or
    /// [`DownloadError::Transport`] when the transport fails.
    pub async fn send(
        &self,
        transport: &dyn Transport,
        request: TransportRequest,
    ) -> Result<TransportResponse, DownloadError> {
        let url = request.url.to_string();
        match timeout(self.connect_timeout, transport.send(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(source)) => Err(DownloadError::transport(url, source)),
            Err(_) => {
                warn!(url = %url, timeout_secs = self.connect_timeout.as_secs(), "connection timed out");
                Err(DownloadError::connect_timeout(
                    url,
                    self.connect_timeout.as_secs(),
                ))
            }
        }
    }

    /// Waits for the next body chunk; `Ok(None)` marks the end of the body.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Stalled`] on expiry or
    /// [`DownloadError::Transport`] when the stream fails.
    pub async fn next_chunk(
        &self,
        body: &mut BodyStream,
        url: &str,
    ) -> Result<Option<Bytes>, DownloadError> {
        match timeout(self.stall_timeout, body.next()).await {
            Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
            Ok(Some(Err(source))) => Err(DownloadError::transport(url, source)),
            Ok(None) => Ok(None),
            Err(_) => {
                warn!(url = %url, timeout_secs = self.stall_timeout.as_secs(), "download stalled");
                Err(DownloadError::stalled(url, self.stall_timeout.as_secs()))
            }
        }
    }
}
