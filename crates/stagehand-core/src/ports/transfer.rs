//! HTTP transfer port.
//!
//! Streams a remote resource chunk by chunk into a caller-provided sink.
//! The transport never buffers the whole payload.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::TaskError;

/// Request for a single streaming GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Resource to fetch.
    pub url: String,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
}

impl TransferRequest {
    /// Create a request with the given URL and user agent.
    pub fn new(url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// Byte progress of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferProgress {
    /// Bytes received so far.
    pub received: u64,
    /// Total size; `None` until the server has reported one.
    pub total: Option<u64>,
}

impl TransferProgress {
    /// Percent received, or `None` while the total is not yet determined.
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        match self.total {
            Some(total) if total > 0 => Some(crate::events::percent_of(self.received, total)),
            _ => None,
        }
    }
}

/// Receiver of transfer callbacks.
pub trait TransferSink: Send {
    /// Called after every chunk with updated totals.
    fn on_progress(&mut self, progress: TransferProgress);

    /// Called with each chunk as it arrives. An error aborts the transfer.
    fn on_write(&mut self, chunk: &[u8]) -> std::io::Result<()>;
}

/// Streaming HTTP transport.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Run the transfer to completion, error, or cancellation.
    ///
    /// Returns `TaskError::UserCanceled` when `cancel` fires and
    /// `TaskError::TransferWriteFailed` when the sink refuses a chunk.
    async fn fetch(
        &self,
        request: &TransferRequest,
        sink: &mut dyn TransferSink,
        cancel: &CancellationToken,
    ) -> Result<(), TaskError>;
}
