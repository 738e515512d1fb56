//! Streaming HTTP transport over `reqwest`.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use stagehand_core::{HttpTransport, TaskError, TransferProgress, TransferRequest, TransferSink};
use tokio_util::sync::CancellationToken;

/// [`HttpTransport`] issuing plain GET requests.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Transport with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport sharing an existing client.
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn fetch(
        &self,
        request: &TransferRequest,
        sink: &mut dyn TransferSink,
        cancel: &CancellationToken,
    ) -> Result<(), TaskError> {
        let send = self
            .client
            .get(&request.url)
            .header(USER_AGENT, &request.user_agent)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TaskError::UserCanceled),
            response = send => response.map_err(|e| TaskError::transfer(format!("Failed to start download: {e}")))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TaskError::transfer_with_status(
                format!("Download failed: HTTP {status}"),
                status.as_u16(),
            ));
        }

        let total = response.content_length();
        let mut received: u64 = 0;
        sink.on_progress(TransferProgress { received, total });

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TaskError::UserCanceled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk
                .map_err(|e| TaskError::transfer(format!("Error reading download stream: {e}")))?;

            sink.on_write(&chunk)
                .map_err(|e| TaskError::from_write_error(&e))?;
            received += chunk.len() as u64;
            sink.on_progress(TransferProgress { received, total });
        }

        tracing::debug!(target: "stagehand.tool", url = %request.url, bytes = received, "Transfer complete");
        Ok(())
    }
}
