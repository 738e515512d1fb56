//! Fake HTTP transports.

use std::sync::Arc;

use async_trait::async_trait;
use stagehand_core::{HttpTransport, TaskError, TransferProgress, TransferRequest, TransferSink};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Serves `body`, holding after `hold_at` bytes until released or cancelled.
pub struct HeldTransport {
    body: Vec<u8>,
    hold_at: usize,
    report_total: bool,
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl HeldTransport {
    /// Hold once `percent` of a 100-byte body has been delivered.
    pub fn holding_at(percent: usize) -> Self {
        Self {
            body: (0..100u8).collect(),
            hold_at: percent,
            report_total: true,
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }

    /// Never tell the sink the total size.
    pub fn without_total(mut self) -> Self {
        self.report_total = false;
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    fn progress(&self, received: usize) -> TransferProgress {
        TransferProgress {
            received: received as u64,
            total: self.report_total.then_some(self.body.len() as u64),
        }
    }
}

#[async_trait]
impl HttpTransport for HeldTransport {
    async fn fetch(
        &self,
        _request: &TransferRequest,
        sink: &mut dyn TransferSink,
        cancel: &CancellationToken,
    ) -> Result<(), TaskError> {
        sink.on_progress(self.progress(0));

        let (head, tail) = self.body.split_at(self.hold_at);
        sink.on_write(head)
            .map_err(|e| TaskError::from_write_error(&e))?;
        sink.on_progress(self.progress(head.len()));
        self.reached.notify_one();

        tokio::select! {
            () = cancel.cancelled() => return Err(TaskError::UserCanceled),
            () = self.release.notified() => {}
        }

        sink.on_write(tail)
            .map_err(|e| TaskError::from_write_error(&e))?;
        sink.on_progress(self.progress(self.body.len()));
        Ok(())
    }
}

/// Writes part of a body, then fails with `error`.
pub struct FailingTransport {
    pub error: TaskError,
}

#[async_trait]
impl HttpTransport for FailingTransport {
    async fn fetch(
        &self,
        _request: &TransferRequest,
        sink: &mut dyn TransferSink,
        _cancel: &CancellationToken,
    ) -> Result<(), TaskError> {
        sink.on_progress(TransferProgress {
            received: 0,
            total: Some(10),
        });
        sink.on_write(b"MZ\x90\x00")
            .map_err(|e| TaskError::from_write_error(&e))?;
        Err(self.error.clone())
    }
}
