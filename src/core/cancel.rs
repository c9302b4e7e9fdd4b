// src/core/cancel.rs — Cooperative cancellation for batch and continuous runs

use std::time::Duration;

/// Cancellation token shared between the CLI signal handler and the engine.
/// Checked at issue and tick boundaries, never mid-attempt.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Sleep for `dur`, waking early on cancel. Returns true if cancelled.
    pub async fn sleep_or_cancel(&self, dur: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        tokio::select! {
            _ = self.inner.cancelled() => true,
            _ = tokio::time::sleep(dur) => self.is_cancelled(),
        }
    }
}
