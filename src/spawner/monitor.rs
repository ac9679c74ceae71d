//! Background liveness monitor started by `Spawner::start_polling`.
//!
//! Polls a backend on a fixed interval until it reports an exit or the
//! monitor is cancelled. On exit every registered callback fires once and
//! the loop ends.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::PollStatus;
use crate::Result;

/// Callback fired with the exit status when a monitored backend dies.
pub type ExitCallback = Arc<dyn Fn(i32) + Send + Sync>;

/// Handle to a running liveness loop. Dropping it cancels the loop.
#[derive(Debug)]
pub struct LivenessMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LivenessMonitor {
    /// Spawn the polling loop.
    ///
    /// `label` identifies the backend in logs.
    #[must_use]
    pub fn start<F, Fut>(
        label: String,
        interval: Duration,
        mut poll: F,
        callbacks: Vec<ExitCallback>,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<PollStatus>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            debug!(label = %label, ?interval, "liveness monitor started");
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        debug!(label = %label, "liveness monitor stopped");
                        break;
                    }
                    () = tokio::time::sleep(interval) => {}
                }

                match poll().await {
                    Ok(PollStatus::Running) => {}
                    Ok(PollStatus::Exited(code)) => {
                        info!(label = %label, code, "monitored server exited");
                        for callback in &callbacks {
                            callback(code);
                        }
                        break;
                    }
                    Err(err) => {
                        warn!(label = %label, %err, "liveness poll failed");
                    }
                }
            }
        });
        Self { cancel, handle }
    }

    /// Stop the loop. Callbacks will not fire afterwards.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the loop has ended, by exit detection or cancellation.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
