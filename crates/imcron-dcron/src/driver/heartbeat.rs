//! Background heartbeat task shared by the drivers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DcronError, Result};

type Beat = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Start/stop bookkeeping for one driver's heartbeat loop.
pub(crate) struct HeartbeatSlot {
    started: AtomicBool,
    running: Mutex<Option<Running>>,
}

impl HeartbeatSlot {
    pub(crate) fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            running: Mutex::new(None),
        }
    }

    /// Claim the slot. Fails if the driver is already started.
    pub(crate) fn claim(&self) -> Result<()> {
        self.started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| DcronError::AlreadyStarted("driver"))
    }

    /// Give the slot back after a failed registration.
    pub(crate) fn release(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    /// Spawn the loop calling `beat` every `interval` until stopped.
    pub(crate) fn spawn(&self, node_id: String, interval: Duration, beat: Beat) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately; registration already happened.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(%node_id, "heartbeat stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = beat().await {
                            warn!(%node_id, error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        });

        *self.running.lock() = Some(Running { cancel, task });
    }

    /// Cancel the loop and wait for a beat already in flight to finish, so no
    /// write lands after the caller deregisters. Returns `true` only for the
    /// call that stopped it.
    pub(crate) async fn stop(&self) -> bool {
        let running = self.running.lock().take();
        self.started.store(false, Ordering::SeqCst);
        let Some(running) = running else {
            return false;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!(error = %e, "heartbeat task ended abnormally");
        }
        true
    }
}
