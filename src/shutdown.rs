//! Process signal handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

/// Signals the process reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessSignal {
    /// Graceful shutdown (SIGTERM, SIGINT).
    Shutdown,
    /// SIGHUP; logged and otherwise ignored.
    Hangup,
}

impl std::fmt::Display for ProcessSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessSignal::Shutdown => write!(f, "SHUTDOWN"),
            ProcessSignal::Hangup => write!(f, "HANGUP"),
        }
    }
}

/// Fans OS signals out to the parts of the process that wait on them.
#[derive(Clone)]
pub(crate) struct SignalHandler {
    sender: broadcast::Sender<ProcessSignal>,
    shutdown_requested: Arc<AtomicBool>,
}

impl SignalHandler {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn send(&self, signal: ProcessSignal) {
        debug!("Sending signal: {}", signal);
        if signal == ProcessSignal::Shutdown {
            self.shutdown_requested.store(true, Ordering::SeqCst);
        }
        let _ = self.sender.send(signal);
    }

    pub(crate) fn request_shutdown(&self) {
        self.send(ProcessSignal::Shutdown);
    }

    pub(crate) fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested, including before the call.
    pub(crate) async fn wait_for_shutdown(&self) {
        let mut rx = self.sender.subscribe();
        loop {
            if self.is_shutdown_requested() {
                return;
            }
            match rx.recv().await {
                Ok(ProcessSignal::Shutdown) | Err(RecvError::Closed) => return,
                Ok(ProcessSignal::Hangup) | Err(RecvError::Lagged(_)) => {}
            }
        }
    }

    /// Set up OS signal handlers (Unix only).
    #[cfg(unix)]
    pub(crate) fn setup_os_signals(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let handler = self.clone();
        tokio::spawn(async move {
            while sigterm.recv().await.is_some() {
                info!("Received SIGTERM");
                handler.request_shutdown();
            }
        });

        let mut sigint = signal(SignalKind::interrupt())?;
        let handler = self.clone();
        tokio::spawn(async move {
            while sigint.recv().await.is_some() {
                info!("Received SIGINT");
                handler.request_shutdown();
            }
        });

        let mut sighup = signal(SignalKind::hangup())?;
        let handler = self.clone();
        tokio::spawn(async move {
            while sighup.recv().await.is_some() {
                info!("Received SIGHUP, configuration is only read at startup");
                handler.send(ProcessSignal::Hangup);
            }
        });

        info!("OS signal handlers installed (SIGTERM, SIGINT, SIGHUP)");
        Ok(())
    }

    /// Set up OS signal handlers (non-Unix fallback).
    #[cfg(not(unix))]
    pub(crate) fn setup_os_signals(&self) -> std::io::Result<()> {
        let handler = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                handler.request_shutdown();
            }
        });
        info!("OS signal handler installed (Ctrl+C)");
        Ok(())
    }
}
