use futures::future;
use tokio::select;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

/// Cooperative cancellation signal observed by the completion runner.
///
/// Cloning is cheap; every clone sees the same signal.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<Option<&'static str>>,
}

/// Fires a [`Cancellation`] created with [`Cancellation::manual`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<Option<&'static str>>,
}

impl CancelHandle {
    pub fn cancel(&self, reason: &'static str) {
        let _ = self.tx.send(Some(reason));
    }
}

impl Cancellation {
    /// Cancelled on SIGINT or SIGTERM.
    pub fn from_signals() -> Self {
        Self {
            rx: spawn_signal_listener(),
        }
    }

    /// Never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    pub fn manual() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(None);
        (CancelHandle { tx }, Self { rx })
    }

    /// Resolves once cancellation is requested. Pending forever if the sender is gone
    /// without ever firing.
    pub async fn cancelled(&self) -> &'static str {
        let mut rx = self.rx.clone();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return future::pending().await;
            }
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}

fn spawn_signal_listener() -> watch::Receiver<Option<&'static str>> {
    let (cancel_tx, cancel_rx) = watch::channel(None);

    tokio::spawn(async move {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).ok();

        let term_future = async {
            if let Some(ref mut sigterm) = sigterm {
                sigterm.recv().await;
                Some("SIGTERM")
            } else {
                future::pending::<Option<&'static str>>().await
            }
        };

        select! {
            res = signal::ctrl_c() => {
                if res.is_ok() {
                    info!("Received SIGINT. Cancelling running collections...");
                    let _ = cancel_tx.send(Some("SIGINT"));
                } else {
                    warn!("Failed to listen for SIGINT: {:?}", res.err());
                }
            }
            _ = term_future => {
                info!("Received SIGTERM. Cancelling running collections...");
                let _ = cancel_tx.send(Some("SIGTERM"));
            }
        }
    });

    cancel_rx
}
