//! Graceful shutdown coordination
//!
//! Components subscribe before they start. On shutdown every subscriber gets
//! a signal, finishes its cleanup and drops its receiver; the coordinator
//! waits for all receivers to go away or for the grace period to run out.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Graceful,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

pub struct ShutdownCoordinator {
    state: Arc<RwLock<ShutdownState>>,
    tx: broadcast::Sender<ShutdownSignal>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// `grace` bounds how long [`shutdown`](Self::shutdown) waits for
    /// subscribers to finish
    pub fn new(grace: Duration) -> Self {
        let (tx, _) = broadcast::channel(4);
        Self {
            state: Arc::new(RwLock::new(ShutdownState::Running)),
            tx,
            grace,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.tx.subscribe()
    }

    /// Signal every subscriber and wait for them to drop their receivers.
    /// Returns `false` if the grace period ran out first.
    pub async fn shutdown(&self) -> bool {
        {
            let mut state = self.state.write().await;
            if *state != ShutdownState::Running {
                warn!("shutdown already in progress");
                return true;
            }
            *state = ShutdownState::Draining;
        }

        let subscribers = self.tx.send(ShutdownSignal::Graceful).unwrap_or(0);
        info!(subscribers, grace = ?self.grace, "shutting down");

        let drained = tokio::time::timeout(self.grace, async {
            while self.tx.receiver_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(remaining = self.tx.receiver_count(), "grace period elapsed before all components stopped");
        }
        *self.state.write().await = ShutdownState::Stopped;
        info!("shutdown complete");
        drained
    }

    pub async fn shutdown_immediately(&self) {
        *self.state.write().await = ShutdownState::Stopped;
        let _ = self.tx.send(ShutdownSignal::Immediate);
        warn!("immediate shutdown");
    }

    pub async fn is_shutting_down(&self) -> bool {
        *self.state.read().await != ShutdownState::Running
    }

    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }
}

/// Run `f` until it completes or a shutdown signal arrives, then run `cleanup`.
/// The receiver is dropped only after cleanup, which is what the coordinator
/// waits for.
pub async fn run_until_shutdown<F, C>(
    mut shutdown: broadcast::Receiver<ShutdownSignal>,
    component: &str,
    f: F,
    cleanup: C,
) where
    F: Future<Output = ()>,
    C: Future<Output = ()>,
{
    tokio::select! {
        _ = f => info!(component, "component finished"),
        signal = shutdown.recv() => match signal {
            Ok(signal) => info!(component, ?signal, "component stopping"),
            Err(e) => warn!(component, error = %e, "shutdown channel error"),
        },
    }
    cleanup.await;
    drop(shutdown);
}
