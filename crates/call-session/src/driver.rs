//! Periodic driver
//!
//! The engine itself never blocks or spawns. [`SessionDriver`] owns a
//! registry behind a mutex and drives it from a tokio task on a fixed
//! interval until shut down.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::registry::SessionRegistry;

pub struct SessionDriver {
    registry: Arc<Mutex<SessionRegistry>>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionDriver {
    /// Start driving `registry` every `drive_interval_ms`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(registry: SessionRegistry) -> Self {
        let interval = registry.config().drive_interval();
        let registry = Arc::new(Mutex::new(registry));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let driven = Arc::clone(&registry);
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Session driver started ({:?} interval)", interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = driven.lock().drive(Utc::now());
                        if report.events_processed > 0 || !report.released.is_empty() {
                            debug!(
                                "Drive processed {} events, released {} sessions",
                                report.events_processed,
                                report.released.len()
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Session driver stopped");
        });

        Self {
            registry,
            shutdown_tx,
            task,
        }
    }

    /// Shared registry for application operations between drives
    pub fn registry(&self) -> Arc<Mutex<SessionRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Stop the task and hand the registry back
    pub async fn shutdown(self) -> Arc<Mutex<SessionRegistry>> {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Session driver task ended abnormally: {}", e);
        }
        self.registry
    }
}
