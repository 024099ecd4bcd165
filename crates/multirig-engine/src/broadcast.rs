//! Status aggregation and push.
//!
//! The broadcaster assembles a [`StatusUpdate`] from every rig's latest
//! snapshot plus the global toggles, and publishes it through a
//! latest-value channel whenever something changed. Bursts coalesce at the
//! tick cadence; a slow subscriber only ever sees the newest update.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use multirig_core::events::StatusUpdate;

use crate::registry::RigRegistry;

/// Burst-coalescing window for status pushes.
const COALESCE_INTERVAL: Duration = Duration::from_millis(100);

/// Aggregates snapshots and pushes [`StatusUpdate`]s to subscribers.
pub struct StatusBroadcaster {
    update_rx: watch::Receiver<StatusUpdate>,
    shutdown_tx: watch::Sender<bool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StatusBroadcaster {
    /// Start the aggregation task against a registry.
    pub fn spawn(registry: Arc<RigRegistry>) -> Self {
        let (update_tx, update_rx) = watch::channel(StatusUpdate::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(registry, update_tx, shutdown_rx));
        StatusBroadcaster {
            update_rx,
            shutdown_tx,
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    /// Subscribe to status updates. The receiver always holds the newest
    /// update; intermediate ones are dropped for slow consumers.
    pub fn subscribe(&self) -> watch::Receiver<StatusUpdate> {
        self.update_rx.clone()
    }

    /// The most recently published update.
    pub fn latest(&self) -> StatusUpdate {
        self.update_rx.borrow().clone()
    }

    /// Stop the aggregation task.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().expect("broadcast task slot").take();
        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .is_err()
            {
                abort.abort();
            }
        }
    }
}

async fn run(
    registry: Arc<RigRegistry>,
    update_tx: watch::Sender<StatusUpdate>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(COALESCE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last: Option<StatusUpdate> = None;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {}
        }

        let flags = registry.flags();
        let update = StatusUpdate {
            rigs: registry.snapshots().await,
            sync_enabled: flags.sync_enabled,
            sync_source_index: flags.sync_source_index,
            rigctl_to_main_enabled: flags.rigctl_to_main_enabled,
            all_rigs_enabled: flags.all_rigs_enabled,
        };
        if last.as_ref() != Some(&update) {
            update_tx.send_replace(update.clone());
            last = Some(update);
        }
    }
    debug!("status broadcaster stopped");
}
