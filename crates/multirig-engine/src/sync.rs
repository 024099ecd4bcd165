//! Main → follower synchronization.
//!
//! One task observes the main rig's snapshot stream. When the source's
//! frequency, mode or passband changes, every other enabled rig with
//! `follow_main` receives the new values through its normal set operations,
//! concurrently across followers. Change detection is two-level: the engine
//! reacts only to source changes, and per-follower memory suppresses writes
//! whose value was already successfully written (or observed) on that
//! follower. A band rejection on one follower is recorded on that rig's
//! snapshot and does not stop the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use multirig_client::RigClient;
use multirig_core::types::RigSnapshot;

use crate::registry::RigRegistry;

/// Last values successfully pushed to (or observed on) one follower.
#[derive(Debug, Clone, Default)]
struct FollowerMemory {
    freq: Option<u64>,
    mode: Option<String>,
    passband: Option<u32>,
}

/// Handle to the running sync task.
pub struct SyncEngine {
    shutdown_tx: watch::Sender<bool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Start the engine against a registry.
    pub fn spawn(registry: Arc<RigRegistry>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(registry, shutdown_rx));
        SyncEngine {
            shutdown_tx,
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    /// Stop the engine.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().expect("sync task slot").take();
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

async fn run(registry: Arc<RigRegistry>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut generation_rx = registry.generation_watch();
    let mut memory: HashMap<usize, FollowerMemory> = HashMap::new();
    let mut last_source: Option<(Option<u64>, Option<String>, Option<u32>)> = None;

    'outer: loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let Some(main) = registry.main_client().await else {
            // Nothing to observe until a configuration arrives.
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = generation_rx.changed() => {
                    memory.clear();
                    last_source = None;
                }
            }
            continue;
        };
        let mut snapshot_rx = main.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break 'outer;
                    }
                }
                changed = generation_rx.changed() => {
                    if changed.is_err() {
                        break 'outer;
                    }
                    // New client generation: follower caches are stale.
                    memory.clear();
                    last_source = None;
                    continue 'outer;
                }
                changed = snapshot_rx.changed() => {
                    if changed.is_err() {
                        // The observed client was replaced.
                        continue 'outer;
                    }
                    let source = snapshot_rx.borrow_and_update().clone();
                    if !registry.flags().sync_enabled {
                        continue;
                    }
                    if !source.connected {
                        continue;
                    }
                    let tuple = (
                        source.frequency_hz,
                        source.mode.clone(),
                        source.passband_hz,
                    );
                    if last_source.as_ref() == Some(&tuple) {
                        continue;
                    }
                    trace!(freq = ?tuple.0, mode = ?tuple.1, "source rig changed");
                    sync_followers(&registry, &source, &mut memory).await;
                    last_source = Some(tuple);
                }
            }
        }
    }
    debug!("sync engine stopped");
}

/// Push the source values to every eligible follower, concurrently.
async fn sync_followers(
    registry: &RigRegistry,
    source: &RigSnapshot,
    memory: &mut HashMap<usize, FollowerMemory>,
) {
    let main_index = registry.flags().sync_source_index;
    let followers: Vec<Arc<RigClient>> = registry
        .clients()
        .await
        .into_iter()
        .filter(|c| c.index() != main_index && c.is_enabled() && c.follows_main())
        .collect();
    if followers.is_empty() {
        return;
    }

    let freq = source.frequency_hz;
    let mode = source.mode.clone();
    let passband = source.passband_hz;

    let jobs = followers.iter().map(|client| {
        let client = Arc::clone(client);
        let remembered = memory.get(&client.index()).cloned().unwrap_or_default();
        let mode = mode.clone();
        async move {
            let observed = client.get_status();
            let mut freq_written = None;
            let mut mode_written = None;

            if let Some(hz) = freq {
                let in_sync =
                    remembered.freq == Some(hz) || observed.frequency_hz == Some(hz);
                if in_sync {
                    freq_written = Some(hz);
                } else {
                    match client.set_frequency(hz).await {
                        Ok(()) => freq_written = Some(hz),
                        // Recorded on the follower's snapshot by the client;
                        // other followers proceed regardless.
                        Err(e) => {
                            warn!(rig = %client.name(), hz, error = %e, "follower frequency sync failed");
                        }
                    }
                }
            }

            if let Some(mode_token) = mode {
                let in_sync = (remembered.mode.as_deref() == Some(mode_token.as_str())
                    && remembered.passband == passband)
                    || (observed.mode.as_deref() == Some(mode_token.as_str())
                        && (passband.is_none() || observed.passband_hz == passband));
                if in_sync {
                    mode_written = Some((mode_token, passband));
                } else {
                    match client.set_mode(&mode_token, passband).await {
                        Ok(()) => mode_written = Some((mode_token, passband)),
                        Err(e) => {
                            warn!(rig = %client.name(), mode = %mode_token, error = %e, "follower mode sync failed");
                        }
                    }
                }
            }

            (client.index(), freq_written, mode_written)
        }
    });

    for (index, freq_written, mode_written) in join_all(jobs).await {
        let slot = memory.entry(index).or_default();
        if let Some(hz) = freq_written {
            slot.freq = Some(hz);
        }
        if let Some((mode_token, pb)) = mode_written {
            slot.mode = Some(mode_token);
            slot.passband = pb;
        }
    }
}
