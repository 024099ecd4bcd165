//! The rig registry: single owner of the client set.
//!
//! The registry builds [`RigClient`]s from an [`AppConfig`] and atomically
//! transitions between configurations: new clients start polling before the
//! old generation is shut down, and a generation counter lets dependents
//! (sync engine, broadcaster) discard stale per-rig state. Everything a
//! collaborator may do at runtime -- toggling rigs, steering the sync
//! source, issuing manual rig commands -- goes through here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use multirig_client::RigClient;
use multirig_core::debug::DebugEvent;
use multirig_core::error::{Error, Result};
use multirig_core::types::{
    AppConfig, RigCapabilities, RigControlRequest, RigSnapshot,
};

/// Grace period before an old client generation is torn down, letting
/// in-flight operations finish with a real error instead of vanishing.
const QUIESCENCE: Duration = Duration::from_millis(500);

/// Global toggles mirrored from the active configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFlags {
    /// Main → follower mirroring gate.
    pub sync_enabled: bool,
    /// Index of the main rig.
    pub sync_source_index: usize,
    /// Listener → rig forwarding gate.
    pub rigctl_to_main_enabled: bool,
    /// Master gate over every client.
    pub all_rigs_enabled: bool,
}

impl ControlFlags {
    fn from_config(cfg: &AppConfig) -> Self {
        ControlFlags {
            sync_enabled: cfg.sync_enabled,
            sync_source_index: cfg.sync_source_index,
            rigctl_to_main_enabled: cfg.rigctl_to_main_enabled,
            all_rigs_enabled: cfg.all_rigs_enabled,
        }
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

struct Inner {
    clients: Vec<Arc<RigClient>>,
    config: AppConfig,
}

/// Owns the set of rig clients and the active configuration.
pub struct RigRegistry {
    inner: RwLock<Inner>,
    master_enabled: Arc<AtomicBool>,
    generation_tx: watch::Sender<u64>,
    flags_tx: watch::Sender<ControlFlags>,
    flags_rx: watch::Receiver<ControlFlags>,
}

impl RigRegistry {
    /// An empty registry; call [`apply_config`](Self::apply_config) to
    /// populate it.
    pub fn new() -> Arc<Self> {
        let (generation_tx, _) = watch::channel(0);
        let (flags_tx, flags_rx) = watch::channel(ControlFlags::default());
        Arc::new(RigRegistry {
            inner: RwLock::new(Inner {
                clients: Vec::new(),
                config: AppConfig::default(),
            }),
            master_enabled: Arc::new(AtomicBool::new(true)),
            generation_tx,
            flags_tx,
            flags_rx,
        })
    }

    /// Atomically transition to a new configuration.
    ///
    /// New clients are built and begin polling first; the previous
    /// generation keeps serving in-flight operations for a quiescence
    /// window, then closes in the background.
    pub async fn apply_config(&self, mut cfg: AppConfig) -> Result<()> {
        cfg.normalize();
        cfg.validate()?;
        info!(rigs = cfg.rigs.len(), "applying configuration");

        self.master_enabled
            .store(cfg.all_rigs_enabled, Ordering::Relaxed);
        let new_clients: Vec<Arc<RigClient>> = cfg
            .rigs
            .iter()
            .enumerate()
            .map(|(index, rig_cfg)| {
                RigClient::spawn(index, rig_cfg.clone(), Arc::clone(&self.master_enabled))
            })
            .collect();

        let old_clients = {
            let mut inner = self.inner.write().await;
            inner.config = cfg.clone();
            std::mem::replace(&mut inner.clients, new_clients)
        };

        self.flags_tx.send_replace(ControlFlags::from_config(&cfg));
        self.generation_tx.send_modify(|g| *g += 1);

        if !old_clients.is_empty() {
            tokio::spawn(async move {
                tokio::time::sleep(QUIESCENCE).await;
                for client in old_clients {
                    client.close().await;
                }
                debug!("previous client generation closed");
            });
        }
        Ok(())
    }

    /// The active configuration.
    pub async fn config(&self) -> AppConfig {
        self.inner.read().await.config.clone()
    }

    /// Current global toggles.
    pub fn flags(&self) -> ControlFlags {
        *self.flags_rx.borrow()
    }

    /// Watch toggle changes.
    pub fn flags_watch(&self) -> watch::Receiver<ControlFlags> {
        self.flags_rx.clone()
    }

    /// Watch configuration generations. Bumped on every `apply_config`;
    /// dependents drop per-rig caches when it changes.
    pub fn generation_watch(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }

    /// All clients of the current generation.
    pub async fn clients(&self) -> Vec<Arc<RigClient>> {
        self.inner.read().await.clients.clone()
    }

    /// The client at `index`, if configured.
    pub async fn client(&self, index: usize) -> Option<Arc<RigClient>> {
        self.inner.read().await.clients.get(index).cloned()
    }

    /// Clients currently participating in commands.
    pub async fn enabled_clients(&self) -> Vec<Arc<RigClient>> {
        self.inner
            .read()
            .await
            .clients
            .iter()
            .filter(|c| c.is_enabled())
            .cloned()
            .collect()
    }

    /// The main (sync source) rig's client.
    pub async fn main_client(&self) -> Option<Arc<RigClient>> {
        let index = self.flags().sync_source_index;
        self.client(index).await
    }

    /// The main rig's latest snapshot.
    pub async fn main_snapshot(&self) -> Option<RigSnapshot> {
        Some(self.main_client().await?.get_status())
    }

    /// Latest snapshot of every rig, in configuration order.
    pub async fn snapshots(&self) -> Vec<RigSnapshot> {
        self.inner
            .read()
            .await
            .clients
            .iter()
            .map(|c| c.get_status())
            .collect()
    }

    // -- collaborator surface ---------------------------------------------

    /// Enable or disable one rig.
    pub async fn set_rig_enabled(&self, index: usize, enabled: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        let client = inner
            .clients
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(index))?;
        client.enable(enabled);
        if let Some(rig_cfg) = inner.config.rigs.get_mut(index) {
            rig_cfg.enabled = enabled;
        }
        Ok(())
    }

    /// Toggle whether one rig mirrors the main rig.
    pub async fn set_rig_follow_main(&self, index: usize, follow: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        let client = inner
            .clients
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(index))?;
        client.set_follow_main(follow);
        if let Some(rig_cfg) = inner.config.rigs.get_mut(index) {
            rig_cfg.follow_main = follow;
        }
        Ok(())
    }

    /// Gate main → follower mirroring.
    pub async fn set_sync_enabled(&self, enabled: bool) {
        self.inner.write().await.config.sync_enabled = enabled;
        self.flags_tx.send_modify(|f| f.sync_enabled = enabled);
    }

    /// Gate listener → rig forwarding.
    pub async fn set_rigctl_to_main_enabled(&self, enabled: bool) {
        self.inner.write().await.config.rigctl_to_main_enabled = enabled;
        self.flags_tx
            .send_modify(|f| f.rigctl_to_main_enabled = enabled);
    }

    /// Designate the main rig.
    pub async fn set_sync_source(&self, index: usize) -> Result<()> {
        let mut inner = self.inner.write().await;
        if index >= inner.clients.len() {
            return Err(out_of_range(index));
        }
        inner.config.sync_source_index = index;
        self.flags_tx.send_modify(|f| f.sync_source_index = index);
        Ok(())
    }

    /// Master enable gate over all rigs.
    pub async fn set_all_rigs_enabled(&self, enabled: bool) {
        self.master_enabled.store(enabled, Ordering::Relaxed);
        self.inner.write().await.config.all_rigs_enabled = enabled;
        self.flags_tx.send_modify(|f| f.all_rigs_enabled = enabled);
    }

    /// Apply a partial state change to one rig. Present fields are applied
    /// in order; the first error is returned after all were attempted.
    pub async fn set_rig(&self, index: usize, request: RigControlRequest) -> Result<()> {
        let client = self.client(index).await.ok_or_else(|| out_of_range(index))?;
        let mut first_err = None;

        if let Some(hz) = request.frequency_hz {
            if let Err(e) = client.set_frequency(hz).await {
                first_err.get_or_insert(e);
            }
        }
        if let Some(mode) = &request.mode {
            if let Err(e) = client.set_mode(mode, request.passband).await {
                first_err.get_or_insert(e);
            }
        }
        if let Some(vfo) = request.vfo {
            if let Err(e) = client.set_vfo(vfo).await {
                first_err.get_or_insert(e);
            }
        }
        if let Some(on) = request.ptt {
            if let Err(e) = client.set_ptt(on).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Copy the main rig's frequency and mode onto one rig, immediately.
    pub async fn sync_from_source(&self, index: usize) -> Result<()> {
        let source = self
            .main_snapshot()
            .await
            .ok_or_else(|| Error::InvalidConfig("no main rig configured".into()))?;
        let client = self.client(index).await.ok_or_else(|| out_of_range(index))?;
        if client.index() == self.flags().sync_source_index {
            return Ok(());
        }
        client.sync_from(&source).await
    }

    /// Re-read one rig's capabilities.
    pub async fn refresh_caps(&self, index: usize) -> Result<(RigCapabilities, Vec<String>)> {
        let client = self.client(index).await.ok_or_else(|| out_of_range(index))?;
        client.refresh_caps().await
    }

    /// The TX/RX debug ring of one rig.
    pub async fn read_debug_events(&self, index: usize) -> Option<Vec<DebugEvent>> {
        Some(self.client(index).await?.debug_events())
    }

    /// Close every client. The registry is unusable afterwards until a new
    /// configuration is applied.
    pub async fn shutdown(&self) {
        let clients = {
            let mut inner = self.inner.write().await;
            std::mem::take(&mut inner.clients)
        };
        for client in clients {
            client.close().await;
        }
        info!("registry shut down");
    }
}

fn out_of_range(index: usize) -> Error {
    Error::InvalidConfig(format!("rig index {index} out of range"))
}
