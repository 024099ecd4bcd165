//! The public stateful façade for one rig.
//!
//! A [`RigClient`] owns its [`RigConnection`] and runs a single poll task
//! that refreshes the rig's observable state at the configured cadence. The
//! latest [`RigSnapshot`] is published through a `watch` channel: the writer
//! never blocks on readers, and a reader always observes one consistent poll
//! iteration.
//!
//! Capabilities are detected once per connection via `dump_caps` and cached
//! until the transport drops. Set operations validate against the band
//! policy before any bytes reach the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use multirig_core::band::check_frequency;
use multirig_core::debug::DebugEvent;
use multirig_core::error::{Error, Result};
use multirig_core::types::{RigCapabilities, RigConfig, RigSnapshot, Vfo};
use multirig_proto::caps::parse_dump_caps;
use multirig_proto::command::RigctlCommand;
use multirig_proto::response::{
    dump_payload, parse_freq, parse_mode, parse_ptt, parse_vfo, RigctlReply,
};

use crate::connection::{ConnectionState, RigConnection};

/// Per-operation error slots; an error is cleared by the next success of the
/// same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    SetFreq,
    GetFreq,
    SetMode,
    GetMode,
    SetVfo,
    GetVfo,
    SetPtt,
    GetPtt,
    Powerstat,
    Caps,
}

#[derive(Debug, Default)]
struct OpErrors {
    /// Most recent error per kind, in recording order.
    entries: Vec<(OpKind, String)>,
}

impl OpErrors {
    fn record(&mut self, kind: OpKind, message: String) {
        self.entries.retain(|(k, _)| *k != kind);
        self.entries.push((kind, message));
    }

    fn clear(&mut self, kind: OpKind) {
        self.entries.retain(|(k, _)| *k != kind);
    }

    fn latest(&self) -> Option<String> {
        self.entries.last().map(|(_, m)| m.clone())
    }
}

#[derive(Debug, Clone, Default)]
struct CapsCache {
    caps: Option<RigCapabilities>,
    modes: Vec<String>,
    /// Set once a detection attempt ran for the current connection, pass or
    /// fail, so a sick rig is not hammered with `dump_caps`.
    detected: bool,
    /// `get_powerstat` answered "not implemented"; skip it from now on.
    powerstat_unsupported: bool,
}

/// Values gathered by one poll iteration.
#[derive(Debug, Default)]
struct Tick {
    freq: Option<u64>,
    mode: Option<String>,
    passband: Option<u32>,
    vfo: Option<String>,
    ptt: Option<bool>,
    freq_a: Option<u64>,
    freq_b: Option<u64>,
}

/// Stateful client for one rig.
pub struct RigClient {
    index: usize,
    cfg: RigConfig,
    conn: RigConnection,
    enabled: AtomicBool,
    follow_main: AtomicBool,
    /// Master gate shared by every client (`all_rigs_enabled`).
    master_enabled: Arc<AtomicBool>,
    caps: Mutex<CapsCache>,
    op_errors: Mutex<OpErrors>,
    snapshot_tx: watch::Sender<RigSnapshot>,
    snapshot_rx: watch::Receiver<RigSnapshot>,
    shutdown_tx: watch::Sender<bool>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl RigClient {
    /// Create the client and start its poll loop.
    pub fn spawn(index: usize, cfg: RigConfig, master_enabled: Arc<AtomicBool>) -> Arc<Self> {
        let conn = RigConnection::spawn(cfg.name.clone(), cfg.transport.clone());
        let initial = RigSnapshot {
            index,
            name: cfg.name.clone(),
            enabled: cfg.enabled,
            follow_main: cfg.follow_main,
            model_id: cfg.transport.model_id(),
            band_presets: cfg.band_presets.clone(),
            allow_out_of_band: cfg.allow_out_of_band,
            ..RigSnapshot::default()
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let client = Arc::new(RigClient {
            index,
            enabled: AtomicBool::new(cfg.enabled),
            follow_main: AtomicBool::new(cfg.follow_main),
            cfg,
            conn,
            master_enabled,
            caps: Mutex::new(CapsCache::default()),
            op_errors: Mutex::new(OpErrors::default()),
            snapshot_tx,
            snapshot_rx,
            shutdown_tx,
            poll_task: Mutex::new(None),
        });

        let task = tokio::spawn(Self::poll_loop(Arc::clone(&client), shutdown_rx));
        *client.poll_task.lock().expect("poll task slot") = Some(task);
        client
    }

    /// Position of this rig in the active configuration.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The rig's configured name.
    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    /// The configuration this client was built from.
    pub fn config(&self) -> &RigConfig {
        &self.cfg
    }

    /// Whether this rig currently participates in polling and commands.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed) && self.master_enabled.load(Ordering::Relaxed)
    }

    /// Whether this rig mirrors the main rig.
    pub fn follows_main(&self) -> bool {
        self.follow_main.load(Ordering::Relaxed)
    }

    /// Non-blocking read of the latest snapshot.
    pub fn get_status(&self) -> RigSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Watch snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<RigSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Copy of the connection's TX/RX debug ring.
    pub fn debug_events(&self) -> Vec<DebugEvent> {
        self.conn.debug_events()
    }

    /// Handle to the rig's debug ring, for recording rig-scoped events from
    /// the listener fan-out path.
    pub fn debug_ring(&self) -> multirig_core::debug::DebugRing {
        self.conn.debug_ring()
    }

    /// Set the frequency, honoring the band policy.
    ///
    /// An out-of-band frequency fails with [`Error::Band`] before any bytes
    /// reach the wire (unless `allow_out_of_band` is configured).
    pub async fn set_frequency(&self, hz: u64) -> Result<()> {
        self.ensure_commandable()?;
        if let Err(e) = check_frequency(&self.cfg.band_presets, self.cfg.allow_out_of_band, hz) {
            warn!(rig = %self.cfg.name, hz, "frequency rejected by band policy");
            self.record_error(OpKind::SetFreq, &e);
            return Err(e);
        }
        match self.conn.submit(RigctlCommand::SetFreq(hz)).await {
            Ok(_) => {
                debug!(rig = %self.cfg.name, hz, "frequency set");
                self.clear_error(OpKind::SetFreq);
                self.snapshot_tx
                    .send_modify(|s| s.frequency_hz = Some(hz));
                Ok(())
            }
            Err(e) => {
                self.record_error(OpKind::SetFreq, &e);
                Err(e)
            }
        }
    }

    /// Set the operating mode. A `None` (or zero) passband selects the
    /// backend's default width.
    pub async fn set_mode(&self, mode: &str, passband: Option<u32>) -> Result<()> {
        self.ensure_commandable()?;
        let cmd = RigctlCommand::SetMode {
            mode: mode.to_string(),
            passband: passband.filter(|pb| *pb != 0),
        };
        match self.conn.submit(cmd).await {
            Ok(_) => {
                debug!(rig = %self.cfg.name, mode, ?passband, "mode set");
                self.clear_error(OpKind::SetMode);
                self.snapshot_tx.send_modify(|s| {
                    s.mode = Some(mode.to_string());
                    if let Some(pb) = passband.filter(|pb| *pb != 0) {
                        s.passband_hz = Some(pb);
                    }
                });
                Ok(())
            }
            Err(e) => {
                self.record_error(OpKind::SetMode, &e);
                Err(e)
            }
        }
    }

    /// Select a VFO.
    pub async fn set_vfo(&self, vfo: Vfo) -> Result<()> {
        self.ensure_commandable()?;
        match self.conn.submit(RigctlCommand::SetVfo(vfo.to_string())).await {
            Ok(_) => {
                self.clear_error(OpKind::SetVfo);
                self.snapshot_tx.send_modify(|s| s.vfo = Some(vfo.to_string()));
                Ok(())
            }
            Err(e) => {
                self.record_error(OpKind::SetVfo, &e);
                Err(e)
            }
        }
    }

    /// Key or unkey the transmitter.
    pub async fn set_ptt(&self, on: bool) -> Result<()> {
        self.ensure_commandable()?;
        match self.conn.submit(RigctlCommand::SetPtt(on)).await {
            Ok(_) => {
                self.clear_error(OpKind::SetPtt);
                self.snapshot_tx.send_modify(|s| s.ptt = Some(on));
                Ok(())
            }
            Err(e) => {
                self.record_error(OpKind::SetPtt, &e);
                Err(e)
            }
        }
    }

    /// Copy frequency and mode from another rig's snapshot through the
    /// normal set operations. Partial success is permitted; the first error
    /// is returned after both fields were attempted.
    pub async fn sync_from(&self, source: &RigSnapshot) -> Result<()> {
        let mut first_err = None;
        if let Some(hz) = source.frequency_hz {
            if let Err(e) = self.set_frequency(hz).await {
                first_err.get_or_insert(e);
            }
        }
        if let Some(mode) = &source.mode {
            if let Err(e) = self.set_mode(mode, source.passband_hz).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Pass an opaque command through to the rig (`get_level`, `set_conf`,
    /// `get_conf`, ...). The raw reply lines and `RPRT` code surface to the
    /// caller unchanged.
    pub async fn raw_command(&self, cmd: RigctlCommand) -> Result<RigctlReply> {
        self.ensure_commandable()?;
        self.conn.submit(cmd).await
    }

    /// Enable or disable participation in polling and commands.
    pub fn enable(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        self.snapshot_tx.send_modify(|s| s.enabled = enabled);
    }

    /// Toggle whether this rig mirrors the main rig.
    pub fn set_follow_main(&self, follow: bool) {
        self.follow_main.store(follow, Ordering::Relaxed);
        self.snapshot_tx.send_modify(|s| s.follow_main = follow);
    }

    /// Force a re-read of `dump_caps`, replacing the cached capabilities and
    /// mode list.
    pub async fn refresh_caps(&self) -> Result<(RigCapabilities, Vec<String>)> {
        self.ensure_commandable()?;
        self.fetch_caps().await?;
        let cache = self.caps.lock().expect("caps cache");
        Ok((cache.caps.clone().unwrap_or_default(), cache.modes.clone()))
    }

    /// Signal the poll loop to stop and close the connection.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.poll_task.lock().expect("poll task slot").take();
        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .is_err()
            {
                abort.abort();
            }
        }
        self.conn.close().await;
    }

    // -- internals ---------------------------------------------------------

    fn ensure_commandable(&self) -> Result<()> {
        if !self.is_enabled() {
            return Err(Error::Disabled);
        }
        Ok(())
    }

    fn record_error(&self, kind: OpKind, e: &Error) {
        let latest = {
            let mut errors = self.op_errors.lock().expect("op errors");
            errors.record(kind, e.to_string());
            errors.latest()
        };
        self.snapshot_tx.send_modify(|s| s.last_op_error = latest);
    }

    fn clear_error(&self, kind: OpKind) {
        let latest = {
            let mut errors = self.op_errors.lock().expect("op errors");
            errors.clear(kind);
            errors.latest()
        };
        self.snapshot_tx.send_modify(|s| s.last_op_error = latest);
    }

    async fn fetch_caps(&self) -> Result<()> {
        let reply = self.conn.submit(RigctlCommand::DumpCaps).await?;
        let lines = dump_payload(&reply, "dump_caps");
        let (caps, modes) = parse_dump_caps(&lines);
        debug!(
            rig = %self.cfg.name,
            modes = modes.len(),
            "capabilities detected"
        );
        let mut cache = self.caps.lock().expect("caps cache");
        cache.caps = Some(caps);
        cache.modes = modes;
        cache.detected = true;
        Ok(())
    }

    /// Detect capabilities once per connection. A failed attempt still marks
    /// the connection as probed so the rig is not spammed with `dump_caps`.
    async fn ensure_caps(&self) {
        if self.caps.lock().expect("caps cache").detected {
            return;
        }
        if let Err(e) = self.fetch_caps().await {
            warn!(rig = %self.cfg.name, error = %e, "capability detection failed");
            self.record_error(OpKind::Caps, &e);
            self.caps.lock().expect("caps cache").detected = true;
        } else {
            self.clear_error(OpKind::Caps);
        }
    }

    /// Drop cached capabilities when the transport goes down; they are
    /// re-detected on the next connection.
    fn reset_caps(&self) {
        let mut cache = self.caps.lock().expect("caps cache");
        cache.caps = None;
        cache.modes.clear();
        cache.detected = false;
        cache.powerstat_unsupported = false;
    }

    async fn poll_loop(this: Arc<RigClient>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(this.cfg.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut was_connected = false;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {}
            }

            if !this.is_enabled() {
                this.publish_passive();
                continue;
            }

            match this.conn.state() {
                ConnectionState::Connected => {}
                ConnectionState::Closed => break,
                _ => {
                    if was_connected {
                        this.reset_caps();
                        was_connected = false;
                    }
                    this.publish_passive();
                    continue;
                }
            }
            was_connected = true;

            this.ensure_caps().await;
            let tick = this.poll_once().await;
            this.publish_tick(tick);
        }
        debug!(rig = %this.cfg.name, "poll loop stopped");
    }

    /// One best-effort poll iteration. Individual failures record
    /// `last_op_error` and the loop moves on.
    async fn poll_once(&self) -> Tick {
        let mut tick = Tick::default();
        let (caps, powerstat_unsupported) = {
            let cache = self.caps.lock().expect("caps cache");
            (cache.caps.clone().unwrap_or_default(), cache.powerstat_unsupported)
        };

        if !powerstat_unsupported {
            match self.conn.submit(RigctlCommand::GetPowerstat).await {
                Ok(_) => self.clear_error(OpKind::Powerstat),
                Err(Error::Rig { code: -4 | -11, .. }) => {
                    self.caps.lock().expect("caps cache").powerstat_unsupported = true;
                }
                Err(e) => {
                    self.record_error(OpKind::Powerstat, &e);
                    if e.is_io() {
                        return tick;
                    }
                }
            }
        }

        match self.conn.submit(RigctlCommand::GetFreq).await {
            Ok(reply) => match parse_freq(&reply) {
                Some(hz) => {
                    tick.freq = Some(hz);
                    self.clear_error(OpKind::GetFreq);
                }
                None => self.record_error(
                    OpKind::GetFreq,
                    &Error::Protocol("unparseable frequency".into()),
                ),
            },
            Err(e) => {
                self.record_error(OpKind::GetFreq, &e);
                if e.is_io() {
                    return tick;
                }
            }
        }

        match self.conn.submit(RigctlCommand::GetMode).await {
            Ok(reply) => {
                let (mode, passband) = parse_mode(&reply);
                tick.mode = mode;
                tick.passband = passband;
                self.clear_error(OpKind::GetMode);
            }
            Err(e) => {
                self.record_error(OpKind::GetMode, &e);
                if e.is_io() {
                    return tick;
                }
            }
        }

        match self.conn.submit(RigctlCommand::GetVfo).await {
            Ok(reply) => {
                tick.vfo = parse_vfo(&reply);
                self.clear_error(OpKind::GetVfo);
            }
            Err(e) => {
                self.record_error(OpKind::GetVfo, &e);
                if e.is_io() {
                    return tick;
                }
            }
        }

        if caps.ptt_get {
            match self.conn.submit(RigctlCommand::GetPtt).await {
                Ok(reply) => {
                    tick.ptt = parse_ptt(&reply);
                    self.clear_error(OpKind::GetPtt);
                }
                Err(e) => {
                    self.record_error(OpKind::GetPtt, &e);
                    if e.is_io() {
                        return tick;
                    }
                }
            }
        }

        if caps.dual_vfo() {
            self.probe_vfo_frequencies(&mut tick).await;
        }

        tick
    }

    /// Read both VFO frequencies via `set_vfo` + `get_freq`, restoring the
    /// active VFO afterwards.
    async fn probe_vfo_frequencies(&self, tick: &mut Tick) {
        for (vfo, slot) in [(Vfo::A, 0usize), (Vfo::B, 1usize)] {
            let selected = self
                .conn
                .submit(RigctlCommand::SetVfo(vfo.to_string()))
                .await;
            if selected.is_err() {
                return;
            }
            if let Ok(reply) = self.conn.submit(RigctlCommand::GetFreq).await {
                let hz = parse_freq(&reply);
                match slot {
                    0 => tick.freq_a = hz,
                    _ => tick.freq_b = hz,
                }
            }
        }
        // Put the rig back on the VFO it was using.
        let restore = tick
            .vfo
            .clone()
            .unwrap_or_else(|| Vfo::Current.to_string());
        let _ = self.conn.submit(RigctlCommand::SetVfo(restore)).await;
    }

    /// Publish a full snapshot for one completed poll iteration.
    fn publish_tick(&self, tick: Tick) {
        let snapshot = self.build_snapshot(Some(tick));
        self.snapshot_tx.send_replace(snapshot);
    }

    /// Publish connection/enable state without fresh poll data (rig disabled
    /// or disconnected). Last observed values are retained.
    fn publish_passive(&self) {
        let (connected, connection_error) = self.connection_status();
        let enabled = self.is_enabled();
        let follow_main = self.follows_main();
        let caps_empty = self.caps.lock().expect("caps cache").caps.is_none();
        self.snapshot_tx.send_modify(|s| {
            s.connected = connected;
            s.connection_error = connection_error;
            s.enabled = enabled;
            s.follow_main = follow_main;
            if caps_empty {
                s.caps = None;
            }
        });
    }

    fn connection_status(&self) -> (bool, String) {
        match self.conn.state() {
            ConnectionState::Connected => (true, String::new()),
            ConnectionState::Disconnected { error } => (false, error),
            ConnectionState::Connecting => (false, String::new()),
            ConnectionState::Closed => (false, "closed".to_string()),
        }
    }

    fn build_snapshot(&self, tick: Option<Tick>) -> RigSnapshot {
        let (connected, connection_error) = self.connection_status();
        let cache = self.caps.lock().expect("caps cache").clone();
        let last_op_error = self.op_errors.lock().expect("op errors").latest();
        let tick = tick.unwrap_or_default();

        RigSnapshot {
            index: self.index,
            name: self.cfg.name.clone(),
            connected,
            enabled: self.is_enabled(),
            follow_main: self.follows_main(),
            model_id: self.cfg.transport.model_id(),
            frequency_hz: tick.freq,
            frequency_a_hz: tick.freq_a,
            frequency_b_hz: tick.freq_b,
            vfo: tick.vfo,
            mode: tick.mode,
            passband_hz: tick.passband,
            ptt: tick.ptt,
            caps: if connected { cache.caps } else { None },
            modes: cache.modes,
            band_presets: self.cfg.band_presets.clone(),
            allow_out_of_band: self.cfg.allow_out_of_band,
            connection_error,
            last_op_error,
        }
    }
}
