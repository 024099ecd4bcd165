//! Core types: configuration model, capabilities, and status snapshots.
//!
//! Configuration types derive `serde` traits so a collaborator (config file,
//! settings UI) can supply them directly; snapshot types serialize for the
//! status push channel.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::band::{BandPreset, BandRange};
use crate::error::{Error, Result};

/// Default rigctld port a rig transport connects to.
pub const DEFAULT_RIGCTLD_PORT: u16 = 4532;

/// Default port the front-facing rigctl listener binds.
pub const DEFAULT_LISTEN_PORT: u16 = 4534;

/// Floor for the per-rig poll interval. Shorter configured values are clamped.
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Poll interval used when the configuration does not specify one.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 750;

/// A VFO selector, as used by `set_vfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vfo {
    /// VFO A.
    A,
    /// VFO B.
    B,
    /// Whatever VFO the rig currently has selected (`currVFO`).
    Current,
}

impl fmt::Display for Vfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Vfo::A => "VFOA",
            Vfo::B => "VFOB",
            Vfo::Current => "currVFO",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Vfo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "VFOA" | "A" | "MAIN" => Ok(Vfo::A),
            "VFOB" | "B" | "SUB" => Ok(Vfo::B),
            "CURRVFO" | "CURR" => Ok(Vfo::Current),
            other => Err(Error::InvalidConfig(format!("unknown VFO: {other}"))),
        }
    }
}

/// How a rig is reached on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Direct TCP to a running `rigctld`-compatible endpoint.
    Rigctld {
        /// Hostname or IP address.
        host: String,
        /// TCP port.
        #[serde(default = "default_rigctld_port")]
        port: u16,
    },
    /// A local `rigctl` subprocess in interactive mode, speaking the same
    /// text protocol over stdin/stdout.
    Rigctl {
        /// Hamlib model id (`rigctl -m`).
        model_id: u32,
        /// Serial device path (`rigctl -r`).
        device: String,
        /// Serial baud rate (`rigctl -s`).
        #[serde(default)]
        baud: Option<u32>,
        /// Extra arguments appended to the `rigctl` command line.
        #[serde(default)]
        extra_args: Option<String>,
    },
}

fn default_rigctld_port() -> u16 {
    DEFAULT_RIGCTLD_PORT
}

impl TransportConfig {
    /// A short label for logs ("host:port" or "rigctl model@device").
    pub fn describe(&self) -> String {
        match self {
            TransportConfig::Rigctld { host, port } => format!("{host}:{port}"),
            TransportConfig::Rigctl {
                model_id, device, ..
            } => format!("rigctl {model_id}@{device}"),
        }
    }

    /// The Hamlib model id, when the transport carries one.
    pub fn model_id(&self) -> Option<u32> {
        match self {
            TransportConfig::Rigctld { .. } => None,
            TransportConfig::Rigctl { model_id, .. } => Some(*model_id),
        }
    }
}

/// Configuration for one rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    /// Friendly name shown in the UI and logs.
    pub name: String,
    /// How to reach the rig.
    pub transport: TransportConfig,
    /// Whether the rig participates in polling and commands.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Whether the rig accepts mirrored state from the main rig.
    #[serde(default = "default_enabled")]
    pub follow_main: bool,
    /// Skip the band-validity check for this rig.
    #[serde(default)]
    pub allow_out_of_band: bool,
    /// Poll cadence in milliseconds; clamped to [`MIN_POLL_INTERVAL_MS`].
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Ordered band presets; enabled ones define the band policy.
    #[serde(default)]
    pub band_presets: Vec<BandPreset>,
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl RigConfig {
    /// A TCP-backed rig with defaults suitable for tests and examples.
    pub fn rigctld(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        RigConfig {
            name: name.into(),
            transport: TransportConfig::Rigctld {
                host: host.into(),
                port,
            },
            enabled: true,
            follow_main: true,
            allow_out_of_band: false,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            band_presets: Vec::new(),
        }
    }

    /// The poll interval with the configured floor applied.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    /// Validate preset ordering and label uniqueness.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for preset in &self.band_presets {
            preset.validate()?;
            if !seen.insert(preset.label.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "rig '{}': duplicate band preset label '{}'",
                    self.name, preset.label
                )));
            }
        }
        Ok(())
    }
}

/// Top-level application configuration.
///
/// The position of a rig in `rigs` identifies it for the lifetime of the
/// configuration; `sync_source_index` designates the main rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// The rigs, in UI order.
    #[serde(default)]
    pub rigs: Vec<RigConfig>,
    /// Index of the main rig (sync source, target of get commands).
    #[serde(default)]
    pub sync_source_index: usize,
    /// Global gate for main → follower mirroring.
    #[serde(default = "default_enabled")]
    pub sync_enabled: bool,
    /// Global gate for listener → rig forwarding.
    #[serde(default = "default_enabled")]
    pub rigctl_to_main_enabled: bool,
    /// Host the rigctl listener binds.
    #[serde(default = "default_listen_host")]
    pub rigctl_listen_host: String,
    /// Port the rigctl listener binds.
    #[serde(default = "default_listen_port")]
    pub rigctl_listen_port: u16,
    /// Master gate short-circuiting every client.
    #[serde(default = "default_enabled")]
    pub all_rigs_enabled: bool,
}

fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            rigs: Vec::new(),
            sync_source_index: 0,
            sync_enabled: true,
            rigctl_to_main_enabled: true,
            rigctl_listen_host: default_listen_host(),
            rigctl_listen_port: DEFAULT_LISTEN_PORT,
            all_rigs_enabled: true,
        }
    }
}

impl AppConfig {
    /// Validate rig configs and the sync source index.
    pub fn validate(&self) -> Result<()> {
        for rig in &self.rigs {
            rig.validate()?;
        }
        if !self.rigs.is_empty() && self.sync_source_index >= self.rigs.len() {
            return Err(Error::InvalidConfig(format!(
                "sync_source_index {} out of range (have {} rigs)",
                self.sync_source_index,
                self.rigs.len()
            )));
        }
        Ok(())
    }

    /// Clamp out-of-range values that should not hard-fail a hand-edited
    /// config file: sub-floor poll intervals are raised to the minimum.
    pub fn normalize(&mut self) {
        for rig in &mut self.rigs {
            if rig.poll_interval_ms < MIN_POLL_INTERVAL_MS {
                rig.poll_interval_ms = MIN_POLL_INTERVAL_MS;
            }
        }
    }

    /// The listener bind address as a `host:port` string.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.rigctl_listen_host, self.rigctl_listen_port)
    }
}

/// Capability flags for one rig, parsed from `dump_caps`.
///
/// Populated once per connection and cached until the connection drops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RigCapabilities {
    /// Can read frequency.
    pub freq_get: bool,
    /// Can set frequency.
    pub freq_set: bool,
    /// Can read mode.
    pub mode_get: bool,
    /// Can set mode.
    pub mode_set: bool,
    /// Can read the selected VFO.
    pub vfo_get: bool,
    /// Can select a VFO.
    pub vfo_set: bool,
    /// Can read PTT state.
    pub ptt_get: bool,
    /// Can key PTT.
    pub ptt_set: bool,
    /// Tunable frequency ranges, when reported.
    #[serde(default)]
    pub frequency_ranges: Vec<BandRange>,
}

impl RigCapabilities {
    /// Whether nothing at all has been detected. A connected rig always has
    /// non-empty capabilities.
    pub fn is_empty(&self) -> bool {
        !(self.freq_get
            || self.freq_set
            || self.mode_get
            || self.mode_set
            || self.vfo_get
            || self.vfo_set
            || self.ptt_get
            || self.ptt_set)
    }

    /// Whether both VFOs can be addressed, enabling the dual-VFO poll probe.
    pub fn dual_vfo(&self) -> bool {
        self.vfo_get && self.vfo_set && self.freq_get
    }
}

/// An immutable per-tick view of one rig's observable state.
///
/// Reborn on every poll iteration and after each successful set operation;
/// the status broadcaster aggregates these for subscribers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RigSnapshot {
    /// Position of the rig in the active configuration.
    pub index: usize,
    /// Friendly name from the configuration.
    pub name: String,
    /// Whether the transport is currently up.
    pub connected: bool,
    /// Whether the rig participates in polling and commands.
    pub enabled: bool,
    /// Whether the rig accepts mirrored state from the main rig.
    pub follow_main: bool,
    /// Hamlib model id for subprocess-backed rigs.
    pub model_id: Option<u32>,
    /// Frequency of the active VFO in hertz.
    pub frequency_hz: Option<u64>,
    /// VFO A frequency from the dual-VFO probe.
    pub frequency_a_hz: Option<u64>,
    /// VFO B frequency from the dual-VFO probe.
    pub frequency_b_hz: Option<u64>,
    /// The selected VFO as reported by the rig (e.g. "VFOA").
    pub vfo: Option<String>,
    /// Operating mode token as reported by the rig (e.g. "USB").
    pub mode: Option<String>,
    /// Passband width in hertz.
    pub passband_hz: Option<u32>,
    /// PTT state, when the rig reports one.
    pub ptt: Option<bool>,
    /// Cached capability flags; `None` until detected.
    pub caps: Option<RigCapabilities>,
    /// Supported mode tokens from `dump_caps`.
    pub modes: Vec<String>,
    /// Band presets from the configuration, echoed for the UI.
    pub band_presets: Vec<BandPreset>,
    /// Whether the band policy is bypassed for this rig.
    pub allow_out_of_band: bool,
    /// Why the rig is disconnected; empty string when connected.
    pub connection_error: String,
    /// The most recent per-operation error still standing.
    pub last_op_error: Option<String>,
}

/// A partial state change requested through the collaborator surface
/// (`set_rig`): only the present fields are applied, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RigControlRequest {
    /// New frequency in hertz.
    pub frequency_hz: Option<u64>,
    /// New mode token.
    pub mode: Option<String>,
    /// Passband for the mode change; `0` selects the backend default.
    pub passband: Option<u32>,
    /// VFO to select.
    pub vfo: Option<Vfo>,
    /// PTT state to key.
    pub ptt: Option<bool>,
}

impl RigControlRequest {
    /// Whether the request contains no changes.
    pub fn is_empty(&self) -> bool {
        self.frequency_hz.is_none()
            && self.mode.is_none()
            && self.vfo.is_none()
            && self.ptt.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vfo_display_round_trip() {
        for vfo in [Vfo::A, Vfo::B, Vfo::Current] {
            let parsed: Vfo = vfo.to_string().parse().unwrap();
            assert_eq!(vfo, parsed);
        }
        assert_eq!("vfoa".parse::<Vfo>().unwrap(), Vfo::A);
        assert!("VFOX".parse::<Vfo>().is_err());
    }

    #[test]
    fn poll_interval_clamped_to_floor() {
        let mut cfg = RigConfig::rigctld("a", "127.0.0.1", 4532);
        cfg.poll_interval_ms = 10;
        assert_eq!(cfg.poll_interval(), Duration::from_millis(100));

        cfg.poll_interval_ms = 100;
        assert_eq!(cfg.poll_interval(), Duration::from_millis(100));

        cfg.poll_interval_ms = 750;
        assert_eq!(cfg.poll_interval(), Duration::from_millis(750));
    }

    #[test]
    fn duplicate_preset_labels_rejected() {
        let mut cfg = RigConfig::rigctld("a", "127.0.0.1", 4532);
        cfg.band_presets = vec![
            crate::band::BandPreset::new("20m", 14_175_000, 14_000_000, 14_350_000),
            crate::band::BandPreset::new("20m", 14_074_000, 14_000_000, 14_350_000),
        ];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sync_source_index_validated() {
        let mut cfg = AppConfig {
            rigs: vec![RigConfig::rigctld("a", "127.0.0.1", 4532)],
            sync_source_index: 1,
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
        cfg.sync_source_index = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn normalize_raises_poll_floor() {
        let mut rig = RigConfig::rigctld("a", "127.0.0.1", 4532);
        rig.poll_interval_ms = 5;
        let mut cfg = AppConfig {
            rigs: vec![rig],
            ..AppConfig::default()
        };
        cfg.normalize();
        assert_eq!(cfg.rigs[0].poll_interval_ms, MIN_POLL_INTERVAL_MS);
    }

    #[test]
    fn empty_caps_detection() {
        let caps = RigCapabilities::default();
        assert!(caps.is_empty());
        let caps = RigCapabilities {
            freq_get: true,
            ..RigCapabilities::default()
        };
        assert!(!caps.is_empty());
    }

    #[test]
    fn dual_vfo_requires_get_set_and_freq() {
        let caps = RigCapabilities {
            vfo_get: true,
            vfo_set: true,
            freq_get: true,
            ..RigCapabilities::default()
        };
        assert!(caps.dual_vfo());
        let caps = RigCapabilities {
            vfo_get: true,
            freq_get: true,
            ..RigCapabilities::default()
        };
        assert!(!caps.dual_vfo());
    }

    #[test]
    fn transport_describe() {
        let t = TransportConfig::Rigctld {
            host: "localhost".into(),
            port: 4532,
        };
        assert_eq!(t.describe(), "localhost:4532");
        assert_eq!(t.model_id(), None);

        let t = TransportConfig::Rigctl {
            model_id: 1035,
            device: "/dev/ttyUSB0".into(),
            baud: Some(38_400),
            extra_args: None,
        };
        assert_eq!(t.describe(), "rigctl 1035@/dev/ttyUSB0");
        assert_eq!(t.model_id(), Some(1035));
    }

    #[test]
    fn control_request_emptiness() {
        assert!(RigControlRequest::default().is_empty());
        let req = RigControlRequest {
            frequency_hz: Some(14_074_000),
            ..RigControlRequest::default()
        };
        assert!(!req.is_empty());
    }
}
