//! Band presets and the band-validity policy.
//!
//! Each rig carries an ordered list of [`BandPreset`]s. Presets serve two
//! purposes: the UI offers them as one-click tuning targets, and the enabled
//! ones define the frequency ranges a rig is willing to accept when
//! `allow_out_of_band` is off.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A labeled band with an optional default center frequency.
///
/// `lower_hz`/`upper_hz` bound the range used by the policy check. A preset
/// without explicit bounds is a pure tuning shortcut and places no
/// restriction on frequency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandPreset {
    /// Display label, unique within a rig (e.g. "20m", "40m FT8").
    pub label: String,
    /// Default center frequency in hertz, if any.
    #[serde(default)]
    pub center_hz: Option<u64>,
    /// Lower bound of the range in hertz (inclusive).
    #[serde(default)]
    pub lower_hz: Option<u64>,
    /// Upper bound of the range in hertz (inclusive).
    #[serde(default)]
    pub upper_hz: Option<u64>,
    /// Whether this preset participates in the band policy check.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl BandPreset {
    /// Create a preset covering `lower_hz..=upper_hz` centered on `center_hz`.
    pub fn new(label: impl Into<String>, center_hz: u64, lower_hz: u64, upper_hz: u64) -> Self {
        BandPreset {
            label: label.into(),
            center_hz: Some(center_hz),
            lower_hz: Some(lower_hz),
            upper_hz: Some(upper_hz),
            enabled: true,
        }
    }

    /// Validate the `lower ≤ center ≤ upper` ordering when all bounds are set.
    pub fn validate(&self) -> Result<()> {
        if let (Some(lo), Some(hi)) = (self.lower_hz, self.upper_hz) {
            if lo > hi {
                return Err(Error::InvalidConfig(format!(
                    "band preset '{}': lower_hz {} above upper_hz {}",
                    self.label, lo, hi
                )));
            }
            if let Some(center) = self.center_hz {
                if center < lo || center > hi {
                    return Err(Error::InvalidConfig(format!(
                        "band preset '{}': center_hz {} outside {}..{}",
                        self.label, center, lo, hi
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A contiguous frequency range a rig can tune, from `dump_caps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandRange {
    /// Lower bound of the range in hertz (inclusive).
    pub low_hz: u64,
    /// Upper bound of the range in hertz (inclusive).
    pub high_hz: u64,
}

impl BandRange {
    /// Create a new band range.
    pub fn new(low_hz: u64, high_hz: u64) -> Self {
        BandRange { low_hz, high_hz }
    }

    /// Check whether a frequency (in hertz) falls within this range.
    pub fn contains(&self, freq_hz: u64) -> bool {
        freq_hz >= self.low_hz && freq_hz <= self.high_hz
    }
}

/// Apply the band-validity policy to a candidate frequency.
///
/// With `allow_out_of_band` the frequency is always accepted. Otherwise it
/// must fall inside at least one *enabled* preset's range; an enabled preset
/// without explicit bounds accepts any frequency. A rig with no enabled
/// presets rejects everything.
pub fn check_frequency(presets: &[BandPreset], allow_out_of_band: bool, hz: u64) -> Result<()> {
    if allow_out_of_band {
        return Ok(());
    }
    for preset in presets.iter().filter(|p| p.enabled) {
        match (preset.lower_hz, preset.upper_hz) {
            (Some(lo), Some(hi)) => {
                if hz >= lo && hz <= hi {
                    return Ok(());
                }
            }
            // No explicit range: the preset is a tuning shortcut, not a limit.
            _ => return Ok(()),
        }
    }
    Err(Error::Band)
}
