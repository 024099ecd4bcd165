//! Configuration file handling.
//!
//! The daemon keeps its [`AppConfig`] in one TOML file. A missing file is
//! seeded with a two-rig default (rigctld on the standard port plus a
//! second instance one port up), matching a typical SO2R starting point.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use multirig_core::types::{AppConfig, RigConfig, DEFAULT_RIGCTLD_PORT};

/// Load the configuration, creating a default file when none exists.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = default_config();
        save_config(&cfg, path)?;
        info!(path = %path.display(), "wrote default configuration");
        return Ok(cfg);
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let mut cfg: AppConfig =
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.normalize();
    cfg.validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(cfg)
}

/// Persist the configuration.
pub fn save_config(cfg: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let text = toml::to_string_pretty(cfg).context("serializing config")?;
    std::fs::write(path, text).with_context(|| format!("writing config {}", path.display()))?;
    Ok(())
}

fn default_config() -> AppConfig {
    AppConfig {
        rigs: vec![
            RigConfig::rigctld("Rig A", "127.0.0.1", DEFAULT_RIGCTLD_PORT),
            RigConfig::rigctld("Rig B", "127.0.0.1", DEFAULT_RIGCTLD_PORT + 1),
        ],
        sync_source_index: 0,
        ..AppConfig::default()
    }
}
