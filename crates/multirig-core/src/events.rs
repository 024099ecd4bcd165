//! Status updates published to subscribers.

use serde::Serialize;

use crate::types::RigSnapshot;

/// The full application status pushed to subscribers on every change.
///
/// Delivered through a latest-value channel: a slow subscriber skips
/// intermediate updates and always observes the newest one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusUpdate {
    /// One snapshot per configured rig, in configuration order.
    pub rigs: Vec<RigSnapshot>,
    /// Whether main → follower mirroring is active.
    pub sync_enabled: bool,
    /// Index of the main rig.
    pub sync_source_index: usize,
    /// Whether the rigctl listener forwards commands to the rigs.
    pub rigctl_to_main_enabled: bool,
    /// Master enable gate over all clients.
    pub all_rigs_enabled: bool,
}
