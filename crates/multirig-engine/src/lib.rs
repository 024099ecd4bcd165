//! multirig-engine: the coordination core.
//!
//! - [`RigRegistry`] owns the set of [`multirig_client::RigClient`]s and
//!   transitions atomically between configurations.
//! - [`SyncEngine`] mirrors the main rig's frequency and mode onto every
//!   enabled follower.
//! - [`StatusBroadcaster`] aggregates per-rig snapshots into
//!   [`multirig_core::StatusUpdate`]s for push subscribers.
//!
//! The registry is the single owner; engine and broadcaster reach clients
//! only through it, keyed by index, so a reconfiguration never leaves them
//! holding stale rigs.

pub mod broadcast;
pub mod registry;
pub mod sync;

pub use broadcast::StatusBroadcaster;
pub use registry::{ControlFlags, RigRegistry};
pub use sync::SyncEngine;
