//! multirig-core: shared types, configuration model, and traits for MultiRig.
//!
//! This crate defines the vocabulary the rest of the workspace speaks:
//!
//! - [`AppConfig`] / [`RigConfig`] -- the configuration supplied by a
//!   collaborator (config file, settings UI)
//! - [`RigSnapshot`] / [`StatusUpdate`] -- observable state pushed to
//!   subscribers
//! - [`Transport`] -- byte-level link to a rigctl endpoint
//! - [`Error`] / [`Result`] -- the workspace-wide failure taxonomy
//! - [`check_frequency`] -- the band-validity policy
//!
//! No networking happens here; protocol encoding lives in `multirig-proto`
//! and live connections in `multirig-client`.

pub mod band;
pub mod debug;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use band::{check_frequency, BandPreset, BandRange};
pub use debug::{DebugEvent, DebugEventKind, DebugRing, DEBUG_RING_CAPACITY};
pub use error::{rprt_message, Error, Result};
pub use events::StatusUpdate;
pub use transport::Transport;
pub use types::*;
