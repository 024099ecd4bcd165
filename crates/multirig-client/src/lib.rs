//! multirig-client: the per-rig control stack.
//!
//! Three layers, bottom up:
//!
//! - [`TcpTransport`] / [`ProcessTransport`] -- byte transports implementing
//!   [`multirig_core::Transport`] for a rigctld endpoint or a local `rigctl`
//!   subprocess. The layers above never see the difference.
//! - [`RigConnection`] -- one serialized command pipeline with a bounded
//!   queue, per-command deadlines, a TX/RX debug ring, and automatic
//!   reconnect with jittered exponential backoff.
//! - [`RigClient`] -- the stateful façade: poll loop, capability cache,
//!   band policy enforcement, and `watch`-published snapshots.

pub mod client;
pub mod connection;
pub mod process;
pub mod tcp;

pub use client::RigClient;
pub use connection::{ConnectionState, RigConnection, COMMAND_QUEUE_DEPTH, DEFAULT_DEADLINE, DUMP_DEADLINE};
pub use process::ProcessTransport;
pub use tcp::TcpTransport;
