//! multirig-test-harness: deterministic rig emulation for tests.
//!
//! Provides [`MockRigctld`], a behavioral in-process `rigctld` that holds
//! real rig state, logs every received command, and supports kill/restart
//! for reconnect scenarios. Used across the workspace for network-level
//! testing without Hamlib or hardware.

pub mod mock_rigctld;

pub use mock_rigctld::MockRigctld;
