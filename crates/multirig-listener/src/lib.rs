//! multirig-listener: the front door for external rigctl clients.
//!
//! [`RigctlListener`] binds a TCP port and speaks enough of the Hamlib
//! `rigctld` protocol for digital-mode software to treat MultiRig as a
//! single rig. Set commands fan out to every enabled rig; get commands read
//! the main rig's cached snapshot.

pub mod server;

pub use server::RigctlListener;
