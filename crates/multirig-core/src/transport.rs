//! Transport trait for rig communication.
//!
//! The [`Transport`] trait abstracts over the link to a `rigctld`-compatible
//! command endpoint. Implementations exist for direct TCP connections and for
//! a locally spawned `rigctl` subprocess; the connection layer drives either
//! through this trait and never sees the difference.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Asynchronous byte-level transport to a rigctl endpoint.
///
/// Implementations handle connection state and error mapping at the physical
/// layer. Framing (line assembly, `RPRT` detection) belongs to the connection
/// that consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes, blocking until all are written.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes into `buf`, waiting up to `timeout`.
    ///
    /// Returns the number of bytes read, or
    /// [`Error::Timeout`](crate::error::Error::Timeout) if nothing arrives
    /// within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport. Subsequent `send`/`receive` calls return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
