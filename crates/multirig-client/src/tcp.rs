//! TCP transport to a `rigctld`-compatible endpoint.
//!
//! One persistent connection per rig. `rigctld` accepts many short-lived
//! connections, but keeping a single stream open avoids a connect round-trip
//! on every poll tick and lets the connection layer detect a dead peer
//! promptly.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use multirig_core::error::{Error, Result};
use multirig_core::transport::Transport;

/// How long to wait for the TCP connect to complete.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// TCP transport to a rigctld endpoint.
#[derive(Debug)]
pub struct TcpTransport {
    /// The stream, `None` after `close()`.
    stream: Option<TcpStream>,
    /// `host:port`, kept for logging.
    addr: String,
}

impl TcpTransport {
    /// Connect to `addr` (a `host:port` string).
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, CONNECT_TIMEOUT).await
    }

    /// Connect with an explicit timeout.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!(addr = %addr, "connecting to rigctld");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::Io(format!("connect {addr}: {e}")))?;

        // Rig commands are tiny and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %addr, error = %e, "failed to set TCP_NODELAY");
        }

        tracing::debug!(addr = %addr, "rigctld connection established");
        Ok(TcpTransport {
            stream: Some(stream),
            addr: addr.to_string(),
        })
    }

    /// The address this transport was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        stream
            .write_all(data)
            .await
            .map_err(|e| map_io_error(&self.addr, e))?;
        stream
            .flush()
            .await
            .map_err(|e| map_io_error(&self.addr, e))?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        match tokio::time::timeout(timeout, stream.read(buf)).await {
            // 0 bytes from a TCP read means the peer closed the connection.
            Ok(Ok(0)) => Err(Error::Io(format!("{}: peer closed connection", self.addr))),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(map_io_error(&self.addr, e)),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!(addr = %self.addr, "closing rigctld connection");
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

fn map_io_error(addr: &str, e: std::io::Error) -> Error {
    Error::Io(format!("{addr}: {e}"))
}
