//! Subprocess transport: an interactive `rigctl` speaking the same text
//! protocol on stdin/stdout.
//!
//! For rigs without a running `rigctld`, MultiRig spawns
//! `rigctl -m <model> -r <device> [-s <baud>]` and pipes commands to it.
//! The wire dialect is identical to the TCP case, so everything above the
//! [`Transport`] trait is unaware of the difference.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use multirig_core::error::{Error, Result};
use multirig_core::transport::Transport;

/// Transport backed by a local `rigctl` subprocess.
pub struct ProcessTransport {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    /// "rigctl <model>@<device>", kept for logging.
    label: String,
}

impl ProcessTransport {
    /// Spawn `rigctl` in interactive mode for the given backend.
    ///
    /// `extra_args` is split on whitespace and appended to the command line
    /// verbatim (e.g. `"--set-conf=stop_bits=2"`).
    pub async fn spawn(
        model_id: u32,
        device: &str,
        baud: Option<u32>,
        extra_args: Option<&str>,
    ) -> Result<Self> {
        let label = format!("rigctl {model_id}@{device}");
        tracing::debug!(backend = %label, "spawning rigctl subprocess");

        let mut command = Command::new("rigctl");
        command
            .arg("-m")
            .arg(model_id.to_string())
            .arg("-r")
            .arg(device);
        if let Some(baud) = baud {
            command.arg("-s").arg(baud.to_string());
        }
        if let Some(extra) = extra_args {
            for arg in extra.split_whitespace() {
                command.arg(arg);
            }
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::Io(format!("spawn rigctl: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Io("rigctl stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Io("rigctl stdout unavailable".into()))?;

        tracing::debug!(backend = %label, pid = child.id(), "rigctl subprocess running");
        Ok(ProcessTransport {
            child: Some(child),
            stdin: Some(stdin),
            stdout: Some(stdout),
            label,
        })
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(Error::NotConnected)?;
        stdin
            .write_all(data)
            .await
            .map_err(|e| Error::Io(format!("{}: {e}", self.label)))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Io(format!("{}: {e}", self.label)))?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stdout = self.stdout.as_mut().ok_or(Error::NotConnected)?;
        match tokio::time::timeout(timeout, stdout.read(buf)).await {
            // EOF means the subprocess died.
            Ok(Ok(0)) => Err(Error::Io(format!("{}: subprocess exited", self.label))),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(Error::Io(format!("{}: {e}", self.label))),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stdin.take();
        self.stdout.take();
        if let Some(mut child) = self.child.take() {
            tracing::debug!(backend = %self.label, "stopping rigctl subprocess");
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_millis(500), child.wait()).await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.child.is_some()
    }
}
