//! One serialized command pipeline per rig.
//!
//! [`RigConnection`] owns the transport and a bounded submission queue.
//! Exactly one command is in flight at a time; each submission carries a
//! deadline and is answered through a oneshot channel. I/O failures flip the
//! connection into a reconnect loop with exponential backoff, failing
//! everything queued behind the broken command.
//!
//! State machine: `Connecting → Connected → Disconnected → Connecting …`,
//! terminal `Closed` on explicit shutdown.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use multirig_core::debug::{DebugEvent, DebugEventKind, DebugRing};
use multirig_core::error::{Error, Result};
use multirig_core::transport::Transport;
use multirig_core::types::TransportConfig;
use multirig_proto::response::{parse_rprt, LineBuffer, RigctlReply};
use multirig_proto::RigctlCommand;

use crate::process::ProcessTransport;
use crate::tcp::TcpTransport;

/// Submissions waiting for the wire; enqueue beyond this returns `Busy`.
pub const COMMAND_QUEUE_DEPTH: usize = 64;

/// Deadline for ordinary commands.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(2);

/// Deadline for the multi-line `dump_caps` / `dump_state` outputs.
pub const DUMP_DEADLINE: Duration = Duration::from_secs(5);

/// First reconnect delay; doubles up to [`RECONNECT_CAP`] with ±20 % jitter.
const RECONNECT_INITIAL: Duration = Duration::from_millis(500);

/// Ceiling for the reconnect delay.
const RECONNECT_CAP: Duration = Duration::from_secs(5);

/// Consecutive command timeouts that condemn the connection.
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;

/// Idle gap that terminates a default-protocol dump read.
const DUMP_IDLE_GAP: Duration = Duration::from_millis(300);

/// Observable connection lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to establish the transport.
    Connecting,
    /// Transport up; commands flow.
    Connected,
    /// Transport down; reconnect scheduled.
    Disconnected {
        /// Why the transport dropped.
        error: String,
    },
    /// Shut down for good.
    Closed,
}

struct Submission {
    cmd: RigctlCommand,
    deadline: Duration,
    reply_tx: oneshot::Sender<Result<RigctlReply>>,
}

/// Handle to a rig's command pipeline.
pub struct RigConnection {
    cmd_tx: mpsc::Sender<Submission>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    debug: DebugRing,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RigConnection {
    /// Start the connection worker for the given transport configuration.
    ///
    /// Connecting happens in the background; `submit` fails with
    /// `NotConnected` until the transport is up.
    pub fn spawn(name: impl Into<String>, transport: TransportConfig) -> Self {
        let name = name.into();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let debug = DebugRing::new();

        let worker = Worker {
            name,
            cfg: transport,
            cmd_rx,
            state_tx,
            shutdown_rx,
            debug: debug.clone(),
        };
        let task = tokio::spawn(worker.run());

        RigConnection {
            cmd_tx,
            state_rx,
            shutdown_tx,
            debug,
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    /// The deadline applied to a command when the caller does not choose one.
    pub fn deadline_for(cmd: &RigctlCommand) -> Duration {
        match cmd {
            RigctlCommand::DumpCaps | RigctlCommand::DumpState => DUMP_DEADLINE,
            _ => DEFAULT_DEADLINE,
        }
    }

    /// Queue a command and await its reply.
    ///
    /// Returns `Busy` immediately when the queue is full, `Closed` after
    /// shutdown, and maps a negative `RPRT` to [`Error::Rig`].
    pub async fn submit(&self, cmd: RigctlCommand) -> Result<RigctlReply> {
        let deadline = Self::deadline_for(&cmd);
        self.submit_with_deadline(cmd, deadline).await
    }

    /// Queue a command with an explicit deadline.
    pub async fn submit_with_deadline(
        &self,
        cmd: RigctlCommand,
        deadline: Duration,
    ) -> Result<RigctlReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .try_send(Submission {
                cmd,
                deadline,
                reply_tx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::Busy,
                mpsc::error::TrySendError::Closed(_) => Error::Closed,
            })?;
        reply_rx.await.map_err(|_| Error::Closed)?
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Watch lifecycle transitions.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Whether the transport is currently up.
    pub fn is_connected(&self) -> bool {
        matches!(*self.state_rx.borrow(), ConnectionState::Connected)
    }

    /// Copy of the TX/RX debug ring.
    pub fn debug_events(&self) -> Vec<DebugEvent> {
        self.debug.snapshot()
    }

    /// Handle to the debug ring itself.
    pub fn debug_ring(&self) -> DebugRing {
        self.debug.clone()
    }

    /// Stop the worker and close the transport. Waits up to two seconds for
    /// a clean exit.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().expect("connection task slot").take();
        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .is_err()
            {
                warn!("connection worker did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

struct Worker {
    name: String,
    cfg: TransportConfig,
    cmd_rx: mpsc::Receiver<Submission>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    debug: DebugRing,
}

impl Worker {
    async fn run(mut self) {
        let mut backoff = Backoff::new();

        'outer: loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            self.state_tx.send_replace(ConnectionState::Connecting);

            let mut transport = match open_transport(&self.cfg).await {
                Ok(t) => {
                    backoff.reset();
                    t
                }
                Err(e) => {
                    let error = e.to_string();
                    self.state_tx
                        .send_replace(ConnectionState::Disconnected {
                            error: error.clone(),
                        });
                    let delay = backoff.next_delay();
                    debug!(
                        rig = %self.name,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "connect failed, backing off"
                    );
                    let sleep = tokio::time::sleep(delay);
                    tokio::pin!(sleep);
                    loop {
                        tokio::select! {
                            _ = &mut sleep => continue 'outer,
                            _ = self.shutdown_rx.changed() => {
                                if *self.shutdown_rx.borrow() {
                                    break 'outer;
                                }
                            }
                            sub = self.cmd_rx.recv() => match sub {
                                // Submissions made while disconnected fail fast.
                                Some(sub) => {
                                    let _ = sub.reply_tx.send(Err(Error::NotConnected));
                                }
                                None => break 'outer,
                            }
                        }
                    }
                }
            };

            self.state_tx.send_replace(ConnectionState::Connected);
            debug!(rig = %self.name, endpoint = %self.cfg.describe(), "connected");

            let mut lines = LineBuffer::new();
            let mut erp_supported = true;
            let mut consecutive_timeouts = 0u32;

            loop {
                tokio::select! {
                    _ = self.shutdown_rx.changed() => {
                        if *self.shutdown_rx.borrow() {
                            let _ = transport.close().await;
                            break 'outer;
                        }
                    }
                    sub = self.cmd_rx.recv() => {
                        let Some(sub) = sub else {
                            let _ = transport.close().await;
                            break 'outer;
                        };
                        let result = execute(
                            transport.as_mut(),
                            &mut lines,
                            &mut erp_supported,
                            &self.debug,
                            &sub.cmd,
                            sub.deadline,
                        )
                        .await;

                        let broken = match &result {
                            Err(e @ (Error::Io(_) | Error::NotConnected | Error::Closed)) => {
                                Some(e.to_string())
                            }
                            Err(Error::Timeout) => {
                                consecutive_timeouts += 1;
                                if consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                                    Some("repeated command timeouts".to_string())
                                } else {
                                    None
                                }
                            }
                            _ => {
                                consecutive_timeouts = 0;
                                None
                            }
                        };
                        let _ = sub.reply_tx.send(result);

                        if let Some(error) = broken {
                            warn!(rig = %self.name, error = %error, "connection lost, scheduling reconnect");
                            self.fail_queued(&error);
                            let _ = transport.close().await;
                            self.state_tx
                                .send_replace(ConnectionState::Disconnected { error });
                            lines.clear();
                            continue 'outer;
                        }
                    }
                }
            }
        }

        self.state_tx.send_replace(ConnectionState::Closed);
        self.cmd_rx.close();
        while let Ok(sub) = self.cmd_rx.try_recv() {
            let _ = sub.reply_tx.send(Err(Error::Closed));
        }
        debug!(rig = %self.name, "connection worker stopped");
    }

    fn fail_queued(&mut self, error: &str) {
        while let Ok(sub) = self.cmd_rx.try_recv() {
            let _ = sub.reply_tx.send(Err(Error::Io(error.to_string())));
        }
    }
}

async fn open_transport(cfg: &TransportConfig) -> Result<Box<dyn Transport>> {
    match cfg {
        TransportConfig::Rigctld { host, port } => {
            let transport = TcpTransport::connect(&format!("{host}:{port}")).await?;
            Ok(Box::new(transport))
        }
        TransportConfig::Rigctl {
            model_id,
            device,
            baud,
            extra_args,
        } => {
            let transport =
                ProcessTransport::spawn(*model_id, device, *baud, extra_args.as_deref()).await?;
            Ok(Box::new(transport))
        }
    }
}

/// Run one command, handling the ERP-unsupported fallback.
///
/// Hamlib versions that predate the extended protocol answer any prefixed
/// command with a bare, unsolicited `RPRT -11` -- no echoed command name,
/// no data records. That shape (and only that shape; a genuine
/// feature-unavailable reply echoes the command name first) triggers a
/// single retry in the default protocol. If the retry succeeds the
/// connection stays in default mode until it reconnects.
async fn execute(
    transport: &mut dyn Transport,
    lines: &mut LineBuffer,
    erp_supported: &mut bool,
    debug: &DebugRing,
    cmd: &RigctlCommand,
    deadline: Duration,
) -> Result<RigctlReply> {
    if *erp_supported {
        let reply = send_and_read(transport, lines, debug, cmd, deadline, true).await?;
        if !(reply.rprt == -11 && reply.lines.is_empty()) {
            return reply.into_result(cmd.long_name());
        }
        let fallback = send_and_read(transport, lines, debug, cmd, deadline, false).await?;
        if fallback.rprt == 0 {
            trace!("peer rejected ERP prefix, staying on default protocol");
            *erp_supported = false;
            return Ok(fallback);
        }
        return reply.into_result(cmd.long_name());
    }
    send_and_read(transport, lines, debug, cmd, deadline, false)
        .await?
        .into_result(cmd.long_name())
}

async fn send_and_read(
    transport: &mut dyn Transport,
    lines: &mut LineBuffer,
    debug: &DebugRing,
    cmd: &RigctlCommand,
    deadline: Duration,
    erp: bool,
) -> Result<RigctlReply> {
    let frame = cmd.encode(erp);
    debug.record(DebugEventKind::Tx, cmd.describe(), frame.trim_end());
    transport.send(frame.as_bytes()).await?;

    let deadline_at = Instant::now() + deadline;
    let result = if erp {
        read_erp_reply(transport, lines, deadline_at).await
    } else {
        read_default_reply(transport, lines, cmd, deadline_at).await
    };

    match &result {
        Ok(reply) => debug.record(
            DebugEventKind::Rx,
            format!("RPRT {}", reply.rprt),
            reply.lines.join("\n"),
        ),
        Err(e) => debug.record(DebugEventKind::Rx, format!("error: {e}"), ""),
    }
    result
}

/// Pull the next complete line, reading from the transport as needed.
async fn next_line(
    transport: &mut dyn Transport,
    lines: &mut LineBuffer,
    deadline_at: Instant,
) -> Result<String> {
    loop {
        if let Some(line) = lines.next_line() {
            return Ok(line);
        }
        let remaining = deadline_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout);
        }
        let mut buf = [0u8; 1024];
        let n = transport.receive(&mut buf, remaining).await?;
        lines.push_bytes(&buf[..n]);
    }
}

/// ERP replies always end with an explicit `RPRT <int>` line.
async fn read_erp_reply(
    transport: &mut dyn Transport,
    lines: &mut LineBuffer,
    deadline_at: Instant,
) -> Result<RigctlReply> {
    let mut collected = Vec::new();
    loop {
        let line = next_line(transport, lines, deadline_at).await?;
        if let Some(code) = parse_rprt(&line) {
            return Ok(RigctlReply {
                lines: collected,
                rprt: code,
            });
        }
        if !line.trim().is_empty() {
            collected.push(line);
        }
    }
}

/// Default-protocol replies carry no terminator: sets answer a single
/// `RPRT` line, gets a known number of bare value lines, and the dump
/// commands stream lines until the peer goes idle.
async fn read_default_reply(
    transport: &mut dyn Transport,
    lines: &mut LineBuffer,
    cmd: &RigctlCommand,
    deadline_at: Instant,
) -> Result<RigctlReply> {
    match cmd.expected_value_lines() {
        Some(0) => {
            let line = next_line(transport, lines, deadline_at).await?;
            match parse_rprt(&line) {
                Some(code) => Ok(RigctlReply {
                    lines: Vec::new(),
                    rprt: code,
                }),
                None => Err(Error::Protocol(format!(
                    "{}: expected RPRT, got {line:?}",
                    cmd.long_name()
                ))),
            }
        }
        Some(expected) => {
            let mut collected = Vec::new();
            while collected.len() < expected {
                let line = next_line(transport, lines, deadline_at).await?;
                // An error in default mode arrives as a bare RPRT line.
                if let Some(code) = parse_rprt(&line) {
                    return Ok(RigctlReply {
                        lines: collected,
                        rprt: code,
                    });
                }
                if !line.trim().is_empty() {
                    collected.push(line);
                }
            }
            Ok(RigctlReply::ok(collected))
        }
        None => {
            let mut collected: Vec<String> = Vec::new();
            loop {
                let step_deadline = if collected.is_empty() {
                    deadline_at
                } else {
                    deadline_at.min(Instant::now() + DUMP_IDLE_GAP)
                };
                match next_line(transport, lines, step_deadline).await {
                    Ok(line) => {
                        if let Some(code) = parse_rprt(&line) {
                            return Ok(RigctlReply {
                                lines: collected,
                                rprt: code,
                            });
                        }
                        collected.push(line);
                    }
                    Err(Error::Timeout) if !collected.is_empty() => {
                        return Ok(RigctlReply::ok(collected));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

struct Backoff {
    next: Duration,
}

impl Backoff {
    fn new() -> Self {
        Backoff {
            next: RECONNECT_INITIAL,
        }
    }

    fn reset(&mut self) {
        self.next = RECONNECT_INITIAL;
    }

    /// The delay to sleep before the next attempt, with ±20 % jitter.
    fn next_delay(&mut self) -> Duration {
        let base = self.next;
        self.next = (self.next * 2).min(RECONNECT_CAP);
        base.mul_f64(rand::thread_rng().gen_range(0.8..=1.2))
    }
}
