//! The rigctl-compatible TCP listener.
//!
//! External clients (WSJT-X, fldigi, loggers) connect here as if MultiRig
//! were a single `rigctld`. Replies match the form of the request: a
//! punctuation-prefixed command gets an Extended Response Protocol reply
//! ending in `RPRT <int>`, a bare command gets the default protocol.
//!
//! Set commands fan out to every *enabled* rig concurrently and return one
//! aggregated `RPRT`; get commands are answered from the main rig's cached
//! snapshot without generating rig traffic.

use std::net::SocketAddr;
use std::time::Duration;

use futures::future::join_all;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use multirig_client::RigClient;
use multirig_core::debug::{DebugEvent, DebugEventKind, DebugRing};
use multirig_core::error::{Error, Result};
use multirig_core::types::{RigSnapshot, Vfo};
use multirig_engine::RigRegistry;
use multirig_proto::caps::format_dump_caps;
use multirig_proto::command::{parse_line, RigctlCommand};

/// A running rigctl listener.
pub struct RigctlListener {
    local_addr: SocketAddr,
    debug: DebugRing,
    shutdown_tx: watch::Sender<bool>,
    accept_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RigctlListener {
    /// Bind `host:port` and start accepting rigctl clients.
    pub async fn bind(host: &str, port: u16, registry: Arc<RigRegistry>) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Io(format!("bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Io(e.to_string()))?;
        info!(addr = %local_addr, "rigctl listener started");

        let debug = DebugRing::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            registry,
            debug.clone(),
            shutdown_rx,
        ));

        Ok(RigctlListener {
            local_addr,
            debug,
            shutdown_tx,
            accept_task: std::sync::Mutex::new(Some(accept_task)),
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Copy of the listener's debug ring.
    pub fn debug_events(&self) -> Vec<DebugEvent> {
        self.debug.snapshot()
    }

    /// Stop accepting and drop all peer connections.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.accept_task.lock().expect("accept task slot").take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        info!(addr = %self.local_addr, "rigctl listener stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<RigRegistry>,
    debug: DebugRing,
    shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let mut shutdown = shutdown_rx.clone();
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "rigctl client connected");
                        tokio::spawn(serve_peer(
                            stream,
                            Arc::clone(&registry),
                            debug.clone(),
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
}

async fn serve_peer(
    stream: TcpStream,
    registry: Arc<RigRegistry>,
    debug: DebugRing,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
            }
            read = reader.read_line(&mut line) => {
                match read {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
                let trimmed = line.trim_end_matches(['\r', '\n']);
                if trimmed.trim().is_empty() {
                    continue;
                }
                if matches!(trimmed.trim(), "q" | "Q" | "quit" | "exit") {
                    return;
                }

                debug.record(DebugEventKind::ServerRx, describe_line(trimmed), trimmed);
                let reply = handle_line(&registry, trimmed).await;
                debug.record(
                    DebugEventKind::ServerTx,
                    last_line(&reply),
                    reply.trim_end(),
                );
                if write_half.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn describe_line(line: &str) -> String {
    match parse_line(line) {
        Some(parsed) => parsed.command.describe(),
        None => "unknown command".to_string(),
    }
}

fn last_line(reply: &str) -> String {
    reply
        .trim_end()
        .lines()
        .last()
        .unwrap_or_default()
        .to_string()
}

/// The record separator for an ERP reply: newline for the conventional `+`
/// prefix, the prefix character itself otherwise.
fn sep_for(prefix: char) -> char {
    if prefix == '+' {
        '\n'
    } else {
        prefix
    }
}

fn records_to_string(records: &[String], sep: char) -> String {
    let mut out = records.join(&sep.to_string());
    out.push(sep);
    out
}

fn erp_reply(prefix: char, records: &[String]) -> String {
    records_to_string(records, sep_for(prefix))
}

/// Dispatch one command line and render the reply in the request's form.
async fn handle_line(registry: &RigRegistry, line: &str) -> String {
    let Some(parsed) = parse_line(line) else {
        return "RPRT -11\n".to_string();
    };
    let erp = parsed.erp;

    match parsed.command {
        cmd @ (RigctlCommand::SetFreq(_)
        | RigctlCommand::SetMode { .. }
        | RigctlCommand::SetVfo(_)
        | RigctlCommand::SetPtt(_)) => handle_set(registry, cmd, erp).await,

        RigctlCommand::GetFreq => {
            handle_get(registry, erp, "get_freq", |snap| {
                snap.frequency_hz
                    .map(|hz| vec![format!("Frequency: {hz}")])
            })
            .await
        }
        RigctlCommand::GetMode => {
            handle_get(registry, erp, "get_mode", |snap| {
                snap.mode.as_ref().map(|mode| {
                    vec![
                        format!("Mode: {mode}"),
                        format!("Passband: {}", snap.passband_hz.unwrap_or(0)),
                    ]
                })
            })
            .await
        }
        RigctlCommand::GetVfo => {
            handle_get(registry, erp, "get_vfo", |snap| {
                snap.vfo.as_ref().map(|vfo| vec![format!("VFO: {vfo}")])
            })
            .await
        }
        RigctlCommand::GetPtt => {
            handle_get(registry, erp, "get_ptt", |snap| {
                snap.ptt
                    .map(|on| vec![format!("PTT: {}", if on { 1 } else { 0 })])
            })
            .await
        }
        RigctlCommand::ChkVfo => {
            let dual = registry
                .main_snapshot()
                .await
                .and_then(|snap| snap.caps)
                .map(|caps| caps.vfo_get)
                .unwrap_or(false);
            let value = if dual { 1 } else { 0 };
            match erp {
                Some(prefix) => erp_reply(
                    prefix,
                    &[
                        "chk_vfo:".to_string(),
                        format!("ChkVFO: {value}"),
                        "RPRT 0".to_string(),
                    ],
                ),
                None => format!("{value}\n"),
            }
        }
        RigctlCommand::DumpCaps => {
            let Some(snap) = registry.main_snapshot().await else {
                return error_reply(erp, "dump_caps", -6);
            };
            if !snap.connected {
                return error_reply(erp, "dump_caps", -6);
            }
            let caps = snap.caps.clone().unwrap_or_default();
            let body = format_dump_caps(&caps, &snap.modes);
            render_block(erp, "dump_caps", body)
        }
        RigctlCommand::DumpState => {
            let Some(snap) = registry.main_snapshot().await else {
                return error_reply(erp, "dump_state", -6);
            };
            if !snap.connected {
                return error_reply(erp, "dump_state", -6);
            }
            let body = synthesize_state_block(&snap);
            render_block(erp, "dump_state", body)
        }
        // Commands outside the listener's calibration surface.
        _ => "RPRT -11\n".to_string(),
    }
}

/// Fan a set command out to every enabled rig and aggregate one `RPRT`.
///
/// Band-policy rejections stay on the rejecting rig's snapshot and do not
/// fail the aggregate; any other failure contributes the first negative
/// code. With forwarding gated off the command is acknowledged unexecuted.
async fn handle_set(registry: &RigRegistry, cmd: RigctlCommand, erp: Option<char>) -> String {
    let echo = set_echo(&cmd);

    if !registry.flags().rigctl_to_main_enabled {
        return set_reply(erp, &echo, 0);
    }

    // Resolve the command into a concrete action up front; a malformed VFO
    // selector is rejected before touching any rig.
    let action = match &cmd {
        RigctlCommand::SetFreq(hz) => SetAction::Freq(*hz),
        RigctlCommand::SetMode { mode, passband } => SetAction::Mode(mode.clone(), *passband),
        RigctlCommand::SetVfo(raw) => match raw.parse::<Vfo>() {
            Ok(vfo) => SetAction::Vfo(vfo),
            Err(_) => return set_reply(erp, &echo, -1),
        },
        RigctlCommand::SetPtt(on) => SetAction::Ptt(*on),
        _ => return set_reply(erp, &echo, -1),
    };

    let clients = registry.enabled_clients().await;
    let jobs = clients.iter().map(|client| {
        let client = Arc::clone(client);
        let action = action.clone();
        let name = cmd.long_name();
        async move {
            let result = action.apply(&client).await;
            if let Err(e) = &result {
                client.debug_ring().record(
                    DebugEventKind::Rx,
                    format!("{name} failed"),
                    e.to_string(),
                );
            }
            result
        }
    });

    let results = join_all(jobs).await;
    let code = results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .filter(|e| !matches!(e, Error::Band))
        .map(|e| e.rprt_code())
        .next()
        .unwrap_or(0);

    set_reply(erp, &echo, code)
}

#[derive(Clone)]
enum SetAction {
    Freq(u64),
    Mode(String, Option<u32>),
    Vfo(Vfo),
    Ptt(bool),
}

impl SetAction {
    async fn apply(&self, client: &RigClient) -> Result<()> {
        match self {
            SetAction::Freq(hz) => client.set_frequency(*hz).await,
            SetAction::Mode(mode, passband) => client.set_mode(mode, *passband).await,
            SetAction::Vfo(vfo) => client.set_vfo(*vfo).await,
            SetAction::Ptt(on) => client.set_ptt(*on).await,
        }
    }
}

fn set_echo(cmd: &RigctlCommand) -> String {
    match cmd {
        RigctlCommand::SetFreq(hz) => format!("set_freq: {hz}"),
        RigctlCommand::SetMode { mode, passband } => {
            format!("set_mode: {mode} {}", passband.unwrap_or(0))
        }
        RigctlCommand::SetVfo(vfo) => format!("set_vfo: {vfo}"),
        RigctlCommand::SetPtt(on) => format!("set_ptt: {}", if *on { 1 } else { 0 }),
        _ => format!("{}:", cmd.long_name()),
    }
}

fn set_reply(erp: Option<char>, echo: &str, code: i32) -> String {
    match erp {
        Some(prefix) => erp_reply(prefix, &[echo.to_string(), format!("RPRT {code}")]),
        None => format!("RPRT {code}\n"),
    }
}

/// Answer a get command from the main rig's snapshot. `extract` yields the
/// ERP data records, or `None` when the value is not known yet.
async fn handle_get<F>(
    registry: &RigRegistry,
    erp: Option<char>,
    long_name: &str,
    extract: F,
) -> String
where
    F: Fn(&RigSnapshot) -> Option<Vec<String>>,
{
    let Some(snap) = registry.main_snapshot().await else {
        return error_reply(erp, long_name, -6);
    };
    if !snap.connected {
        return error_reply(erp, long_name, -6);
    }
    let Some(records) = extract(&snap) else {
        return error_reply(erp, long_name, -1);
    };

    match erp {
        Some(prefix) => {
            let mut all = vec![format!("{long_name}:")];
            all.extend(records);
            all.push("RPRT 0".to_string());
            erp_reply(prefix, &all)
        }
        None => {
            // Default protocol: bare values, one per line.
            let mut out = String::new();
            for record in &records {
                let value = record
                    .split_once(':')
                    .map(|(_, v)| v.trim())
                    .unwrap_or(record);
                out.push_str(value);
                out.push('\n');
            }
            out
        }
    }
}

fn error_reply(erp: Option<char>, long_name: &str, code: i32) -> String {
    match erp {
        Some(prefix) => erp_reply(
            prefix,
            &[format!("{long_name}:"), format!("RPRT {code}")],
        ),
        None => format!("RPRT {code}\n"),
    }
}

fn render_block(erp: Option<char>, long_name: &str, body: Vec<String>) -> String {
    match erp {
        Some(prefix) => {
            let mut all = vec![format!("{long_name}:")];
            all.extend(body);
            all.push("RPRT 0".to_string());
            erp_reply(prefix, &all)
        }
        None => {
            let mut out = body.join("\n");
            out.push('\n');
            out
        }
    }
}

/// A minimal state block for `dump_state`: protocol version, model and ITU
/// region, shaped like the head of a real report.
fn synthesize_state_block(snap: &RigSnapshot) -> Vec<String> {
    vec![
        "0".to_string(),
        snap.model_id.unwrap_or(2).to_string(),
        "2".to_string(),
    ]
}
