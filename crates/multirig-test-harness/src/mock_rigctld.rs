//! Behavioral in-process `rigctld` emulator.
//!
//! Unlike a scripted request/response mock, [`MockRigctld`] models a rig:
//! it holds frequency/mode/VFO/PTT state and answers the command set a
//! MultiRig client emits -- including traffic the test did not author, such
//! as the connect-time `dump_caps` and periodic polls. Every received line
//! is recorded for wire-level assertions, and the server can be killed and
//! restarted on the same port to exercise reconnect handling.
//!
//! ```no_run
//! # async fn example() -> std::io::Result<()> {
//! use multirig_test_harness::MockRigctld;
//!
//! let rig = MockRigctld::start().await?;
//! rig.set_state(14_074_000, "USB", 2400);
//! // connect a client to rig.addr() ...
//! assert!(rig.commands().is_empty());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use multirig_proto::is_erp_prefix;

/// The rig model behind the emulator.
#[derive(Debug, Clone)]
struct RigState {
    freq: u64,
    mode: String,
    passband: u32,
    vfo: String,
    ptt: bool,
    caps_lines: Vec<String>,
}

impl Default for RigState {
    fn default() -> Self {
        RigState {
            freq: 14_074_000,
            mode: "USB".to_string(),
            passband: 2400,
            vfo: "VFOA".to_string(),
            ptt: false,
            caps_lines: default_caps(),
        }
    }
}

fn default_caps() -> Vec<String> {
    vec![
        "Caps dump for model: 1".to_string(),
        "Model name:\tDummy".to_string(),
        "Can set Frequency: Y".to_string(),
        "Can get Frequency: Y".to_string(),
        "Can set Mode: Y".to_string(),
        "Can get Mode: Y".to_string(),
        "Can set VFO: Y".to_string(),
        "Can get VFO: Y".to_string(),
        "Can set PTT: Y".to_string(),
        "Can get PTT: Y".to_string(),
        "Mode list: USB LSB CW CWR AM FM RTTY".to_string(),
    ]
}

#[derive(Default)]
struct Shared {
    state: Mutex<RigState>,
    commands: Mutex<Vec<String>>,
    /// When false, any ERP-prefixed command gets an unsolicited `RPRT -11`,
    /// like Hamlib versions that predate the extended protocol.
    erp_supported: AtomicBool,
    /// Fail the next command containing the substring with the given code.
    fail_next: Mutex<Option<(String, i32)>>,
}

/// A behavioral rigctld emulator bound to a local port.
pub struct MockRigctld {
    addr: String,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl MockRigctld {
    /// Bind a random local port and start accepting connections.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        let shared = Arc::new(Shared::default());
        shared.erp_supported.store(true, Ordering::Relaxed);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&shared),
            shutdown_rx,
        ));

        Ok(MockRigctld {
            addr,
            shared,
            shutdown_tx,
            accept_task: Some(accept_task),
        })
    }

    /// The `host:port` the emulator listens on.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Replace frequency, mode and passband in one step.
    pub fn set_state(&self, freq: u64, mode: &str, passband: u32) {
        let mut state = self.shared.state.lock().expect("mock state");
        state.freq = freq;
        state.mode = mode.to_string();
        state.passband = passband;
    }

    /// Change the frequency, as if turned on the front panel.
    pub fn set_frequency(&self, hz: u64) {
        self.shared.state.lock().expect("mock state").freq = hz;
    }

    /// Current rig-side frequency.
    pub fn frequency(&self) -> u64 {
        self.shared.state.lock().expect("mock state").freq
    }

    /// Current rig-side mode.
    pub fn mode(&self) -> String {
        self.shared.state.lock().expect("mock state").mode.clone()
    }

    /// Replace the `dump_caps` report.
    pub fn set_caps_lines(&self, lines: Vec<String>) {
        self.shared.state.lock().expect("mock state").caps_lines = lines;
    }

    /// Every command line received so far, oldest first.
    pub fn commands(&self) -> Vec<String> {
        self.shared.commands.lock().expect("mock commands").clone()
    }

    /// Number of received command lines containing `needle`.
    pub fn command_count(&self, needle: &str) -> usize {
        self.shared
            .commands
            .lock()
            .expect("mock commands")
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    /// Forget recorded commands.
    pub fn clear_commands(&self) {
        self.shared.commands.lock().expect("mock commands").clear();
    }

    /// Toggle Extended Response Protocol support.
    pub fn set_erp_supported(&self, supported: bool) {
        self.shared.erp_supported.store(supported, Ordering::Relaxed);
    }

    /// Answer the next command containing `needle` with `RPRT <code>`.
    pub fn fail_next(&self, needle: &str, code: i32) {
        *self.shared.fail_next.lock().expect("mock fail_next") =
            Some((needle.to_string(), code));
    }

    /// Drop the listener and all peer connections, leaving the port free
    /// for [`restart`](Self::restart).
    pub async fn kill(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.accept_task.take() {
            task.abort();
            let _ = task.await;
        }
        // Give in-flight connection tasks a moment to observe the signal.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    /// Rebind the same port after a [`kill`](Self::kill).
    pub async fn restart(&mut self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = shutdown_tx;
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.shared),
            shutdown_rx,
        )));
        Ok(())
    }

    /// Stop the emulator for good.
    pub async fn shutdown(mut self) {
        self.kill().await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
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
                let Ok((stream, _)) = accepted else { return };
                tokio::spawn(serve_peer(stream, Arc::clone(&shared), shutdown_rx.clone()));
            }
        }
    }
}

async fn serve_peer(stream: TcpStream, shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
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
                let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
                if trimmed.trim().is_empty() {
                    continue;
                }
                shared
                    .commands
                    .lock()
                    .expect("mock commands")
                    .push(trimmed.clone());

                let reply = respond(&shared, &trimmed);
                if write_half.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Produce the wire reply for one received command line.
fn respond(shared: &Shared, raw: &str) -> String {
    let mut rest = raw.trim_start();
    let mut erp = false;
    if let Some(first) = rest.chars().next() {
        if is_erp_prefix(first) {
            erp = true;
            rest = rest[first.len_utf8()..].trim_start();
        }
    }

    if erp && !shared.erp_supported.load(Ordering::Relaxed) {
        return "RPRT -11\n".to_string();
    }

    let mut parts = rest.split_whitespace();
    let word = parts.next().unwrap_or("");
    let name = word.strip_prefix('\\').unwrap_or(word);
    let args: Vec<&str> = parts.collect();

    // Scripted one-shot failure.
    let fail = {
        let mut slot = shared.fail_next.lock().expect("mock fail_next");
        match slot.as_ref() {
            Some((needle, code)) if name.contains(needle.as_str()) => {
                let code = *code;
                *slot = None;
                Some(code)
            }
            _ => None,
        }
    };
    if let Some(code) = fail {
        return format!("RPRT {code}\n");
    }

    let mut state = shared.state.lock().expect("mock state");
    match name {
        "F" | "set_freq" => {
            let hz = args
                .first()
                .and_then(|a| a.parse::<f64>().ok())
                .unwrap_or_default() as u64;
            state.freq = hz;
            set_reply(erp, "set_freq", &hz.to_string())
        }
        "f" | "get_freq" => get_reply(erp, "get_freq", &[("Frequency", state.freq.to_string())]),
        "M" | "set_mode" => {
            if let Some(mode) = args.first() {
                state.mode = mode.to_string();
            }
            if let Some(pb) = args.get(1).and_then(|a| a.parse::<u32>().ok()) {
                if pb != 0 {
                    state.passband = pb;
                }
            }
            set_reply(erp, "set_mode", &args.join(" "))
        }
        "m" | "get_mode" => get_reply(
            erp,
            "get_mode",
            &[
                ("Mode", state.mode.clone()),
                ("Passband", state.passband.to_string()),
            ],
        ),
        "V" | "set_vfo" => {
            if let Some(vfo) = args.first() {
                if !vfo.eq_ignore_ascii_case("currVFO") {
                    state.vfo = vfo.to_string();
                }
            }
            set_reply(erp, "set_vfo", &args.join(" "))
        }
        "v" | "get_vfo" => get_reply(erp, "get_vfo", &[("VFO", state.vfo.clone())]),
        "T" | "set_ptt" => {
            state.ptt = args.first().map(|a| a.trim() != "0").unwrap_or(false);
            set_reply(erp, "set_ptt", &args.join(" "))
        }
        "t" | "get_ptt" => get_reply(
            erp,
            "get_ptt",
            &[("PTT", if state.ptt { "1" } else { "0" }.to_string())],
        ),
        "get_powerstat" => get_reply(erp, "get_powerstat", &[("Power Status", "1".to_string())]),
        "s" | "get_split_vfo" => get_reply(
            erp,
            "get_split_vfo",
            &[("Split", "0".to_string()), ("TX VFO", state.vfo.clone())],
        ),
        "chk_vfo" => {
            if erp {
                "chk_vfo:\nChkVFO: 1\nRPRT 0\n".to_string()
            } else {
                "1\n".to_string()
            }
        }
        "dump_caps" => {
            let body = state.caps_lines.join("\n");
            if erp {
                format!("dump_caps:\n{body}\nRPRT 0\n")
            } else {
                format!("{body}\n")
            }
        }
        "dump_state" => {
            let body = "0\n1\n2\ndone";
            if erp {
                format!("dump_state:\n{body}\nRPRT 0\n")
            } else {
                format!("{body}\n")
            }
        }
        _ => "RPRT -11\n".to_string(),
    }
}

fn set_reply(erp: bool, name: &str, args: &str) -> String {
    if erp {
        format!("{name}: {args}\nRPRT 0\n")
    } else {
        "RPRT 0\n".to_string()
    }
}

fn get_reply(erp: bool, name: &str, records: &[(&str, String)]) -> String {
    if erp {
        let mut out = format!("{name}:\n");
        for (key, value) in records {
            out.push_str(&format!("{key}: {value}\n"));
        }
        out.push_str("RPRT 0\n");
        out
    } else {
        let mut out = String::new();
        for (_, value) in records {
            out.push_str(value);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn send_line(addr: &str, line: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        let mut buf = vec![0u8; 4096];
        let mut out = String::new();
        loop {
            match tokio::time::timeout(
                std::time::Duration::from_millis(200),
                stream.read(&mut buf),
            )
            .await
            {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
                Ok(Ok(n)) => out.push_str(&String::from_utf8_lossy(&buf[..n])),
            }
        }
        out
    }

    #[tokio::test]
    async fn answers_erp_get_freq() {
        let rig = MockRigctld::start().await.unwrap();
        rig.set_state(7_040_000, "CW", 500);
        let reply = send_line(rig.addr(), "+\\get_freq").await;
        assert_eq!(reply, "get_freq:\nFrequency: 7040000\nRPRT 0\n");
        rig.shutdown().await;
    }

    #[tokio::test]
    async fn set_freq_updates_state_and_log() {
        let rig = MockRigctld::start().await.unwrap();
        let reply = send_line(rig.addr(), "+\\set_freq 14200000").await;
        assert!(reply.ends_with("RPRT 0\n"));
        assert_eq!(rig.frequency(), 14_200_000);
        assert_eq!(rig.command_count("set_freq"), 1);
        rig.shutdown().await;
    }

    #[tokio::test]
    async fn default_protocol_replies_without_rprt_on_gets() {
        let rig = MockRigctld::start().await.unwrap();
        rig.set_state(7_040_000, "CW", 500);
        let reply = send_line(rig.addr(), "\\get_mode").await;
        assert_eq!(reply, "CW\n500\n");
        rig.shutdown().await;
    }

    #[tokio::test]
    async fn erp_rejected_when_disabled() {
        let rig = MockRigctld::start().await.unwrap();
        rig.set_erp_supported(false);
        let reply = send_line(rig.addr(), "+\\get_freq").await;
        assert_eq!(reply, "RPRT -11\n");
        // Default protocol still works.
        let reply = send_line(rig.addr(), "\\get_freq").await;
        assert_eq!(reply, "14074000\n");
        rig.shutdown().await;
    }

    #[tokio::test]
    async fn scripted_failure_applies_once() {
        let rig = MockRigctld::start().await.unwrap();
        rig.fail_next("set_freq", -9);
        let reply = send_line(rig.addr(), "+\\set_freq 14200000").await;
        assert_eq!(reply, "RPRT -9\n");
        let reply = send_line(rig.addr(), "+\\set_freq 14200000").await;
        assert!(reply.ends_with("RPRT 0\n"));
        rig.shutdown().await;
    }

    #[tokio::test]
    async fn kill_and_restart_on_same_port() {
        let mut rig = MockRigctld::start().await.unwrap();
        let addr = rig.addr().to_string();
        rig.kill().await;
        rig.restart().await.unwrap();
        let reply = send_line(&addr, "+\\get_freq").await;
        assert!(reply.contains("RPRT 0"));
        rig.shutdown().await;
    }
}
