//! Streaming decode of rigctl replies.
//!
//! Bytes from the transport accumulate in a [`LineBuffer`]; the connection
//! pulls complete lines out and assembles them into a [`RigctlReply`] -- the
//! data lines preceding the `RPRT` marker plus the integer code itself.
//! Value extraction helpers understand both the ERP `Key: Value` records and
//! the bare positional lines of the default protocol.

use multirig_core::{Error, Result};

/// One complete reply: the data lines and the `RPRT` code.
///
/// `rprt == 0` is success; any negative value is a Hamlib error code,
/// matched numerically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RigctlReply {
    /// Reply lines in arrival order, `RPRT` line excluded.
    pub lines: Vec<String>,
    /// The `RPRT` return code.
    pub rprt: i32,
}

impl RigctlReply {
    /// A successful reply with the given data lines.
    pub fn ok(lines: Vec<String>) -> Self {
        RigctlReply { lines, rprt: 0 }
    }

    /// Convert a negative `rprt` into [`Error::Rig`]; pass success through.
    pub fn into_result(self, command: &str) -> Result<RigctlReply> {
        if self.rprt < 0 {
            Err(Error::Rig {
                code: self.rprt,
                command: command.to_string(),
            })
        } else {
            Ok(self)
        }
    }

    /// Look up an ERP `Key: Value` record.
    pub fn key_value(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            (k.trim() == key).then(|| v.trim())
        })
    }

    /// Data lines with ERP echo headers (`get_freq:`) removed.
    ///
    /// A header is a line whose trailing colon carries no value; the first
    /// such line is the echoed command name.
    pub fn payload(&self) -> Vec<&str> {
        self.lines
            .iter()
            .map(|l| l.as_str())
            .filter(|l| !is_header_line(l))
            .collect()
    }
}

fn is_header_line(line: &str) -> bool {
    match line.split_once(':') {
        Some((name, rest)) => rest.trim().is_empty() && !name.trim().contains(' '),
        None => false,
    }
}

/// Extract the code from an `RPRT <int>` line, if this is one.
pub fn parse_rprt(line: &str) -> Option<i32> {
    let rest = line.trim().strip_prefix("RPRT")?;
    rest.trim().parse().ok()
}

/// Incremental line assembly over raw transport reads.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the transport.
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete line, without its terminator. CR before the LF
    /// is stripped; invalid UTF-8 is replaced lossily.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop(); // the LF
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Discard buffered bytes (called when a connection is torn down).
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Whether any bytes are waiting.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Frequency in hertz from a `get_freq` reply.
pub fn parse_freq(reply: &RigctlReply) -> Option<u64> {
    let raw = reply
        .key_value("Frequency")
        .or_else(|| reply.payload().first().copied())?;
    parse_number(raw).map(|v| v as u64)
}

/// Mode token and passband from a `get_mode` reply.
pub fn parse_mode(reply: &RigctlReply) -> (Option<String>, Option<u32>) {
    let payload = reply.payload();
    let mode = reply
        .key_value("Mode")
        .or_else(|| payload.first().copied())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty());
    let passband = reply
        .key_value("Passband")
        .or_else(|| payload.get(1).copied())
        .and_then(parse_number)
        .map(|v| v as u32);
    (mode, passband)
}

/// VFO name from a `get_vfo` reply.
pub fn parse_vfo(reply: &RigctlReply) -> Option<String> {
    reply
        .key_value("VFO")
        .or_else(|| reply.payload().first().copied())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

/// PTT state from a `get_ptt` reply.
pub fn parse_ptt(reply: &RigctlReply) -> Option<bool> {
    let raw = reply
        .key_value("PTT")
        .or_else(|| reply.payload().first().copied())?;
    parse_number(raw).map(|v| v != 0.0)
}

/// Power status from a `get_powerstat` reply (1 = on).
pub fn parse_powerstat(reply: &RigctlReply) -> Option<u8> {
    let raw = reply
        .key_value("Power Status")
        .or_else(|| reply.payload().first().copied())?;
    parse_number(raw).map(|v| v as u8)
}

/// Dual-VFO flag from a `chk_vfo` reply. Some servers answer a bare digit,
/// others `CHKVFO <n>` or `ChkVFO: <n>`.
pub fn parse_chk_vfo(reply: &RigctlReply) -> Option<u8> {
    let raw = reply
        .key_value("ChkVFO")
        .or_else(|| reply.payload().first().copied())?;
    let raw = raw.trim().trim_start_matches("CHKVFO").trim();
    parse_number(raw).map(|v| v as u8)
}

/// The data lines of a `dump_caps` / `dump_state` reply, header stripped.
pub fn dump_payload(reply: &RigctlReply, long_name: &str) -> Vec<String> {
    let header = format!("{long_name}:");
    reply
        .lines
        .iter()
        .filter(|l| l.trim() != header)
        .cloned()
        .collect()
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}
