//! rigctl command encoding and parsing.
//!
//! Commands are always encoded in canonical long form (`\get_freq`,
//! `\set_mode USB 2400`), one per line. Prefixing a command with `+`
//! activates the Extended Response Protocol: the peer echoes the long
//! command name, emits `Key: Value` data records, and terminates the reply
//! with an explicit `RPRT <int>` line.
//!
//! Parsing accepts everything a rigctl client may send: short single-letter
//! commands (`F 14074000`), long names with or without the leading
//! backslash, and any single ASCII punctuation ERP prefix.

use std::fmt;

/// A rigctl protocol command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RigctlCommand {
    /// `\set_freq <hz>` / `F`.
    SetFreq(u64),
    /// `\get_freq` / `f`.
    GetFreq,
    /// `\set_mode <MODE> <PB>` / `M`. A `None` passband encodes as `0`,
    /// which selects the backend default width.
    SetMode {
        /// Mode token, passed through verbatim (e.g. "USB", "PKTUSB").
        mode: String,
        /// Passband width in hertz; `None` means backend default.
        passband: Option<u32>,
    },
    /// `\get_mode` / `m`.
    GetMode,
    /// `\set_vfo <VFO>` / `V`.
    SetVfo(String),
    /// `\get_vfo` / `v`.
    GetVfo,
    /// `\set_ptt <0|1>` / `T`.
    SetPtt(bool),
    /// `\get_ptt` / `t`.
    GetPtt,
    /// `\get_powerstat`.
    GetPowerstat,
    /// `\get_split_vfo` / `s`.
    GetSplitVfo,
    /// `\get_info`.
    GetInfo,
    /// `\get_level <NAME>` / `l`. The level name is opaque to MultiRig.
    GetLevel(String),
    /// `\set_conf <token> <value>`. Driver-specific, passed through.
    SetConf {
        /// Configuration token name.
        token: String,
        /// Configuration value.
        value: String,
    },
    /// `\get_conf <token>`. Driver-specific, passed through.
    GetConf(String),
    /// `\chk_vfo` -- probe whether the backend is VFO-addressable.
    ChkVfo,
    /// `\dump_caps` -- multi-line capability report.
    DumpCaps,
    /// `\dump_state` -- multi-line state block.
    DumpState,
}

impl RigctlCommand {
    /// The canonical long command name (without the leading backslash).
    pub fn long_name(&self) -> &'static str {
        match self {
            RigctlCommand::SetFreq(_) => "set_freq",
            RigctlCommand::GetFreq => "get_freq",
            RigctlCommand::SetMode { .. } => "set_mode",
            RigctlCommand::GetMode => "get_mode",
            RigctlCommand::SetVfo(_) => "set_vfo",
            RigctlCommand::GetVfo => "get_vfo",
            RigctlCommand::SetPtt(_) => "set_ptt",
            RigctlCommand::GetPtt => "get_ptt",
            RigctlCommand::GetPowerstat => "get_powerstat",
            RigctlCommand::GetSplitVfo => "get_split_vfo",
            RigctlCommand::GetInfo => "get_info",
            RigctlCommand::GetLevel(_) => "get_level",
            RigctlCommand::SetConf { .. } => "set_conf",
            RigctlCommand::GetConf(_) => "get_conf",
            RigctlCommand::ChkVfo => "chk_vfo",
            RigctlCommand::DumpCaps => "dump_caps",
            RigctlCommand::DumpState => "dump_state",
        }
    }

    /// Whether this is a set (state-changing) command.
    pub fn is_set(&self) -> bool {
        matches!(
            self,
            RigctlCommand::SetFreq(_)
                | RigctlCommand::SetMode { .. }
                | RigctlCommand::SetVfo(_)
                | RigctlCommand::SetPtt(_)
                | RigctlCommand::SetConf { .. }
        )
    }

    /// Number of bare value lines this command yields under the default
    /// (non-ERP) protocol, or `None` for the multi-line dump outputs, which
    /// are read until the peer goes idle.
    pub fn expected_value_lines(&self) -> Option<usize> {
        match self {
            RigctlCommand::GetFreq
            | RigctlCommand::GetVfo
            | RigctlCommand::GetPtt
            | RigctlCommand::GetPowerstat
            | RigctlCommand::ChkVfo
            | RigctlCommand::GetConf(_)
            | RigctlCommand::GetLevel(_)
            | RigctlCommand::GetInfo => Some(1),
            RigctlCommand::GetMode | RigctlCommand::GetSplitVfo => Some(2),
            RigctlCommand::SetFreq(_)
            | RigctlCommand::SetMode { .. }
            | RigctlCommand::SetVfo(_)
            | RigctlCommand::SetPtt(_)
            | RigctlCommand::SetConf { .. } => Some(0),
            RigctlCommand::DumpCaps | RigctlCommand::DumpState => None,
        }
    }

    /// The space-separated argument list, empty for no-argument commands.
    fn args(&self) -> String {
        match self {
            RigctlCommand::SetFreq(hz) => hz.to_string(),
            RigctlCommand::SetMode { mode, passband } => {
                format!("{mode} {}", passband.unwrap_or(0))
            }
            RigctlCommand::SetVfo(vfo) => vfo.clone(),
            RigctlCommand::SetPtt(on) => if *on { "1" } else { "0" }.to_string(),
            RigctlCommand::GetLevel(name) => name.clone(),
            RigctlCommand::SetConf { token, value } => format!("{token} {value}"),
            RigctlCommand::GetConf(token) => token.clone(),
            _ => String::new(),
        }
    }

    /// Encode to one newline-terminated protocol line, with the `+` ERP
    /// prefix when `erp` is set.
    pub fn encode(&self, erp: bool) -> String {
        let prefix = if erp { "+" } else { "" };
        let name = self.long_name();
        let args = self.args();
        if args.is_empty() {
            format!("{prefix}\\{name}\n")
        } else {
            format!("{prefix}\\{name} {args}\n")
        }
    }

    /// A human-readable description for debug rings and logs.
    pub fn describe(&self) -> String {
        match self {
            RigctlCommand::SetFreq(hz) => format!("set frequency {hz} Hz"),
            RigctlCommand::GetFreq => "read frequency".into(),
            RigctlCommand::SetMode { mode, passband } => match passband {
                Some(pb) => format!("set mode {mode} (passband {pb} Hz)"),
                None => format!("set mode {mode}"),
            },
            RigctlCommand::GetMode => "read mode".into(),
            RigctlCommand::SetVfo(vfo) => format!("select {vfo}"),
            RigctlCommand::GetVfo => "read selected VFO".into(),
            RigctlCommand::SetPtt(on) => {
                format!("PTT {}", if *on { "on" } else { "off" })
            }
            RigctlCommand::GetPtt => "read PTT state".into(),
            RigctlCommand::GetPowerstat => "read power status".into(),
            RigctlCommand::GetSplitVfo => "read split state".into(),
            RigctlCommand::GetInfo => "read rig info".into(),
            RigctlCommand::GetLevel(name) => format!("read level {name}"),
            RigctlCommand::SetConf { token, value } => format!("set conf {token}={value}"),
            RigctlCommand::GetConf(token) => format!("read conf {token}"),
            RigctlCommand::ChkVfo => "probe VFO addressing".into(),
            RigctlCommand::DumpCaps => "dump capabilities".into(),
            RigctlCommand::DumpState => "dump state".into(),
        }
    }
}

impl fmt::Display for RigctlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.long_name())
    }
}

/// A command line parsed from a rigctl client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    /// The decoded command.
    pub command: RigctlCommand,
    /// The ERP prefix character, when one was present.
    pub erp: Option<char>,
}

/// Whether a character activates the Extended Response Protocol.
///
/// Any ASCII punctuation works, except the characters rigctl itself uses:
/// `\` (long command marker), `?` (help) and `_`.
pub fn is_erp_prefix(ch: char) -> bool {
    if ch.is_alphanumeric() || ch.is_whitespace() {
        return false;
    }
    !matches!(ch, '\\' | '?' | '_')
}

/// Parse one line of the rigctl wire protocol.
///
/// Returns `None` for empty lines and commands outside the supported
/// catalogue (the listener answers those with `RPRT -11`).
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let mut rest = line.trim_start();

    let mut erp = None;
    if let Some(first) = rest.chars().next() {
        if is_erp_prefix(first) {
            erp = Some(first);
            rest = rest[first.len_utf8()..].trim_start();
        }
    }

    let mut parts = rest.split_whitespace();
    let word = parts.next()?;
    let name = word.strip_prefix('\\').unwrap_or(word);
    let args: Vec<&str> = parts.collect();

    let command = match name {
        "F" | "set_freq" => RigctlCommand::SetFreq(parse_hz(args.first()?)?),
        "f" | "get_freq" => RigctlCommand::GetFreq,
        "M" | "set_mode" => {
            let mode = (*args.first()?).to_string();
            let passband = match args.get(1) {
                Some(pb) => {
                    let pb = parse_hz(pb)? as u32;
                    // 0 selects the backend default width.
                    (pb != 0).then_some(pb)
                }
                None => None,
            };
            RigctlCommand::SetMode { mode, passband }
        }
        "m" | "get_mode" => RigctlCommand::GetMode,
        "V" | "set_vfo" => RigctlCommand::SetVfo((*args.first()?).to_string()),
        "v" | "get_vfo" => RigctlCommand::GetVfo,
        "T" | "set_ptt" => RigctlCommand::SetPtt(args.first()?.trim() != "0"),
        "t" | "get_ptt" => RigctlCommand::GetPtt,
        "get_powerstat" => RigctlCommand::GetPowerstat,
        "s" | "get_split_vfo" => RigctlCommand::GetSplitVfo,
        "get_info" => RigctlCommand::GetInfo,
        "l" | "get_level" => RigctlCommand::GetLevel((*args.first()?).to_string()),
        "set_conf" => RigctlCommand::SetConf {
            token: (*args.first()?).to_string(),
            value: (*args.get(1)?).to_string(),
        },
        "get_conf" => RigctlCommand::GetConf((*args.first()?).to_string()),
        "chk_vfo" => RigctlCommand::ChkVfo,
        "dump_caps" => RigctlCommand::DumpCaps,
        "dump_state" => RigctlCommand::DumpState,
        _ => return None,
    };

    Some(ParsedLine { command, erp })
}

/// Parse a frequency argument, tolerating a decimal point the way rigctl
/// clients sometimes send one (`14074000.0`).
fn parse_hz(s: &str) -> Option<u64> {
    if let Ok(v) = s.parse::<u64>() {
        return Some(v);
    }
    s.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> Vec<RigctlCommand> {
        vec![
            RigctlCommand::SetFreq(14_074_000),
            RigctlCommand::GetFreq,
            RigctlCommand::SetMode {
                mode: "USB".into(),
                passband: Some(2400),
            },
            RigctlCommand::SetMode {
                mode: "CW".into(),
                passband: None,
            },
            RigctlCommand::GetMode,
            RigctlCommand::SetVfo("VFOB".into()),
            RigctlCommand::GetVfo,
            RigctlCommand::SetPtt(true),
            RigctlCommand::SetPtt(false),
            RigctlCommand::GetPtt,
            RigctlCommand::GetPowerstat,
            RigctlCommand::GetSplitVfo,
            RigctlCommand::GetInfo,
            RigctlCommand::GetLevel("STRENGTH".into()),
            RigctlCommand::SetConf {
                token: "stop_bits".into(),
                value: "2".into(),
            },
            RigctlCommand::GetConf("stop_bits".into()),
            RigctlCommand::ChkVfo,
            RigctlCommand::DumpCaps,
            RigctlCommand::DumpState,
        ]
    }

    #[test]
    fn encode_decode_round_trip() {
        for cmd in catalogue() {
            let wire = cmd.encode(false);
            let parsed = parse_line(wire.trim_end()).unwrap_or_else(|| panic!("parse {wire:?}"));
            assert_eq!(parsed.command, cmd, "round trip failed for {wire:?}");
            assert_eq!(parsed.erp, None);
        }
    }

    #[test]
    fn encode_decode_round_trip_erp() {
        for cmd in catalogue() {
            let wire = cmd.encode(true);
            assert!(wire.starts_with('+'));
            assert!(wire.ends_with('\n'));
            let parsed = parse_line(wire.trim_end()).unwrap();
            assert_eq!(parsed.command, cmd);
            assert_eq!(parsed.erp, Some('+'));
        }
    }

    #[test]
    fn encode_long_form() {
        assert_eq!(
            RigctlCommand::SetFreq(14_200_000).encode(false),
            "\\set_freq 14200000\n"
        );
        assert_eq!(RigctlCommand::GetFreq.encode(true), "+\\get_freq\n");
        assert_eq!(
            RigctlCommand::SetMode {
                mode: "USB".into(),
                passband: Some(2400)
            }
            .encode(false),
            "\\set_mode USB 2400\n"
        );
    }

    #[test]
    fn default_passband_encodes_as_zero() {
        let cmd = RigctlCommand::SetMode {
            mode: "USB".into(),
            passband: None,
        };
        assert_eq!(cmd.encode(false), "\\set_mode USB 0\n");
    }

    #[test]
    fn parse_short_forms() {
        assert_eq!(
            parse_line("F 7074000").unwrap().command,
            RigctlCommand::SetFreq(7_074_000)
        );
        assert_eq!(parse_line("f").unwrap().command, RigctlCommand::GetFreq);
        assert_eq!(
            parse_line("M USB 2400").unwrap().command,
            RigctlCommand::SetMode {
                mode: "USB".into(),
                passband: Some(2400)
            }
        );
        assert_eq!(parse_line("m").unwrap().command, RigctlCommand::GetMode);
        assert_eq!(
            parse_line("V VFOA").unwrap().command,
            RigctlCommand::SetVfo("VFOA".into())
        );
        assert_eq!(
            parse_line("T 1").unwrap().command,
            RigctlCommand::SetPtt(true)
        );
        assert_eq!(
            parse_line("T 0").unwrap().command,
            RigctlCommand::SetPtt(false)
        );
        assert_eq!(parse_line("t").unwrap().command, RigctlCommand::GetPtt);
    }

    #[test]
    fn parse_erp_prefixed_short_form() {
        let parsed = parse_line("+f").unwrap();
        assert_eq!(parsed.command, RigctlCommand::GetFreq);
        assert_eq!(parsed.erp, Some('+'));

        // Any non-reserved punctuation activates ERP.
        let parsed = parse_line(";F 14074000").unwrap();
        assert_eq!(parsed.erp, Some(';'));
    }

    #[test]
    fn backslash_is_not_an_erp_prefix() {
        let parsed = parse_line("\\get_freq").unwrap();
        assert_eq!(parsed.command, RigctlCommand::GetFreq);
        assert_eq!(parsed.erp, None);
    }

    #[test]
    fn parse_fractional_frequency() {
        assert_eq!(
            parse_line("F 14074000.0").unwrap().command,
            RigctlCommand::SetFreq(14_074_000)
        );
    }

    #[test]
    fn parse_mode_without_passband() {
        assert_eq!(
            parse_line("M CW").unwrap().command,
            RigctlCommand::SetMode {
                mode: "CW".into(),
                passband: None
            }
        );
        // Explicit zero also means backend default.
        assert_eq!(
            parse_line("M CW 0").unwrap().command,
            RigctlCommand::SetMode {
                mode: "CW".into(),
                passband: None
            }
        );
    }

    #[test]
    fn parse_rejects_unknown_and_empty() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("wut").is_none());
        assert!(parse_line("+wut").is_none());
        assert!(parse_line("F").is_none()); // missing argument
    }

    #[test]
    fn set_classification() {
        assert!(RigctlCommand::SetFreq(1).is_set());
        assert!(!RigctlCommand::GetFreq.is_set());
        assert!(!RigctlCommand::DumpCaps.is_set());
    }

    #[test]
    fn expected_value_lines_per_command() {
        assert_eq!(RigctlCommand::GetFreq.expected_value_lines(), Some(1));
        assert_eq!(RigctlCommand::GetMode.expected_value_lines(), Some(2));
        assert_eq!(RigctlCommand::GetVfo.expected_value_lines(), Some(1));
        assert_eq!(RigctlCommand::GetPtt.expected_value_lines(), Some(1));
        assert_eq!(RigctlCommand::SetFreq(1).expected_value_lines(), Some(0));
        assert_eq!(RigctlCommand::DumpCaps.expected_value_lines(), None);
    }
}
