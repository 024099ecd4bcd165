//! `dump_caps` parsing.
//!
//! The capability report is a loosely formatted multi-line text block. Only
//! the `Can get/set ...` flags and the mode list are interpreted; everything
//! else is driver-specific prose.

use multirig_core::RigCapabilities;

/// A flag value is true when the rig answers `Y` (yes) or `E` (emulated).
fn parse_flag(v: &str) -> bool {
    matches!(
        v.trim().chars().next().map(|c| c.to_ascii_uppercase()),
        Some('Y') | Some('E')
    )
}

/// Split a `Mode list:` tail into clean, deduplicated tokens.
fn parse_mode_list(rest: &str) -> Vec<String> {
    let rest = rest.trim();
    if rest.is_empty() || rest.starts_with("None") {
        return Vec::new();
    }
    let mut out = Vec::new();
    for tok in rest.split_whitespace() {
        let t = tok.trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '.'));
        if t.is_empty() || t == "None" {
            continue;
        }
        if !out.iter().any(|m| m == t) {
            out.push(t.to_string());
        }
    }
    out
}

/// Parse a `dump_caps` report into capability flags and the mode list.
///
/// Unknown lines are ignored; a report that mentions none of the recognized
/// flags yields empty capabilities (which a client treats as "not detected").
pub fn parse_dump_caps(lines: &[String]) -> (RigCapabilities, Vec<String>) {
    let mut caps = RigCapabilities::default();
    let mut modes = Vec::new();

    for line in lines {
        let s = line.trim();

        if let Some(rest) = s.strip_prefix("Mode list:") {
            for m in parse_mode_list(rest) {
                if !modes.contains(&m) {
                    modes.push(m);
                }
            }
            continue;
        }

        let Some((key, rest)) = s.split_once(':') else {
            continue;
        };
        let flag = parse_flag(rest);
        match key.trim() {
            "Can set Frequency" => caps.freq_set = flag,
            "Can get Frequency" => caps.freq_get = flag,
            "Can set Mode" => caps.mode_set = flag,
            "Can get Mode" => caps.mode_get = flag,
            "Can set VFO" => caps.vfo_set = flag,
            "Can get VFO" => caps.vfo_get = flag,
            "Can set PTT" => caps.ptt_set = flag,
            "Can get PTT" => caps.ptt_get = flag,
            _ => {}
        }
    }

    (caps, modes)
}

/// Render capability flags back into `dump_caps`-style lines. Used by the
/// listener to answer `dump_caps` for the main rig from its cached snapshot.
pub fn format_dump_caps(caps: &RigCapabilities, modes: &[String]) -> Vec<String> {
    let flag = |b: bool| if b { "Y" } else { "N" };
    let mut lines = vec![
        format!("Can set Frequency: {}", flag(caps.freq_set)),
        format!("Can get Frequency: {}", flag(caps.freq_get)),
        format!("Can set Mode: {}", flag(caps.mode_set)),
        format!("Can get Mode: {}", flag(caps.mode_get)),
        format!("Can set VFO: {}", flag(caps.vfo_set)),
        format!("Can get VFO: {}", flag(caps.vfo_get)),
        format!("Can set PTT: {}", flag(caps.ptt_set)),
        format!("Can get PTT: {}", flag(caps.ptt_get)),
    ];
    if modes.is_empty() {
        lines.push("Mode list: None".to_string());
    } else {
        lines.push(format!("Mode list: {}", modes.join(" ")));
    }
    lines
}
