//! Pure, allocation-light parsing helpers for firmware status lines. None of
//! these touch I/O; they take an already decoded `&str` line and return
//! `Option`/`bool` so a line the parser doesn't understand is just ignored
//! rather than raising.

use winnow::{
    ascii::{dec_int, dec_uint, float},
    combinator::{alt, opt, preceded},
    token::take_until,
    PResult, Parser,
};

/// `Resend:` / `rs ` lines naming the line number firmware wants replayed.
/// Accepts `Resend:N`, `Resend: N` and `rs N`, in that preference order.
pub fn parse_resend_target(line: &str) -> Option<u32> {
    fn resend_colon(input: &mut &str) -> PResult<u32> {
        preceded(("Resend:", opt(' ')), dec_uint).parse_next(input)
    }
    fn rs_prefixed(input: &mut &str) -> PResult<u32> {
        preceded("rs ", dec_uint).parse_next(input)
    }
    alt((resend_colon, rs_prefixed)).parse(line).ok()
}

/// `N123` / `ok N123` line-number acknowledgements some firmwares echo back.
pub fn parse_n_int(line: &str) -> Option<i64> {
    fn n_prefixed(input: &mut &str) -> PResult<i64> {
        preceded('N', dec_int).parse_next(input)
    }
    take_until(0.., "N")
        .and_then(n_prefixed)
        .parse(line)
        .ok()
}

/// Extracts the `S<int>` parameter from a command, e.g. `M109 S210` -> 210.
/// Used both when queuing heat-and-wait commands (to know what to wait for)
/// and by the virtual printer when deciding what to report back.
pub fn parse_s_int(cmd: &str) -> Option<i64> {
    for token in cmd.split_whitespace() {
        if let Some(rest) = token.strip_prefix('S') {
            if let Ok(value) = rest.parse::<i64>() {
                return Some(value);
            }
        }
    }
    None
}

/// Extracts the `N<int>` target from an `M110` command, e.g. `M110 N123` ->
/// 123. `None` when the command carries no `N` word at all (the firmware
/// reset then implicitly targets line 0).
pub fn parse_m110_line_number(cmd: &str) -> Option<u32> {
    cmd.split_whitespace()
        .skip(1)
        .find_map(|token| token.strip_prefix(['N', 'n']))
        .and_then(|rest| rest.parse::<u32>().ok())
}

/// One `T:<actual>/<target>` or `B:<actual>/<target>` temperature field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature {
    pub actual: f32,
    pub target: Option<f32>,
}

/// Parses `<actual>[/<target>]` starting right after a `T:`/`B:` marker.
fn temperature_value(input: &mut &str) -> PResult<Temperature> {
    let actual = float.parse_next(input)?;
    let target = opt(preceded('/', float)).parse_next(input)?;
    Ok(Temperature { actual, target })
}

/// Scans a status line for every `T:`/`T<n>:` and `B:` field it contains,
/// tolerating firmware-specific ordering and extra fields like `@:` power:
/// walks word-ish tokens and tries each one as a temperature field rather
/// than anchoring to a fixed line shape.
pub fn parse_temperatures(line: &str) -> (Vec<Temperature>, Option<Temperature>) {
    let mut tools = Vec::new();
    let mut bed = None;
    for token in line.split_whitespace() {
        if let Some(rest) = token.strip_prefix("B:") {
            let mut rest = rest;
            if let Ok(temp) = temperature_value(&mut rest) {
                bed = Some(temp);
            }
            continue;
        }
        if let Some(rest) = token.strip_prefix('T') {
            // Accept both `T:` and `T0:`, `T1:` ... tool-indexed fields.
            let mut after_index: &str = rest;
            let _: PResult<i64> = dec_int.parse_next(&mut after_index);
            if let Some(rest) = after_index.strip_prefix(':') {
                let mut rest = rest;
                if let Ok(temp) = temperature_value(&mut rest) {
                    tools.push(temp);
                }
            }
        }
    }
    (tools, bed)
}

/// `SD printing byte 1234/5678` progress line.
pub fn parse_sd_progress(line: &str) -> Option<(u64, u64)> {
    fn inner(input: &mut &str) -> PResult<(u64, u64)> {
        let current = preceded("SD printing byte ", dec_uint).parse_next(input)?;
        let total = preceded('/', dec_uint).parse_next(input)?;
        Ok((current, total))
    }
    take_until(0.., "SD printing byte")
        .and_then(inner)
        .parse(line)
        .ok()
}

/// `File opened:<name> Size:<bytes>` reply to `M23`.
pub fn parse_file_opened(line: &str) -> Option<(String, u64)> {
    fn inner(input: &mut &str) -> PResult<(String, u64)> {
        let name = preceded("File opened:", take_until(0.., " Size:")).parse_next(input)?;
        let size = preceded(" Size:", dec_uint).parse_next(input)?;
        Ok((name.trim().to_string(), size))
    }
    inner.parse(line).ok()
}

/// Firmware's answer to `M27`: `SD printing byte <done>/<total>`, handled by
/// [`parse_sd_progress`], or `Not SD printing` when idle.
pub fn is_not_sd_printing(line: &str) -> bool {
    line.contains("Not SD printing")
}

/// Communication complaints that ride in on an `Error:` line but are really
/// just the checksum/line-number handshake disagreeing with itself; the
/// firmware follows up with its own `Resend:` separately, so these must not
/// promote the session into an error state.
const BENIGN_ERROR_MARKERS: [&str; 7] = [
    "checksum mismatch",
    "Wrong checksum",
    "Line Number is not Last Line Number",
    "expected line",
    "No Line Number with checksum",
    "No Checksum with line number",
    "Missing checksum",
];

/// True for a firmware line that is nothing but `Error:<digit>` with the
/// rest of the message split onto the following physical line (Marlin does
/// this for some MINTEMP/MAXTEMP reports). The caller should read one more
/// line and append it before classifying.
pub fn is_split_error_continuation(line: &str) -> bool {
    match line.strip_prefix("Error:") {
        Some(rest) => rest.len() == 1 && rest.as_bytes()[0].is_ascii_digit(),
        None => false,
    }
}

/// Classifies a line already known to start with `Error:`. Returns `None`
/// for one of the benign communication complaints, `Some(message)` (the
/// text after the prefix) for a genuine fatal firmware condition.
pub fn classify_error_line(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("Error:")?;
    if BENIGN_ERROR_MARKERS.iter().any(|marker| line.contains(marker)) {
        None
    } else {
        Some(rest)
    }
}

/// Deliberately a substring test, not a parsed token: "this looks like an
/// acknowledgement, advance the send cursor" is true for any line merely
/// containing `ok` anywhere (e.g. inside `Looking up...`), which is loose
/// but matches what firmware implementations actually rely on.
pub fn looks_like_ack(line: &str) -> bool {
    line.contains("ok") || line.contains("SD printing byte")
}

/// `rewrite_feedrate` support: pulls the numeric value following `F` in a
/// line already known to contain a bare feedrate word, used when a
/// section-specific feedrate multiplier needs to replace it.
pub fn leading_signed_float(input: &str) -> Option<f64> {
    fn inner(input: &mut &str) -> PResult<f64> {
        preceded(opt(' '), float).parse_next(input)
    }
    let mut s = input;
    opt(inner).parse_next(&mut s).ok().flatten()
}

/// Pulls the `Z<value>` word out of a `G0`/`G1` move, used to notice layer
/// changes while streaming a host print.
pub fn parse_z_word(cmd: &str) -> Option<f64> {
    if !(matches_word(cmd, "G0") || matches_word(cmd, "G1")) {
        return None;
    }
    cmd.split_whitespace()
        .find_map(|token| token.strip_prefix('Z'))
        .and_then(|rest| rest.parse::<f64>().ok())
}

fn matches_word(cmd: &str, word: &str) -> bool {
    cmd.split_whitespace()
        .next()
        .is_some_and(|first| first.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resend_accepts_both_spellings() {
        assert_eq!(parse_resend_target("Resend:12"), Some(12));
        assert_eq!(parse_resend_target("Resend: 12"), Some(12));
        assert_eq!(parse_resend_target("rs 12"), Some(12));
        assert_eq!(parse_resend_target("ok"), None);
    }

    #[test]
    fn s_int_pulls_heat_target() {
        assert_eq!(parse_s_int("M109 S210"), Some(210));
        assert_eq!(parse_s_int("M104 S0"), Some(0));
        assert_eq!(parse_s_int("M105"), None);
    }

    #[test]
    fn sd_progress_extracts_pair() {
        assert_eq!(
            parse_sd_progress("ok SD printing byte 100/5000"),
            Some((100, 5000))
        );
        assert_eq!(parse_sd_progress("Not SD printing"), None);
    }

    #[test]
    fn file_opened_parses_name_and_size() {
        assert_eq!(
            parse_file_opened("File opened:test.gco Size:1024"),
            Some(("test.gco".to_string(), 1024))
        );
    }

    #[test]
    fn ack_detection_is_deliberately_substring_based() {
        assert!(looks_like_ack("ok T:200/210"));
        assert!(looks_like_ack("Looking up defaults"));
        assert!(!looks_like_ack("busy:processing"));
    }

    #[test]
    fn temperatures_parse_tool_and_bed() {
        let (tools, bed) = parse_temperatures("ok T:210.0 /210.0 B:60.0 /60.0 @:127");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].actual, 210.0);
        assert_eq!(tools[0].target, Some(210.0));
        assert_eq!(bed.unwrap().actual, 60.0);
    }

    #[test]
    fn temperatures_parse_indexed_tools() {
        let (tools, _bed) = parse_temperatures("ok T0:200.0 /200.0 T1:0.0 /0.0");
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[1].actual, 0.0);
    }

    #[test]
    fn fatal_markers_detected() {
        assert_eq!(
            classify_error_line("Error:Extruder switched off. MINTEMP triggered"),
            Some("Extruder switched off. MINTEMP triggered")
        );
        assert_eq!(classify_error_line("Error:checksum mismatch"), None);
        assert_eq!(classify_error_line("Error:Wrong checksum"), None);
        assert_eq!(classify_error_line("ok"), None);
    }

    #[test]
    fn split_error_continuation_is_single_trailing_digit() {
        assert!(is_split_error_continuation("Error:5"));
        assert!(!is_split_error_continuation("Error:55"));
        assert!(!is_split_error_continuation("Error:checksum mismatch"));
        assert!(!is_split_error_continuation("ok"));
    }

    #[test]
    fn m110_line_number_defaults_when_absent() {
        assert_eq!(parse_m110_line_number("M110 N123"), Some(123));
        assert_eq!(parse_m110_line_number("M110"), None);
    }

    #[test]
    fn z_word_only_parsed_from_moves() {
        assert_eq!(parse_z_word("G1 X10 Z0.3 F1200"), Some(0.3));
        assert_eq!(parse_z_word("G0 Z5"), Some(5.0));
        assert_eq!(parse_z_word("G1 X10 F1200"), None);
        assert_eq!(parse_z_word("M104 S200"), None);
    }
}
