//! Deterministic firmware simulator implementing [`printhost_core::Transport`].
//! Enough M-code handling and temperature drift to exercise the real
//! send/resend/print state machine without hardware, plus a handful of
//! real-firmware quirks (missing-file messages, `M26` pending seek,
//! unconditional `M999` resend).

use std::{collections::VecDeque, path::Path, time::Duration};

use bytes::Bytes;
use printhost_core::transport::{Line, Transport};
use printhost_serializer::checksum;
use winnow::{ascii::dec_uint, combinator::preceded, PResult, Parser};

mod sd;
mod temp;

use sd::VirtualSd;
use temp::TemperatureModel;

/// Induces exactly one resend fault when the firmware-side line counter
/// reaches this value, so tests can exercise `protocol::SendCoordinator`'s
/// replay path deterministically.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultPlan {
    pub resend_at_line: Option<u32>,
}

/// Simulated per-line transmission latency. A real serial link never
/// delivers a reply within the same scheduler tick as the write that
/// caused it; without some delay here the monitor's event loop would drain
/// an entire reply queue synchronously, starving out any control message
/// (pause, cancel, ...) a test sends concurrently.
const STEP_DELAY: Duration = Duration::from_millis(2);

pub struct VirtualPrinter {
    baud_rate: u32,
    read_timeout: Duration,
    outbox: VecDeque<Bytes>,
    expected_line: u32,
    temps: TemperatureModel,
    sd: VirtualSd,
    fault: FaultPlan,
    fault_fired: bool,
    /// Line currently outstanding on a `Resend:` request, if any. While
    /// set, further out-of-order frames are dropped silently instead of
    /// each provoking its own `Resend:`, matching the fact that a real
    /// firmware only needs to ask once per gap even if the host's pipelined
    /// sends keep arriving out of order behind it.
    resend_pending: Option<u32>,
    receiving_file: Option<String>,
    closed: bool,
}

impl VirtualPrinter {
    pub fn new(fault: FaultPlan) -> Self {
        let mut printer = Self {
            baud_rate: 250_000,
            read_timeout: Duration::from_millis(500),
            outbox: VecDeque::new(),
            expected_line: 1,
            temps: TemperatureModel::new(),
            sd: VirtualSd::new(),
            fault,
            fault_fired: false,
            resend_pending: None,
            receiving_file: None,
            closed: false,
        };
        printer.outbox.push_back(Bytes::from_static(b"start"));
        printer
    }

    /// Seeds a file visible via `M20`/`M23`, as if already on the virtual
    /// SD card.
    pub fn seed_file(&mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.sd.files.insert(name.into(), contents.into());
    }

    /// Seeds the virtual SD card from every regular file directly under
    /// `dir` (non-recursive), the disk-backed counterpart to [`Self::seed_file`]
    /// used when connecting against `SessionConfig::virtual_sd_dir` rather
    /// than a hand-built test fixture. Unreadable entries are skipped rather
    /// than failing construction, since a stray unreadable file shouldn't
    /// stop the whole simulator from starting.
    pub fn with_sd_dir(fault: FaultPlan, dir: impl AsRef<Path>) -> Self {
        let mut printer = Self::new(fault);
        let Ok(entries) = std::fs::read_dir(dir) else {
            return printer;
        };
        for entry in entries.flatten() {
            let Ok(contents) = std::fs::read(entry.path()) else {
                continue;
            };
            if let Some(name) = entry.file_name().to_str() {
                printer.seed_file(name, contents);
            }
        }
        printer
    }

    fn reply(&mut self, line: impl Into<String>) {
        self.outbox.push_back(Bytes::from(line.into()));
    }

    fn handle_frame(&mut self, raw: &str) {
        if self.receiving_file.is_some() && !raw.starts_with("M29") {
            if let Some(name) = &self.receiving_file {
                self.sd
                    .files
                    .entry(name.clone())
                    .or_default()
                    .extend_from_slice(raw.as_bytes());
                self.sd.files.get_mut(name).unwrap().push(b'\n');
            }
            self.reply("ok");
            return;
        }

        let Some((line_number, cmd, sum)) = parse_checksummed(raw) else {
            // Unnumbered command (handshake probe, M999 reply, etc).
            self.dispatch(raw.trim());
            return;
        };
        let prefix_end = raw.find('*').unwrap_or(raw.len());
        let computed = checksum(raw[..prefix_end].as_bytes());
        if computed != sum {
            self.request_resend(self.expected_line, "checksum mismatch");
            return;
        }
        if line_number != self.expected_line {
            // Frames pipelined behind an already-requested resend arrive
            // out of order by design; drop them instead of re-requesting.
            if self.resend_pending != Some(self.expected_line) {
                self.request_resend(self.expected_line, "Line Number is not Last Line Number+1");
            }
            return;
        }

        if !self.fault_fired {
            if let Some(fault_line) = self.fault.resend_at_line {
                if line_number == fault_line {
                    self.fault_fired = true;
                    self.request_resend(line_number, "induced fault");
                    return;
                }
            }
        }

        self.resend_pending = None;
        self.expected_line = self.expected_line.wrapping_add(1);
        self.dispatch(cmd);
    }

    fn request_resend(&mut self, line_number: u32, reason: &str) {
        self.resend_pending = Some(line_number);
        self.reply(format!(
            "Error:{reason}, Last Line: {}",
            line_number.saturating_sub(1)
        ));
        self.reply(format!("Resend:{line_number}"));
    }

    /// Dispatches one already-validated command body to its M/G-code
    /// handler. Mirrors `VirtualPrinter.write`'s big if/elif ladder.
    fn dispatch(&mut self, cmd: &str) {
        let cmd = cmd.trim();
        let word = cmd.split_whitespace().next().unwrap_or("");
        match word {
            "M105" => {
                self.reply(self.temps.status_line());
            }
            "M104" => {
                if let Some(target) = s_int(cmd) {
                    self.temps.tool_target = target as f32;
                }
                self.reply("ok");
            }
            "M109" => {
                if let Some(target) = s_int(cmd) {
                    self.temps.tool_target = target as f32;
                }
                self.temps.tool_actual = self.temps.tool_target;
                self.reply(self.temps.status_line());
            }
            "M140" => {
                if let Some(target) = s_int(cmd) {
                    self.temps.bed_target = target as f32;
                }
                self.reply("ok");
            }
            "M190" => {
                if let Some(target) = s_int(cmd) {
                    self.temps.bed_target = target as f32;
                }
                self.temps.bed_actual = self.temps.bed_target;
                self.reply(self.temps.status_line());
            }
            "M110" => {
                if let Some(n) = cmd
                    .split_whitespace()
                    .find_map(|tok| tok.strip_prefix('N'))
                    .and_then(|n| n.parse::<u32>().ok())
                {
                    self.expected_line = n.wrapping_add(1);
                }
                self.reply("ok");
            }
            "M20" => {
                self.reply("Begin file list");
                let names: Vec<String> = self.sd.files.keys().cloned().collect();
                for name in names {
                    self.reply(name);
                }
                self.reply("End file list");
                self.reply("ok");
            }
            "M23" => {
                let name = cmd.split_whitespace().nth(1).unwrap_or("").to_string();
                match self.sd.files.get(&name).map(|bytes| bytes.len()) {
                    Some(len) => {
                        self.sd.select(name.clone(), len);
                        self.reply(format!("File opened:{name} Size:{len}"));
                        self.reply("File selected");
                    }
                    None => {
                        self.reply(format!("echo:open failed, File: {name}."));
                    }
                }
                self.reply("ok");
            }
            "M24" => {
                self.sd.printing = true;
                self.reply("ok");
            }
            "M25" => {
                self.sd.printing = false;
                self.reply("ok");
            }
            "M26" => {
                if let Some(pos) = s_int_prefixed(cmd, 'S') {
                    // Applied at the next read tick rather than immediately.
                    self.sd.pending_seek = Some(pos as u64);
                }
                self.reply("ok");
            }
            "M27" => {
                if self.sd.selected.is_some() {
                    self.reply(format!("SD printing byte {}/{}", self.sd.position, self.sd.size));
                } else {
                    self.reply("Not SD printing");
                }
                self.reply("ok");
            }
            "M28" => {
                let name = cmd.split_whitespace().nth(1).unwrap_or("").to_string();
                self.sd.files.entry(name.clone()).or_default().clear();
                self.receiving_file = Some(name.clone());
                self.reply(format!("Writing to file: {name}"));
            }
            "M29" => {
                self.receiving_file = None;
                self.reply("Done saving file");
                self.reply("ok");
            }
            "M30" => {
                // Unconditional delete: no "file not found" branch.
                let name = cmd.split_whitespace().nth(1).unwrap_or("");
                self.sd.files.remove(name);
                self.reply("ok");
            }
            "M999" => {
                // Always a resend of line 1, regardless of actual position.
                self.reply("Resend:1");
            }
            "" => {}
            _ => {
                self.reply("ok");
            }
        }
    }

    fn tick_sd_printing(&mut self) {
        if let Some(pos) = self.sd.pending_seek.take() {
            self.sd.position = pos.min(self.sd.size as u64);
        }
        if self.sd.printing {
            self.sd.position = (self.sd.position + 64).min(self.sd.size as u64);
            if self.sd.position >= self.sd.size as u64 {
                self.sd.printing = false;
                self.reply("Done printing file");
            }
        }
    }
}

impl Transport for VirtualPrinter {
    async fn read_line(&mut self) -> std::io::Result<Line> {
        tokio::time::sleep(STEP_DELAY).await;
        self.tick_sd_printing();
        self.temps.tick();
        match self.outbox.pop_front() {
            Some(bytes) => Ok(Line::Data(bytes)),
            None if self.closed => Ok(Line::Closed),
            None => Ok(Line::Timeout),
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        let text = String::from_utf8_lossy(buf);
        for raw in text.split('\n') {
            let raw = raw.trim();
            if !raw.is_empty() {
                self.handle_frame(raw);
            }
        }
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> std::io::Result<()> {
        // The simulator accepts any requested baud; it has no real wire to match.
        self.baud_rate = baud;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

fn parse_checksummed(raw: &str) -> Option<(u32, &str, u8)> {
    let star = raw.rfind('*')?;
    let sum: u8 = raw[star + 1..].parse().ok()?;
    let body = &raw[..star];
    fn n_prefix(input: &mut &str) -> PResult<u32> {
        preceded('N', dec_uint).parse_next(input)
    }
    let mut cursor = body;
    let line_number = n_prefix(&mut cursor).ok()?;
    Some((line_number, cursor, sum))
}

fn s_int(cmd: &str) -> Option<i64> {
    s_int_prefixed(cmd, 'S')
}

fn s_int_prefixed(cmd: &str, prefix: char) -> Option<i64> {
    cmd.split_whitespace()
        .find_map(|tok| tok.strip_prefix(prefix))
        .and_then(|rest| rest.parse::<i64>().ok())
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn start_banner_is_first_line() {
        let mut printer = VirtualPrinter::new(FaultPlan::default());
        match printer.read_line().await.unwrap() {
            Line::Data(bytes) => assert_eq!(&bytes[..], b"start"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn accepts_checksummed_line_in_order() {
        let mut printer = VirtualPrinter::new(FaultPlan::default());
        let _ = printer.read_line().await.unwrap();
        let frame = printhost_serializer::frame_checksummed(1, "G28");
        printer.write_all(&frame).await.unwrap();
        match printer.read_line().await.unwrap() {
            Line::Data(bytes) => assert_eq!(&bytes[..], b"ok"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_line_number_triggers_resend() {
        let mut printer = VirtualPrinter::new(FaultPlan::default());
        let _ = printer.read_line().await.unwrap();
        let frame = printhost_serializer::frame_checksummed(5, "G28");
        printer.write_all(&frame).await.unwrap();
        let first = printer.read_line().await.unwrap();
        let second = printer.read_line().await.unwrap();
        let texts: Vec<String> = [first, second]
            .into_iter()
            .filter_map(|l| match l {
                Line::Data(b) => Some(String::from_utf8_lossy(&b).to_string()),
                _ => None,
            })
            .collect();
        assert!(texts.iter().any(|t| t.starts_with("Resend:1")));
    }

    #[tokio::test]
    async fn m23_missing_file_reports_open_failed() {
        let mut printer = VirtualPrinter::new(FaultPlan::default());
        let _ = printer.read_line().await.unwrap();
        let frame = printhost_serializer::frame_checksummed(1, "M23 missing.gco");
        printer.write_all(&frame).await.unwrap();
        let first = printer.read_line().await.unwrap();
        match first {
            Line::Data(bytes) => {
                assert!(String::from_utf8_lossy(&bytes).contains("open failed"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn m999_always_resends_line_one() {
        let mut printer = VirtualPrinter::new(FaultPlan::default());
        let _ = printer.read_line().await.unwrap();
        printer.write_all(b"M999\n").await.unwrap();
        match printer.read_line().await.unwrap() {
            Line::Data(bytes) => assert_eq!(&bytes[..], b"Resend:1"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
