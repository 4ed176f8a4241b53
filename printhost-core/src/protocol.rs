//! Checksummed send/resend coordination. Wraps [`printhost_serializer::History`]
//! with the line-number bookkeeping and the resend-target resolution order a
//! Marlin-family firmware expects.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use printhost_serializer::{frame_checksummed, frame_unnumbered, History};

use crate::parser::leading_signed_float;

#[derive(Debug, thiserror::Error)]
pub enum ResendError {
    #[error("firmware asked to resend line {requested}, but only {available} lines of history are kept")]
    TooOld { requested: u32, available: u32 },
}

/// Owns the line-number counter and transmit history for one connection.
/// Lives inside the monitor task; nothing else ever touches it, so sends
/// are serialized without naming a mutex at all.
#[derive(Debug)]
pub struct SendCoordinator {
    next_line_number: u32,
    history: History,
    /// Frames still waiting to go out for an in-progress resend, drained
    /// one per subsequently received line rather than all at once.
    pending_resend: VecDeque<Bytes>,
}

impl SendCoordinator {
    pub fn new() -> Self {
        Self {
            next_line_number: 1,
            history: History::new(),
            pending_resend: VecDeque::new(),
        }
    }

    pub fn resend_in_progress(&self) -> bool {
        !self.pending_resend.is_empty()
    }

    /// Frames `cmd` under the next line number, appends it to history
    /// *before* returning it so a resend request that arrives while the
    /// bytes are still in flight can already find it, and advances the
    /// counter.
    pub fn frame_next(&mut self, cmd: &str) -> Bytes {
        let line_number = self.next_line_number;
        self.next_line_number = self.next_line_number.wrapping_add(1);
        self.history.push(line_number, cmd);
        frame_checksummed(line_number, cmd)
    }

    /// Commands that never get a line number (connection handshake probes,
    /// plain polls, anything sent before the printer has acknowledged the
    /// first line).
    pub fn frame_unnumbered(&self, cmd: &str) -> Bytes {
        frame_unnumbered(cmd)
    }

    /// Frames `cmd` under an explicit line number without touching the
    /// counter or history. Used only for the synthetic `M110` sent on a
    /// line-number reset, which clears history right after anyway.
    pub fn frame_at(&self, line_number: u32, cmd: &str) -> Bytes {
        frame_checksummed(line_number, cmd)
    }

    /// Resets the counter to `n`, clears history and any resend in
    /// progress. Used on `M110 N<n>`, wherever that command came from.
    pub fn reset_line_number(&mut self, n: u32) {
        self.next_line_number = n.wrapping_add(1);
        self.history.clear();
        self.pending_resend.clear();
    }

    pub fn current_line_number(&self) -> u32 {
        self.next_line_number
    }

    /// Resolves a `Resend:`/`rs` target against history and queues the
    /// frames to replay, in order. Nothing is sent yet — the caller drains
    /// one frame per subsequently received line via [`Self::next_resend_frame`]
    /// so the firmware isn't flooded with the whole backlog at once.
    pub fn begin_resend(&mut self, requested: u32) -> Result<(), ResendError> {
        let frames = self.history.replay_from(requested).ok_or(ResendError::TooOld {
            requested,
            available: self.history.len() as u32,
        })?;
        self.pending_resend = frames.into();
        Ok(())
    }

    /// Pops the next queued replay frame, if any. The resend is considered
    /// finished once this returns `None`.
    pub fn next_resend_frame(&mut self) -> Option<Bytes> {
        self.pending_resend.pop_front()
    }

    pub fn end_resend(&mut self) {
        self.pending_resend.clear();
    }
}

impl Default for SendCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-section feedrate multipliers, applied to `G0`/`G1` moves that carry
/// an explicit `F` word. A multiplier of 1.0 is a no-op, and commands
/// without an `F` word pass through untouched.
#[derive(Debug, Default, Clone)]
pub struct FeedrateModifiers {
    by_section: HashMap<String, f64>,
}

impl FeedrateModifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, section: impl Into<String>, multiplier: f64) {
        self.by_section.insert(section.into(), multiplier);
    }

    pub fn get(&self, section: &str) -> Option<f64> {
        self.by_section.get(section).copied()
    }

    /// Every modifier currently set, keyed by section name.
    pub fn all(&self) -> HashMap<String, f64> {
        self.by_section.clone()
    }
}

/// Returns `true` if `cmd`'s command word (case-insensitively, ignoring
/// leading/trailing whitespace) equals `code`, e.g. `matches_gcode("g1
/// x10", "G1")`.
pub fn matches_gcode(cmd: &str, code: &str) -> bool {
    cmd.trim()
        .split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case(code))
}

/// Scales the `F` parameter of a `G0`/`G1` move in place, leaving every
/// other word untouched. No-op if `multiplier` is `1.0` or the command has
/// no `F` word.
pub fn rewrite_feedrate(cmd: &str, multiplier: f64) -> String {
    if multiplier == 1.0 {
        return cmd.to_string();
    }
    let mut words: Vec<String> = Vec::new();
    for word in cmd.split_whitespace() {
        if let Some(rest) = word.strip_prefix(['F', 'f']) {
            if let Some(value) = leading_signed_float(rest) {
                words.push(format!("F{}", value * multiplier));
                continue;
            }
        }
        words.push(word.to_string());
    }
    words.join(" ")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_next_advances_and_records_history() {
        let mut coord = SendCoordinator::new();
        let first = coord.frame_next("G28");
        assert!(first.starts_with(b"N1G28"));
        let second = coord.frame_next("G1 X10");
        assert!(second.starts_with(b"N2G1 X10"));
    }

    #[test]
    fn resend_replays_one_frame_per_call() {
        let mut coord = SendCoordinator::new();
        coord.frame_next("G28");
        coord.frame_next("G1 X10");
        coord.frame_next("G1 X20");
        coord.begin_resend(2).expect("within history");
        assert!(coord.resend_in_progress());
        let first = coord.next_resend_frame().expect("one frame queued");
        assert!(first.starts_with(b"N2G1 X10"));
        assert!(coord.resend_in_progress());
        let second = coord.next_resend_frame().expect("second frame queued");
        assert!(second.starts_with(b"N3G1 X20"));
        assert!(coord.next_resend_frame().is_none());
        assert!(!coord.resend_in_progress());
    }

    #[test]
    fn reset_line_number_clears_history_and_resend() {
        let mut coord = SendCoordinator::new();
        coord.frame_next("G28");
        coord.frame_next("G1 X10");
        coord.begin_resend(1).expect("within history");
        coord.reset_line_number(0);
        assert_eq!(coord.current_line_number(), 1);
        assert!(!coord.resend_in_progress());
        assert!(coord.begin_resend(1).is_err());
    }

    #[test]
    fn resend_too_old_is_an_error() {
        let mut coord = SendCoordinator::new();
        for _ in 0..60 {
            coord.frame_next("G1 X1");
        }
        assert!(coord.begin_resend(1).is_err());
    }

    #[test]
    fn feedrate_rewrite_scales_f_word_only() {
        assert_eq!(rewrite_feedrate("G1 X10 F1200", 0.5), "G1 X10 F600");
        assert_eq!(rewrite_feedrate("G1 X10", 0.5), "G1 X10");
        assert_eq!(rewrite_feedrate("G1 X10 F1200", 1.0), "G1 X10 F1200");
    }

    #[test]
    fn matches_gcode_is_case_insensitive() {
        assert!(matches_gcode("g1 x10", "G1"));
        assert!(!matches_gcode("g10 x10", "G1"));
    }
}
