//! Checksummed line-number framing for Marlin/Repetier/Sprinter style firmware,
//! plus the bounded transmit history resend recovery replays from.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};

/// Maximum number of previously transmitted commands kept for resend recovery.
pub const HISTORY_CAPACITY: usize = 50;

/// Compute the XOR checksum over the ASCII bytes of an unframed `N<lineno><cmd>` prefix.
pub fn checksum(prefix: &[u8]) -> u8 {
    prefix.iter().fold(0u8, |acc, byte| acc ^ byte)
}

/// Build `N<lineno><cmd>*<checksum>\n`.
pub fn frame_checksummed(line_number: u32, cmd: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(cmd.len() + 16);
    buf.put_u8(b'N');
    buf.put_slice(itoa::Buffer::new().format(line_number).as_bytes());
    buf.put_slice(cmd.as_bytes());
    let sum = checksum(&buf);
    buf.put_u8(b'*');
    buf.put_slice(itoa::Buffer::new().format(sum).as_bytes());
    buf.put_u8(b'\n');
    buf.freeze()
}

/// Build `<cmd>\n`, used when neither checksums nor line numbers are requested.
pub fn frame_unnumbered(cmd: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(cmd.len() + 1);
    buf.put_slice(cmd.as_bytes());
    buf.put_u8(b'\n');
    buf.freeze()
}

/// One previously transmitted, line-numbered command body (unframed).
#[derive(Debug, Clone)]
struct Entry {
    line_number: u32,
    cmd: String,
}

/// Bounded ring of the most recently transmitted, line-numbered commands,
/// oldest evicted once [`HISTORY_CAPACITY`] is exceeded. Indexed both by
/// tail offset (for simple "last N" lookups) and by line number (for resend
/// replay).
#[derive(Debug, Default, Clone)]
pub struct History {
    lines: VecDeque<Entry>,
}

impl History {
    pub fn new() -> Self {
        Self {
            lines: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Record a command as having just been sent under `line_number`.
    /// Evicts the oldest entry if the ring is full.
    pub fn push(&mut self, line_number: u32, cmd: impl Into<String>) {
        if self.lines.len() >= HISTORY_CAPACITY {
            self.lines.pop_front();
        }
        self.lines.push_back(Entry {
            line_number,
            cmd: cmd.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Fetch the command sent `offset` transmissions before the most recent
    /// one (`offset == 0` is the last entry pushed).
    pub fn get_from_end(&self, offset: usize) -> Option<&str> {
        let idx = self.lines.len().checked_sub(offset + 1)?;
        self.lines.get(idx).map(|entry| entry.cmd.as_str())
    }

    /// Re-frames every kept command from `line_number` onward (inclusive),
    /// in send order, for resend replay. `None` if `line_number` precedes
    /// the oldest entry still in the ring (not enough history to satisfy it).
    pub fn replay_from(&self, line_number: u32) -> Option<Vec<Bytes>> {
        let oldest = self.lines.front()?.line_number;
        if line_number < oldest {
            return None;
        }
        Some(
            self.lines
                .iter()
                .filter(|entry| entry.line_number >= line_number)
                .map(|entry| frame_checksummed(entry.line_number, &entry.cmd))
                .collect(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checksum_matches_xor_of_prefix() {
        let prefix = b"N1G1 X10";
        let expected = prefix.iter().fold(0u8, |a, b| a ^ b);
        assert_eq!(checksum(prefix), expected);
    }

    #[test]
    fn frame_checksummed_matches_spec_example() {
        let frame = frame_checksummed(1, "G1 X10");
        let expected_checksum = checksum(b"N1G1 X10");
        let expected = format!("N1G1 X10*{expected_checksum}\n");
        assert_eq!(frame, Bytes::from(expected));
    }

    #[test]
    fn frame_unnumbered_has_no_checksum() {
        let frame = frame_unnumbered("M105");
        assert_eq!(frame, Bytes::from_static(b"M105\n"));
    }

    #[test]
    fn history_evicts_oldest_past_capacity() {
        let mut history = History::new();
        for i in 0..(HISTORY_CAPACITY + 5) {
            history.push(i as u32 + 1, format!("G1 X{i}"));
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.get_from_end(0), Some("G1 X54"));
        assert_eq!(history.get_from_end(HISTORY_CAPACITY - 1), Some("G1 X5"));
        assert_eq!(history.get_from_end(HISTORY_CAPACITY), None);
    }

    #[test]
    fn history_offset_from_end_is_index_based() {
        let mut history = History::new();
        history.push(1, "A");
        history.push(2, "B");
        history.push(3, "C");
        assert_eq!(history.get_from_end(0), Some("C"));
        assert_eq!(history.get_from_end(1), Some("B"));
        assert_eq!(history.get_from_end(2), Some("A"));
        assert_eq!(history.get_from_end(3), None);
    }

    #[test]
    fn replay_from_reframes_requested_range() {
        let mut history = History::new();
        history.push(1, "G28");
        history.push(2, "G1 X10");
        history.push(3, "G1 X20");
        let replay = history.replay_from(2).unwrap();
        assert_eq!(replay.len(), 2);
        assert!(replay[0].starts_with(b"N2G1 X10"));
        assert!(replay[1].starts_with(b"N3G1 X20"));
    }

    #[test]
    fn replay_from_too_old_line_is_none() {
        let mut history = History::new();
        for i in 1..=(HISTORY_CAPACITY as u32 + 5) {
            history.push(i, format!("G1 X{i}"));
        }
        assert!(history.replay_from(1).is_none());
    }
}
