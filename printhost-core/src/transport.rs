//! Byte transport abstraction. The monitor owns exactly one [`Transport`]
//! for the lifetime of a connection; it is the only component that reads
//! from or writes to it.

use std::{future::Future, time::Duration};

use bytes::Bytes;

/// Result of one `read_line` call.
#[derive(Debug, Clone)]
pub enum Line {
    /// A complete, newline-terminated line (newline stripped).
    Data(Bytes),
    /// No data arrived within the configured read timeout.
    Timeout,
    /// The transport is gone; no further reads will produce data.
    Closed,
}

/// Blocking-flavored (from the caller's perspective: it awaits, but never
/// returns a partial line) read/write contract shared by the real serial
/// port and [`printhost-virtual`]'s simulator.
pub trait Transport: Send + 'static {
    /// Read one newline-terminated line, or [`Line::Timeout`] if the
    /// configured timeout elapses first, or [`Line::Closed`] once the
    /// underlying device is gone.
    fn read_line(&mut self) -> impl Future<Output = std::io::Result<Line>> + Send;

    /// Write raw bytes. Implementations should let write-timeouts surface as
    /// an `io::Error` so [`crate::protocol`] can apply the one-retry policy.
    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = std::io::Result<()>> + Send;

    /// Change the baud rate of an already-open port. Only ever called during
    /// [`crate::state::State::DetectingBaudrate`].
    fn set_baud_rate(&mut self, baud: u32) -> std::io::Result<()>;

    /// Change the read timeout used by `read_line`.
    fn set_read_timeout(&mut self, timeout: Duration);

    /// Release the underlying device. Subsequent reads must report
    /// [`Line::Closed`].
    fn close(&mut self);
}
