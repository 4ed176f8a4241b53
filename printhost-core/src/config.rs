//! Connection configuration. Storage/persistence of these values is the
//! outer application's job; this module only names the knobs the session
//! needs.

use std::{path::PathBuf, time::Duration};

/// How to pick the serial device.
#[derive(Debug, Clone)]
pub enum PortConfig {
    /// Use this device path/COM name as given.
    Fixed(String),
    /// Probe the platform's enumerated ports (enumeration itself is the
    /// outer application's concern; this just means "try each candidate
    /// path handed in, in order").
    Auto(Vec<String>),
}

/// Tunables for one connection attempt. `Default` matches common stock
/// firmware-host defaults for the fields it covers.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub port: PortConfig,
    /// `None` triggers full baud autodetection.
    pub baud_rate: Option<u32>,
    pub connection_timeout: Duration,
    pub read_timeout: Duration,
    /// Directory the virtual SD card's files are resolved against, when
    /// running against `printhost-virtual` rather than real firmware.
    pub virtual_sd_dir: PathBuf,
    /// Checksum and number every outbound command, not just the print
    /// stream. Some firmware refuses to accept unnumbered commands at all.
    pub always_send_checksum: bool,
    /// Hold the handshake until the firmware's `start` banner is seen,
    /// rather than treating the connection as ready once opened.
    pub wait_for_start_on_connect: bool,
    /// Whether to query/track SD card state at all.
    pub sd_support: bool,
    /// On a user-issued `M110 N<x>`, archive the original command (under a
    /// synthetic `M110` reframed to the new line number) instead of just
    /// sending it through as-is.
    pub reset_line_numbers_with_prefixed_n: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: PortConfig::Auto(Vec::new()),
            baud_rate: None,
            connection_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(500),
            virtual_sd_dir: PathBuf::from("."),
            always_send_checksum: false,
            wait_for_start_on_connect: false,
            sd_support: true,
            reset_line_numbers_with_prefixed_n: false,
        }
    }
}
