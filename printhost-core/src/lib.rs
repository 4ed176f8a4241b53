//! Host-side engine for talking to Marlin/Repetier/Sprinter firmware over a
//! line-oriented serial transport: connection handshake, checksummed
//! send/resend, status-line classification, and print pacing shared
//! between host-streamed and firmware-SD jobs.

pub mod baud;
pub mod config;
pub mod error;
pub mod gcode;
pub mod log;
pub mod observer;
pub mod parser;
pub mod protocol;
pub mod serial;
pub mod session;
pub mod state;
pub mod transport;

pub use config::{PortConfig, SessionConfig};
pub use error::{SessionError, TransportError};
pub use gcode::{GcodeEntry, Section};
pub use observer::{NullObserver, SessionObserver, TemperatureReading};
pub use serial::SerialTransport;
pub use session::{Session, Snapshot};
pub use state::State;
pub use transport::{Line, Transport};
