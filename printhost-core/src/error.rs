use thiserror::Error;

/// Failures from the underlying byte transport (real serial port or
/// [`printhost-virtual`]'s simulator).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("write to serial port timed out twice in a row")]
    WriteTimeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by [`crate::Session`]'s control methods. The monitor
/// itself never returns these to the outer application; it records them
/// and projects them through `SessionObserver::on_state_change` instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has no printer connected")]
    NotConnected,
    #[error("a print is already in progress")]
    AlreadyPrinting,
    #[error("session is not operational")]
    NotOperational,
    #[error(transparent)]
    Transport(#[from] TransportError),
}
