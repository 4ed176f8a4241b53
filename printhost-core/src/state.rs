/// Connection/print phase, kept as a plain enum with predicate methods
/// rather than a bitmask of ints so illegal states aren't representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    Offline,
    OpeningSerial,
    DetectingSerial,
    DetectingBaudrate,
    Connecting,
    Operational,
    Printing,
    Paused,
    Closed,
    Error,
    ClosedWithError,
    ReceivingFile,
}

impl State {
    pub fn is_operational(self) -> bool {
        matches!(
            self,
            State::Operational | State::Printing | State::Paused | State::ReceivingFile
        )
    }

    pub fn is_busy(self) -> bool {
        matches!(self, State::Printing | State::ReceivingFile)
    }

    pub fn is_printing(self) -> bool {
        self == State::Printing
    }

    pub fn is_paused(self) -> bool {
        self == State::Paused
    }

    pub fn is_error(self) -> bool {
        matches!(self, State::Error | State::ClosedWithError)
    }

    pub fn is_closed_or_error(self) -> bool {
        matches!(self, State::Error | State::ClosedWithError | State::Closed)
    }

    /// Human-readable label. Doesn't distinguish an SD print from a host
    /// print, and carries no error text — a caller wanting the reason for
    /// `Error`/`ClosedWithError` reads `Snapshot::error` alongside this.
    pub fn label(self) -> &'static str {
        match self {
            State::Offline => "Offline",
            State::OpeningSerial => "Opening serial port",
            State::DetectingSerial => "Detecting serial port",
            State::DetectingBaudrate => "Detecting baudrate",
            State::Connecting => "Connecting",
            State::Operational => "Operational",
            State::Printing => "Printing",
            State::Paused => "Paused",
            State::Closed => "Closed",
            State::Error => "Error",
            State::ClosedWithError => "Error",
            State::ReceivingFile => "Sending file to SD",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn operational_predicate_covers_paused_and_receiving() {
        assert!(State::Operational.is_operational());
        assert!(State::Paused.is_operational());
        assert!(State::ReceivingFile.is_operational());
        assert!(State::Printing.is_operational());
        assert!(!State::Offline.is_operational());
        assert!(!State::Connecting.is_operational());
    }

    #[test]
    fn error_states() {
        assert!(State::Error.is_error());
        assert!(State::ClosedWithError.is_error());
        assert!(!State::Closed.is_error());
    }
}
