/// Tag attached to a [`GcodeEntry`] selecting a per-section feedrate
/// multiplier (see [`crate::protocol::rewrite_feedrate`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Section(pub String);

impl Section {
    pub fn custom() -> Self {
        Section("CUSTOM".to_string())
    }
}

impl From<&str> for Section {
    fn from(value: &str) -> Self {
        Section(value.to_string())
    }
}

/// One entry of an outer-app-supplied gcode list: either a bare command, or
/// a command paired with a section tag.
#[derive(Debug, Clone)]
pub enum GcodeEntry {
    Plain(String),
    Sectioned(String, Section),
}

impl GcodeEntry {
    pub fn command(&self) -> &str {
        match self {
            GcodeEntry::Plain(cmd) => cmd,
            GcodeEntry::Sectioned(cmd, _) => cmd,
        }
    }

    pub fn section(&self) -> Option<&Section> {
        match self {
            GcodeEntry::Plain(_) => None,
            GcodeEntry::Sectioned(_, section) => Some(section),
        }
    }

    pub fn with_command(&self, command: String) -> GcodeEntry {
        match self {
            GcodeEntry::Plain(_) => GcodeEntry::Plain(command),
            GcodeEntry::Sectioned(_, section) => GcodeEntry::Sectioned(command, section.clone()),
        }
    }
}

impl From<String> for GcodeEntry {
    fn from(value: String) -> Self {
        GcodeEntry::Plain(value)
    }
}

impl From<&str> for GcodeEntry {
    fn from(value: &str) -> Self {
        GcodeEntry::Plain(value.to_string())
    }
}

impl From<(String, Section)> for GcodeEntry {
    fn from((cmd, section): (String, Section)) -> Self {
        GcodeEntry::Sectioned(cmd, section)
    }
}
