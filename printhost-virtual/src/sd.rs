use std::collections::HashMap;

/// Virtual SD card state: a flat file table plus the currently selected
/// file's read cursor.
#[derive(Debug, Default)]
pub(crate) struct VirtualSd {
    pub files: HashMap<String, Vec<u8>>,
    pub selected: Option<String>,
    pub size: usize,
    pub position: u64,
    pub printing: bool,
    /// Set by `M26 S<n>`, applied on the next simulated print tick rather
    /// than immediately.
    pub pending_seek: Option<u64>,
}

impl VirtualSd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, name: String, size: usize) {
        self.selected = Some(name);
        self.size = size;
        self.position = 0;
        self.printing = false;
        self.pending_seek = None;
    }
}
