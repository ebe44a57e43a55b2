use serde::{Deserialize, Serialize};

use crate::error::RingBufferError;

/// Largest alignment honored for slot data
pub const MAX_ALIGNMENT: usize = 4096;
pub const DEFAULT_ALIGNMENT: usize = 16;
pub const DEFAULT_ENTRIES: usize = 16;
pub const DEFAULT_ENTRY_SIZE: usize = 65536;

/// Shared memory mechanism backing a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BackendType {
    /// Named file mapping (POSIX shm directory or temp dir)
    Basic = 0,
    Windows = 1,
    SysV = 2,
}

impl BackendType {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(BackendType::Basic),
            1 => Some(BackendType::Windows),
            2 => Some(BackendType::SysV),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Fails for backends this build cannot map
    pub fn ensure_supported(self) -> Result<(), RingBufferError> {
        match self {
            BackendType::Basic => Ok(()),
            other => Err(RingBufferError::UnsupportedBackend(other.id())),
        }
    }
}

impl Default for BackendType {
    fn default() -> Self {
        BackendType::Basic
    }
}

/// Turn an arbitrary string into something usable as an OS object name.
///
/// Names must start with a letter and contain only `[A-Za-z0-9_]`.
pub fn make_name_safe(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    match name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => out.push('Z'),
    }
    out.extend(
        name.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }),
    );
    out
}

/// Parameters for creating or finding a ring buffer.
///
/// Setters normalize rather than reject: alignment is rounded up to a power
/// of two, counts are raised to at least one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingBufferOptions {
    name: String,
    alignment: usize,
    entries: usize,
    entry_size: usize,
    backend: u8,
    initial_sequence: u32,
}

impl Default for RingBufferOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            alignment: DEFAULT_ALIGNMENT,
            entries: DEFAULT_ENTRIES,
            entry_size: DEFAULT_ENTRY_SIZE,
            backend: BackendType::Basic.id(),
            initial_sequence: 0,
        }
    }
}

impl RingBufferOptions {
    pub fn new(name: &str) -> Self {
        Self::default().with_name(name)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = make_name_safe(name);
        self
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = normalize_alignment(alignment);
        self
    }

    pub fn with_entries(mut self, entries: usize) -> Self {
        self.entries = entries.clamp(1, u16::MAX as usize);
        self
    }

    pub fn with_entry_size(mut self, entry_size: usize) -> Self {
        self.entry_size = entry_size.clamp(1, u32::MAX as usize);
        self
    }

    /// Raw backend id; unknown or unsupported ids fail at create/find time
    pub fn with_backend(mut self, backend: u8) -> Self {
        self.backend = backend;
        self
    }

    /// First sequence number handed out by a freshly created buffer
    pub fn with_initial_sequence(mut self, sequence: u32) -> Self {
        self.initial_sequence = sequence;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn backend_id(&self) -> u8 {
        self.backend
    }

    pub fn initial_sequence(&self) -> u32 {
        self.initial_sequence
    }

    pub fn backend(&self) -> Result<BackendType, RingBufferError> {
        let backend = BackendType::from_id(self.backend)
            .ok_or(RingBufferError::UnsupportedBackend(self.backend))?;
        backend.ensure_supported()?;
        Ok(backend)
    }
}

pub fn normalize_alignment(alignment: usize) -> usize {
    alignment.max(1).next_power_of_two().min(MAX_ALIGNMENT)
}
