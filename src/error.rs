use thiserror::Error;

/// Shared-memory ring buffer errors
#[derive(Error, Debug)]
pub enum RingBufferError {
    #[error("Unsupported shared memory backend: {0}")]
    UnsupportedBackend(u8),

    #[error("Shared memory segment already exists: {0}")]
    AlreadyExists(String),

    #[error("Shared memory segment not found: {0}")]
    NotFound(String),

    #[error("ABI level mismatch (expected {expected}, found {found})")]
    AbiMismatch { expected: u32, found: u32 },

    #[error("Segment is not a ring buffer (bad magic)")]
    BadMagic,

    #[error("Segment too small: {actual} bytes, need {required}")]
    SegmentTooSmall { required: usize, actual: usize },

    #[error("Another write proxy is outstanding")]
    WriterBusy,

    #[error("All {0} slots are held by readers")]
    AllSlotsBusy(usize),

    #[error("Entry of {len} bytes exceeds slot capacity of {capacity}")]
    EntryTooLarge { len: usize, capacity: usize },

    #[error("Shared memory I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame descriptor decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Descriptor truncated")]
    Truncated,

    #[error("Unknown transport tag: {0}")]
    UnknownTag(u8),

    #[error("Segment name is not valid UTF-8")]
    InvalidName,

    #[error("{0} trailing bytes after descriptor")]
    TrailingBytes(usize),
}

/// Beacon pattern table errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BeaconTableError {
    #[error("Pattern {index} has length {found}, expected {expected}")]
    LengthMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Async device handoff errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceTokenError {
    #[error("Device token has been shut down")]
    Shutdown,

    #[error("Device report queue is full")]
    Busy,

    #[error("Acquisition thread failed: {0}")]
    ThreadFailed(String),
}

/// Plugin registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("Plugin {name} failed: {reason}")]
    PluginFailed { name: String, reason: String },
}

/// Result type for ring buffer operations
pub type RingResult<T> = Result<T, RingBufferError>;
