use thiserror::Error;

/// Errors surfaced by NTFS parsing operations.
///
/// Structural corruption is reported as-is; the parser never attempts
/// repair. Missing optional structures (no `$Secure`, no unnamed `$DATA`)
/// are represented as absent results by the operations themselves and do
/// not appear here.
#[derive(Error, Debug)]
pub enum NtfsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} already initialized")]
    AlreadyInitialized(&'static str),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("missing value: {0}")]
    MissingValue(String),

    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("corrupt run list: {0}")]
    CorruptRuns(String),

    #[error("corrupt bitmap: {0}")]
    CorruptBitmap(String),

    #[error("truncated attribute: {0}")]
    TruncatedAttribute(String),

    #[error("cyclic attribute list in MFT entry {0}")]
    CyclicAttributeList(u64),

    #[error("MFT entry {index} out of range ({count} entries)")]
    EntryOutOfRange { index: u64, count: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("released while entries are still in use")]
    BusyOnRelease,
}

/// Result type alias for NTFS operations.
pub type Result<T> = std::result::Result<T, NtfsError>;
