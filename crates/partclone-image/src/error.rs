use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImageError>;

/// Unified error type for partclone image sessions.
///
/// The enum is `Clone` so a session can cache the outcome of its one-time initialization and hand
/// the same error to every later caller. For the same reason [`ImageError::Io`] stores a
/// human-readable `String` rather than `std::io::Error`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("not a partclone image (magic mismatch)")]
    BadMagic,

    #[error("malformed partclone image: {0}")]
    Format(&'static str),

    #[error("unsupported partclone image: {0}")]
    Unsupported(&'static str),

    /// A backend could not satisfy a read because the requested range ends past its length.
    #[error("out of bounds: offset={offset} len={len} capacity={capacity}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        capacity: u64,
    },

    /// A virtual device read was requested outside `[0, virtual_size)`.
    #[error("read out of range: offset={offset} len={len} device_size={capacity}")]
    OutOfRange {
        offset: u64,
        len: u64,
        capacity: u64,
    },

    #[error("integer overflow while computing byte offsets")]
    OffsetOverflow,

    #[error("bitmap index {index} out of range (total_block={total})")]
    BitIndexOutOfRange { index: u64, total: u64 },

    #[error("session is not prepared")]
    NotReady,

    #[error("invalid export name: {0:?}")]
    InvalidExport(String),

    #[error("export not found: {0}")]
    ExportNotFound(String),

    #[error("export catalog error: {0}")]
    Catalog(String),

    /// Generic I/O failure reported by a backend.
    #[error("io error: {0}")]
    Io(String),
}

impl ImageError {
    /// Malformed or inconsistent header/bitmap. Fatal at open time.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::BadMagic | Self::Format(_) | Self::Unsupported(_)
        )
    }

    /// Backend failure. Fatal for the failing call only.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io(_) | Self::OutOfBounds { .. })
    }

    /// Request outside the virtual device. Rejected without touching the session.
    pub fn is_range_error(&self) -> bool {
        matches!(self, Self::OutOfRange { .. } | Self::OffsetOverflow)
    }
}

impl From<std::io::Error> for ImageError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}
