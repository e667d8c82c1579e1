//! I/O and container-format error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O and container-format error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying file system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not start with a known PTU or PT3 identifier.
    #[error("not a PTU or PT3 file (identifier {0:?})")]
    InvalidMagic(String),

    /// Known container, unsupported format version.
    #[error("unsupported format version {0:?}")]
    UnsupportedVersion(String),

    /// The file ends inside the header.
    #[error("file truncated inside the header")]
    TruncatedHeader,

    /// A PTU header tag carries a type code this reader does not know.
    #[error("unknown type code {type_code:#010x} for header tag {name:?}")]
    UnknownTagType { name: String, type_code: u32 },

    /// Decoding or reconstruction error.
    #[error(transparent)]
    Record(#[from] flimpix_tttr::Error),

    /// Core library error.
    #[error(transparent)]
    Core(#[from] flimpix_core::Error),
}
