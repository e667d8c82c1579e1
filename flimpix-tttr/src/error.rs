//! TTTR-specific error types.

use thiserror::Error;

/// Result type for TTTR operations.
pub type Result<T> = std::result::Result<T, Error>;

/// TTTR-specific error types.
#[derive(Error, Debug)]
pub enum Error {
    /// The header names a record type this decoder does not handle.
    #[error("unsupported TTTR record type code {0:#010x}")]
    UnsupportedRecordType(i64),

    /// T2 mode streams are recognized but rejected.
    #[error("T2 mode is not supported (record type code {0:#010x})")]
    T2ModeUnsupported(i64),

    /// The data section is not a whole number of 32-bit records.
    #[error("record section length {0} is not a multiple of 4 bytes")]
    MisalignedRecords(usize),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] flimpix_core::Error),
}
