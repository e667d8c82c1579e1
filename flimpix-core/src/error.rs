//! Error types for flimpix-core.

use thiserror::Error;

/// Result type alias for flimpix operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for flimpix operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The file carries no imaging header, so there is no scan geometry.
    #[error("file has no imaging header: not a FLIM image file")]
    MissingImagingHeader,

    /// No completed scan line was found, so the sync-ticks-per-line average
    /// cannot be formed.
    #[error("no completed scan lines found: line markers absent or misconfigured")]
    NoScanLines,

    /// Every completed scan line had zero sync-tick duration; pixel mapping
    /// would divide by zero.
    #[error("scan lines have zero sync duration: line markers do not bracket the scan")]
    ZeroLineDuration,

    /// Lifetime output was requested but the TCSPC resolution is unusable.
    #[error("invalid TCSPC time resolution: {0} ns")]
    InvalidTimeResolution(f32),

    /// Image dimensions from the header are unusable.
    #[error("invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    /// Processing was cancelled between records.
    #[error("processing cancelled")]
    Cancelled,
}
