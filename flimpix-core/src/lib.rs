//! flimpix-core: Core types for PicoQuant TTTR/FLIM image reconstruction.
//!
//! This crate provides the types shared by the decoder, the I/O layer and the
//! CLI: photon channels, acquisition configuration, user load parameters,
//! physical calibration, cooperative cancellation and the core error set.

pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;

pub use cancel::CancelToken;
pub use channel::{Channel, PerChannel};
pub use config::{
    normalize_markers, AcquisitionConfig, Calibration, FrameBinning, LoadOptions, RecordFormat,
    ResolvedLoadOptions,
};
pub use error::{Error, Result};
