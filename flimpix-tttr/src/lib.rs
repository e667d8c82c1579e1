//! flimpix-tttr: TTTR record decoding and FLIM image reconstruction.
//!
//! This crate turns a PicoQuant T3-mode record stream into per-channel
//! intensity, average-lifetime, and lifetime-ordered image cubes.
//!
//! # Key Components
//!
//! - [`decode`] / [`DecoderState`] - Bit-level record decoding for the
//!   legacy PicoHarp and the generic HydraHarp/TimeHarp/MultiHarp layouts
//! - [`estimate_scan_geometry`] - Pass 1, derives line timing and frame count
//! - [`accumulate_images`] - Pass 2, fills the output cubes
//! - [`reconstruct`] - The full two-pass pipeline with post-processing
//!
//! # Processing Pipeline
//!
//! 1. **Pass 1 (sequential)**: Estimate scan geometry from markers
//! 2. **Pass 2 (sequential)**: Accumulate photons into sized cubes
//! 3. **Post-processing**: Average lifetimes and IRF time-zero correction

mod accumulate;
mod error;
mod geometry;
mod pipeline;
mod postprocess;
mod record;
#[cfg(test)]
pub(crate) mod testutil;

pub use accumulate::{
    accumulate_images, lifetime_stack_bytes, Accumulation, ChannelAccumulation, FrameImages,
    LifetimeStack,
};
pub use error::{Error, Result};
pub use geometry::{estimate_scan_geometry, ScanGeometry};
pub use pipeline::{reconstruct, ChannelImages, ChannelOutput, FlimOutput};
pub use postprocess::{average_lifetime, estimate_irf_time_zero};
pub use record::{
    decode, iter_records, rec_type, record_format_from_code, DecoderState, RecordKind,
    HH_WRAPAROUND, PH_WRAPAROUND,
};

// Re-export core types for convenience
pub use flimpix_core::{
    AcquisitionConfig, Calibration, CancelToken, Channel, FrameBinning, LoadOptions, PerChannel,
    RecordFormat, ResolvedLoadOptions,
};
